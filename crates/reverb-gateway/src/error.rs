#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("auth failed: {0}")]
    Auth(String),
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("streaming transcription is not configured")]
    StreamingNotConfigured,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("opus decode error: {0}")]
    Codec(String),
    #[error("session error: {0}")]
    Session(#[from] reverb_session::SessionError),
    #[error("fabric error: {0}")]
    Fabric(#[from] reverb_fabric::FabricError),
    #[error("job queue error: {0}")]
    Jobs(#[from] reverb_jobs::JobQueueError),
    #[error("persistence error: {0}")]
    Persistence(#[from] reverb_persistence::PersistenceError),
    #[error("post-conversation chain error: {0}")]
    Chain(#[from] reverb_postchain::ChainError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
