//! Conversation Monitor. Owns one conversation's entire lifetime: opens
//! the conversation record, ticks once a second watching for a close
//! signal, validates segments as they arrive, picks an end reason by
//! priority, closes out the transcript and hands off to the
//! post-conversation chain, and always runs the end-of-conversation
//! cleanup that re-enables the session for its next conversation — even
//! if an earlier step failed.

mod job;
mod segment;

pub use job::{run_conversation_monitor_job, MonitorConfig};
pub use segment::validate_and_normalize_segments;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
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

pub type Result<T> = std::result::Result<T, MonitorError>;
