//! Speech Detection. One job per open speech-detection attempt, polling
//! the transcription aggregator until it sees real speech or the
//! session winds down without any. Single-instance per session by
//! construction: a session only ever has one `open_conversation:session:*`
//! key live at a time.

mod job;
mod predicate;

pub use job::{
    run_speech_detection_job, should_start_detection, NoopSpeakerCheck, SpeakerCheck,
    SpeechDetectionConfig,
};
pub use predicate::has_speech;

#[derive(Debug, thiserror::Error)]
pub enum SpeechDetectError {
    #[error("session error: {0}")]
    Session(#[from] reverb_session::SessionError),
    #[error("fabric error: {0}")]
    Fabric(#[from] reverb_fabric::FabricError),
    #[error("job queue error: {0}")]
    Jobs(#[from] reverb_jobs::JobQueueError),
}

pub type Result<T> = std::result::Result<T, SpeechDetectError>;
