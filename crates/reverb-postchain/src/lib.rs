//! Post-Conversation Chain.
//!
//! A DAG of jobs enqueued once a conversation closes:
//!
//! ```text
//! [batch_retranscribe?] -> speaker_recognition -> memory_extraction -> title_summary -> event_dispatch
//! ```
//!
//! `reverb_models::Job::depends_on` models a single parent, so the
//! conceptual fork `{memory_extraction, title_summary}` is serialized
//! (`memory_title.rs`) rather than forked: `title_summary` depends on
//! `memory_extraction` alone, and `event_dispatch` depends on
//! `title_summary` alone, which is sufficient to guarantee both
//! ancestors are `Finished` before it runs. Whether `memory_extraction`
//! should run over the streaming or the batch transcript is resolved by
//! `reverb_config::PostChainConfig::memory_extraction_once_over_batch`.
//!
//! The empty-speech rule — a failed `batch_retranscribe` cancels every
//! dependant by job-id prefix — falls out of the DAG wiring here plus
//! `reverb_jobs::JobQueue`'s own transitive cancellation on `Failed`,
//! rather than a separate name-pattern scan; see `chain.rs`.

mod batch_retranscribe;
mod chain;
mod event_dispatch;
pub mod mock;
mod memory_title;
mod speaker_merge;
mod speaker_recognition;
mod transcription_fallback;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch_retranscribe::run_batch_retranscribe;
pub use chain::{enqueue_post_conversation_chain, ChainJobIds};
pub use event_dispatch::run_event_dispatch;
pub use memory_title::{run_memory_extraction, run_title_summary, MemoryExtractor, TitleSummary, TitleSummarizer};
pub use speaker_merge::{merge_overlapping_speaker_segments, split_into_windows, SpeakerSegment};
pub use speaker_recognition::{run_speaker_recognition, SpeakerRecognitionService, SpeakerServiceError};
pub use transcription_fallback::{run_transcription_fallback, FallbackOutcome, FallbackStatus};

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("no meaningful speech in batch retranscription")]
    NoMeaningfulSpeech,
    #[error("batch STT error: {0}")]
    BatchStt(String),
    #[error("speaker recognition service error: {0}")]
    SpeakerService(String),
    #[error(transparent)]
    Persistence(#[from] reverb_persistence::PersistenceError),
    #[error(transparent)]
    Jobs(#[from] reverb_jobs::JobQueueError),
    #[error(transparent)]
    Fabric(#[from] reverb_fabric::FabricError),
    #[error(transparent)]
    Session(#[from] reverb_session::SessionError),
}

pub type Result<T> = std::result::Result<T, ChainError>;
