//! Streaming Transcription Consumer, plus the `BatchStt` trait shared
//! with the post-conversation chain's `batch_retranscribe` job.
//!
//! One streaming job per session tails the audio stream via its own
//! consumer group (fanning out alongside the persistence worker, never
//! racing it), feeds PCM into a provider-specific [`StreamingSession`],
//! and mirrors every interim/final result onto the result stream and
//! the `transcription:interim:<session_id>` pub/sub topic.
//! [`MockStreamingStt`] and [`MockBatchStt`] stand in for a real vendor
//! in tests and in deployments with no provider configured.

mod batch;
mod consumer;
mod mock;
mod stt;

pub use batch::{BatchStt, BatchTranscript};
pub use consumer::{run_transcription_consumer, TranscriptionConsumerConfig};
pub use mock::{MockBatchStt, MockStreamingStt};
pub use stt::{SpeechToText, SttCapabilities, SttResult, StreamingSession};

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

pub type Result<T> = std::result::Result<T, TranscribeError>;
