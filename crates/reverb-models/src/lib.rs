//! Shared domain types for the voice-capture ingest and conversation
//! lifecycle pipeline.
//!
//! These are plain data types with no I/O; every crate downstream of this
//! one (`reverb-session`, `reverb-fabric`, `reverb-jobs`, `reverb-monitor`,
//! ...) builds behavior around them rather than redefining them.

mod audio;
mod conversation;
mod job;
mod plugin;
mod session;

pub use audio::AudioChunk;
pub use conversation::{
    Conversation, DiarizationSource, EndReason, ProcessingStatus, Segment, SegmentType,
    TranscriptVersion, Word,
};
pub use job::{Job, JobStatus};
pub use plugin::{PluginCondition, PluginConditionKind, PluginRegistration};
pub use session::{AudioFormat, CompletionReason, RecordingMode, Session, SessionStatus};
