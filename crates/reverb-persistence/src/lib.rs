//! Audio Persistence Worker, plus the storage layer it and the
//! downstream conversation-lifecycle crates (`reverb-monitor`,
//! `reverb-postchain`) share.
//!
//! Two repositories live here, bundling several repository traits
//! behind one SQLite-backed store:
//!
//! - [`ChunkRepository`] — audio chunks, written only by the persistence
//!   worker, read elsewhere (WAV reconstruction for batch
//!   re-transcription and speaker recognition).
//! - [`ConversationRepository`] — conversation documents, written by the
//!   Conversation Monitor and, one at a time in dependency order, by the
//!   Post-Conversation Chain stages.

mod chunk_repo;
mod conversation_repo;
mod memory;
mod opus_codec;
mod sqlite;
mod worker;

pub use chunk_repo::ChunkRepository;
pub use conversation_repo::ConversationRepository;
pub use memory::{InMemoryChunkRepository, InMemoryConversationRepository};
pub use opus_codec::{decode_opus_frame, encode_opus_frame, reconstruct_wav};
pub use sqlite::SqliteStore;
pub use worker::{run_persistence_worker, PersistenceWorkerConfig};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("conversation {0} not found")]
    ConversationNotFound(uuid::Uuid),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
