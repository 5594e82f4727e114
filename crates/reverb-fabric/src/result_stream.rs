use async_trait::async_trait;
use reverb_models::{Segment, Word};
use serde::{Deserialize, Serialize};

use crate::Result;

/// One entry on `transcription:results:<session_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    pub chunk_index: u64,
    pub text: String,
    pub words: Vec<Word>,
    pub segments: Vec<Segment>,
    pub provider: String,
    pub is_final: bool,
}

/// Single writer (the streaming transcription consumer), read-only
/// elsewhere — safe because other readers only ever read.
#[async_trait]
pub trait ResultStream: Send + Sync {
    async fn publish(&self, session_id: &str, entry: ResultEntry) -> Result<()>;

    /// Snapshot of every entry published so far, in publication order.
    /// Used by the Aggregator.
    async fn read_all(&self, session_id: &str) -> Result<Vec<ResultEntry>>;

    /// Delete the result stream on conversation close (never the audio
    /// stream — that belongs to the client).
    async fn delete(&self, session_id: &str) -> Result<()>;
}
