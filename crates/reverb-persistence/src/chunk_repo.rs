use async_trait::async_trait;
use reverb_models::AudioChunk;
use uuid::Uuid;

use crate::Result;

/// Written only by the Audio Persistence Worker; read-only everywhere
/// else. Chunks of one conversation form a contiguous, monotonic
/// timeline with no gaps — enforced by the worker's rotation logic,
/// not by this trait.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    async fn insert(&self, chunk: AudioChunk) -> Result<()>;

    /// Dense chunk index assignment: the next index to use for
    /// `conversation_id`, i.e. the count of chunks already written.
    async fn next_index(&self, conversation_id: Uuid) -> Result<u64>;

    /// All chunks for a conversation, ordered by `chunk_index`, used to
    /// reconstruct a WAV for speaker recognition and batch
    /// re-transcription.
    async fn list_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<AudioChunk>>;

    async fn count_for_conversation(&self, conversation_id: Uuid) -> Result<u64>;
}
