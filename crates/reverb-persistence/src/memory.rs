use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reverb_models::{AudioChunk, Conversation};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{ChunkRepository, ConversationRepository, PersistenceError, Result};

/// In-memory `ConversationRepository`, used by `reverb-monitor` and
/// `reverb-postchain`'s own test suites so they don't need SQLite just to
/// exercise dependency-ordering logic.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: Mutex<HashMap<Uuid, Conversation>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Test helper: snapshot every conversation currently held, in no
    /// particular order.
    pub async fn list_all(&self) -> Vec<Conversation> {
        self.conversations.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn create(&self, conversation: Conversation) -> Result<()> {
        self.conversations
            .lock()
            .await
            .insert(conversation.conversation_id, conversation);
        Ok(())
    }

    async fn get(&self, conversation_id: Uuid) -> Result<Conversation> {
        self.try_get(conversation_id)
            .await?
            .ok_or(PersistenceError::ConversationNotFound(conversation_id))
    }

    async fn try_get(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.conversations.lock().await.get(&conversation_id).cloned())
    }

    async fn mutate(
        &self,
        conversation_id: Uuid,
        f: Box<dyn FnOnce(&mut Conversation) + Send>,
    ) -> Result<Conversation> {
        let mut conversations = self.conversations.lock().await;
        let conversation = conversations
            .get_mut(&conversation_id)
            .ok_or(PersistenceError::ConversationNotFound(conversation_id))?;
        f(conversation);
        Ok(conversation.clone())
    }
}

#[derive(Default)]
pub struct InMemoryChunkRepository {
    chunks: Mutex<HashMap<Uuid, Vec<AudioChunk>>>,
}

impl InMemoryChunkRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ChunkRepository for InMemoryChunkRepository {
    async fn insert(&self, chunk: AudioChunk) -> Result<()> {
        self.chunks
            .lock()
            .await
            .entry(chunk.conversation_id)
            .or_default()
            .push(chunk);
        Ok(())
    }

    async fn next_index(&self, conversation_id: Uuid) -> Result<u64> {
        Ok(self
            .chunks
            .lock()
            .await
            .get(&conversation_id)
            .map(|v| v.len() as u64)
            .unwrap_or(0))
    }

    async fn list_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<AudioChunk>> {
        let mut chunks = self
            .chunks
            .lock()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn count_for_conversation(&self, conversation_id: Uuid) -> Result<u64> {
        self.next_index(conversation_id).await
    }
}
