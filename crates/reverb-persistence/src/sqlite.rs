use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use reverb_models::{AudioChunk, Conversation};
use rusqlite::Connection;
use uuid::Uuid;

use crate::{ChunkRepository, ConversationRepository, PersistenceError, Result};

/// Reference storage backend built on `rusqlite`. The reference
/// deployment uses a document store (MongoDB-shaped); this is the
/// Rust-idiomatic swap-in behind the same two trait boundaries, so a
/// document-store backend can replace it without touching callers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                doc_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audio_chunks (
                conversation_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                doc_json TEXT NOT NULL,
                PRIMARY KEY (conversation_id, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_conversation
                ON audio_chunks(conversation_id, chunk_index);
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for SqliteStore {
    async fn create(&self, conversation: Conversation) -> Result<()> {
        let json = serde_json::to_string(&conversation)?;
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO conversations (conversation_id, created_at, doc_json) VALUES (?1, ?2, ?3)",
            (
                conversation.conversation_id.to_string(),
                conversation.created_at.timestamp(),
                json,
            ),
        )?;
        Ok(())
    }

    async fn get(&self, conversation_id: Uuid) -> Result<Conversation> {
        self.try_get(conversation_id)
            .await?
            .ok_or(PersistenceError::ConversationNotFound(conversation_id))
    }

    async fn try_get(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let json: Option<String> = conn
            .query_row(
                "SELECT doc_json FROM conversations WHERE conversation_id = ?1",
                [conversation_id.to_string()],
                |row| row.get(0),
            )
            .ok();
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn mutate(
        &self,
        conversation_id: Uuid,
        f: Box<dyn FnOnce(&mut Conversation) + Send>,
    ) -> Result<Conversation> {
        let mut conversation = self.get(conversation_id).await?;
        f(&mut conversation);
        self.create(conversation.clone()).await?;
        Ok(conversation)
    }
}

#[async_trait]
impl ChunkRepository for SqliteStore {
    async fn insert(&self, chunk: AudioChunk) -> Result<()> {
        let json = serde_json::to_string(&chunk)?;
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO audio_chunks (conversation_id, chunk_index, doc_json) VALUES (?1, ?2, ?3)",
            (
                chunk.conversation_id.to_string(),
                chunk.chunk_index as i64,
                json,
            ),
        )?;
        Ok(())
    }

    async fn next_index(&self, conversation_id: Uuid) -> Result<u64> {
        self.count_for_conversation(conversation_id).await
    }

    async fn list_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<AudioChunk>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT doc_json FROM audio_chunks WHERE conversation_id = ?1 ORDER BY chunk_index ASC",
        )?;
        let rows = stmt.query_map([conversation_id.to_string()], |row| {
            let json: String = row.get(0)?;
            Ok(json)
        })?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(serde_json::from_str(&row?)?);
        }
        Ok(chunks)
    }

    async fn count_for_conversation(&self, conversation_id: Uuid) -> Result<u64> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audio_chunks WHERE conversation_id = ?1",
            [conversation_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverb_models::ProcessingStatus;

    fn sample_conversation() -> Conversation {
        Conversation::new_recording("user-1", "client-1")
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conv = sample_conversation();
        let id = conv.conversation_id;
        store.create(conv).await.unwrap();

        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.conversation_id, id);
        assert_eq!(fetched.processing_status, ProcessingStatus::PendingTranscription);
    }

    #[tokio::test]
    async fn missing_conversation_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn mutate_persists_changes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conv = sample_conversation();
        let id = conv.conversation_id;
        store.create(conv).await.unwrap();

        store
            .mutate(id, Box::new(|c| c.title = "Kitchen chat".to_string()))
            .await
            .unwrap();

        assert_eq!(store.get(id).await.unwrap().title, "Kitchen chat");
    }

    #[tokio::test]
    async fn chunk_indices_are_assigned_densely() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conversation_id = Uuid::new_v4();

        for _ in 0..3 {
            let idx = store.next_index(conversation_id).await.unwrap();
            store
                .insert(AudioChunk {
                    conversation_id,
                    chunk_index: idx,
                    start_time: idx as f64 * 30.0,
                    end_time: (idx + 1) as f64 * 30.0,
                    duration: 30.0,
                    sample_rate: 16_000,
                    channels: 1,
                    sample_width: 2,
                    audio_data: vec![1, 2, 3],
                })
                .await
                .unwrap();
        }

        let chunks = store.list_for_conversation(conversation_id).await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(AudioChunk::indices_are_contiguous(&chunks));
    }
}
