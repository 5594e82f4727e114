use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::Result;

/// The generic string key/value facility backing every named signalling
/// key: `conversation:current:<session_id>`,
/// `open_conversation:session:<session_id>`,
/// `session:conversation_count:<session_id>`,
/// `transcription:complete:<session_id>`,
/// `speech_detection_job:<client_id>`, `audio:queue:<session_id>`.
///
/// Each key is owned by exactly one writer and read by others, so this
/// trait only needs get/set/delete/TTL/increment/set-if-absent — no
/// transactions across keys.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomic increment of an integer counter; creates it at 1 if absent.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64>;

    /// Returns `true` if this call created the key (it was absent), i.e.
    /// "set field if-unset".
    async fn set_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool>;
}

struct Value {
    data: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, Value>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn live(value: &Value) -> bool {
        match value.expires_at {
            Some(at) => Instant::now() < at,
            None => true,
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Value {
                data: value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .get(key)
            .filter(|v| Self::live(v))
            .map(|v| v.data.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.get(key).is_some_and(|v| Self::live(&v)))
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Value {
                data: "0".to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            });
        let next = entry.data.parse::<i64>().unwrap_or(0) + 1;
        entry.data = next.to_string();
        Ok(next)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        if self.exists(key).await? {
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_only_succeeds_once() {
        let kv = InMemoryKeyValueStore::new();
        assert!(kv
            .set_if_absent("open_conversation:session:s1", "job-1".into(), None)
            .await
            .unwrap());
        assert!(!kv
            .set_if_absent("open_conversation:session:s1", "job-2".into(), None)
            .await
            .unwrap());
        assert_eq!(
            kv.get("open_conversation:session:s1").await.unwrap(),
            Some("job-1".to_string())
        );
    }

    #[tokio::test]
    async fn incr_creates_and_accumulates() {
        let kv = InMemoryKeyValueStore::new();
        assert_eq!(
            kv.incr("session:conversation_count:s1", None).await.unwrap(),
            1
        );
        assert_eq!(
            kv.incr("session:conversation_count:s1", None).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn delete_clears_key() {
        let kv = InMemoryKeyValueStore::new();
        kv.set("conversation:current:s1", "conv-1".into(), None)
            .await
            .unwrap();
        kv.delete("conversation:current:s1").await.unwrap();
        assert_eq!(kv.get("conversation:current:s1").await.unwrap(), None);
    }
}
