use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Sentinel `chunk_id` marking end-of-session.
pub const CHUNK_ID_END: &str = "END";

/// One entry on `audio:stream:<client_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioEntry {
    pub session_id: String,
    /// Zero-padded monotonic id (`"%05d"`), or [`CHUNK_ID_END`].
    pub chunk_id: String,
    pub audio: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u8,
    pub sample_width: u8,
    pub user_id: String,
    pub client_id: String,
}

impl AudioEntry {
    pub fn is_end(&self) -> bool {
        self.chunk_id == CHUNK_ID_END
    }

    /// Format a zero-padded chunk id.
    pub fn format_chunk_id(seq: u64) -> String {
        format!("{seq:05}")
    }
}

/// Single writer (the gateway), fan-out readers via independent
/// consumer groups: the persistence worker and the transcription
/// consumer both tail the same stream without seeing each other's
/// acknowledgements.
#[async_trait]
pub trait AudioStream: Send + Sync {
    async fn publish(&self, client_id: &str, entry: AudioEntry) -> Result<()>;

    async fn publish_end(&self, client_id: &str, session_id: &str, user_id: &str) -> Result<()> {
        self.publish(
            client_id,
            AudioEntry {
                session_id: session_id.to_string(),
                chunk_id: CHUNK_ID_END.to_string(),
                audio: Vec::new(),
                sample_rate: 0,
                channels: 0,
                sample_width: 0,
                user_id: user_id.to_string(),
                client_id: client_id.to_string(),
            },
        )
        .await
    }

    /// On disconnect, bound the stream's lifetime so still-attached
    /// consumers can drain before it disappears.
    async fn set_ttl(&self, client_id: &str, ttl: Duration) -> Result<()>;

    /// Open an independent consumer group reader. Calling this twice with
    /// different `group` names gives two readers that see every entry
    /// (fan-out); calling it twice with the same name is the reference
    /// implementation's crash-recovery path (same group resumes from its
    /// last unacknowledged entry).
    async fn open_consumer_group(
        &self,
        client_id: &str,
        group: &str,
    ) -> Result<Box<dyn AudioConsumer>>;
}

/// A consumer-group handle. At-least-once: entries may be redelivered
/// after a crash, so consumers must be idempotent by `chunk_id`.
#[async_trait]
pub trait AudioConsumer: Send + Sync {
    /// Suspend until the next entry is available, or `None` if the
    /// session's stream has been removed entirely.
    async fn read_next(&mut self) -> Result<Option<AudioEntry>>;

    async fn ack(&mut self, chunk_id: &str) -> Result<()>;
}
