//! Audio Stream Fabric.
//!
//! Two append-only, multi-consumer-group streams per session: the
//! audio stream (`audio:stream:<client_id>`, single writer: the gateway)
//! and the results stream (`transcription:results:<session_id>`, single
//! writer: the streaming transcription consumer). Both are modeled as
//! traits so the default in-memory fan-out implementation (used by tests
//! and the aggregator's unit tests) and a Redis Streams-backed
//! implementation (`redis-backend` feature, `XADD`/`XREADGROUP`/`XACK`)
//! satisfy the same contract.

mod aggregator;
mod audio_stream;
mod memory;
mod pubsub;
#[cfg(feature = "redis-backend")]
mod redis_backend;
mod result_stream;

pub use aggregator::{aggregate, AggregatedView};
pub use audio_stream::{AudioConsumer, AudioEntry, AudioStream, CHUNK_ID_END};
pub use memory::{InMemoryAudioStream, InMemoryInterimPubSub, InMemoryResultStream};
pub use pubsub::{InterimMessage, InterimPubSub, InterimSubscription};
pub use result_stream::{ResultEntry, ResultStream};

#[cfg(feature = "redis-backend")]
pub use redis_backend::{RedisAudioStream, RedisInterimPubSub, RedisResultStream};

#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("stream for session {0} is gone")]
    SessionGone(String),
    #[error("backend rejected write: {0}")]
    WriteRejected(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, FabricError>;
