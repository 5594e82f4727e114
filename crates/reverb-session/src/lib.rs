//! Session Store.
//!
//! Shared mapping from session id to session metadata, counters, status,
//! and flags, plus a small generic key/value facility for named
//! signalling keys (`conversation:current:<session_id>`,
//! `open_conversation:session:<session_id>`, ...). Cyclic signalling
//! between workers is resolved through named keys in the Session Store
//! rather than shared objects, so every cross-worker coordination point
//! in this pipeline goes through this crate.
//!
//! Two backends are provided behind the same traits: an in-memory
//! `DashMap`-backed store (default, used by tests and single-process
//! deployments) and, behind the `redis-backend` feature, a Redis-hash
//! store.

mod kv;
#[cfg(feature = "redis-backend")]
mod redis_backend;
mod store;

pub use kv::{InMemoryKeyValueStore, KeyValueStore};
pub use reverb_models::{CompletionReason, Marker, Session, SessionStatus};
pub use store::{InMemorySessionStore, SessionStore};

#[cfg(feature = "redis-backend")]
pub use redis_backend::{RedisKeyValueStore, RedisSessionStore};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("illegal status transition for session {session_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        session_id: String,
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
