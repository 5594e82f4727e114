//! Job Queue.
//!
//! Named queues (`transcription`, `memory`, `audio`, `default`) with
//! explicit dependency promotion and transitive cancellation, rather than
//! broker-side magic: a dependent job is enqueued `Deferred` and only the
//! queue itself moves it to `Queued` once its dependency reaches
//! `Finished` — explicit state over hidden framework behavior.

mod memory;
#[cfg(feature = "redis-backend")]
mod redis_backend;
mod queue;

pub use memory::InMemoryJobQueue;
pub use queue::JobQueue;

#[cfg(feature = "redis-backend")]
pub use redis_backend::RedisJobQueue;

#[derive(Debug, thiserror::Error)]
pub enum JobQueueError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} already exists")]
    AlreadyExists(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, JobQueueError>;
