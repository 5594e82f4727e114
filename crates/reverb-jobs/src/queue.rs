use async_trait::async_trait;
use reverb_models::{Job, JobStatus};

use crate::Result;

/// The job queue's contract surface. Implementations own promotion
/// (`Deferred` -> `Queued` when a dependency finishes) and transitive
/// cancellation (a failed dependency cancels every transitive
/// dependant) as part of `set_status`, so callers never have to walk
/// the dependency graph themselves.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job. A job already carrying `depends_on` should be
    /// constructed via `Job::depending_on` (status `Deferred`) before
    /// calling this — enqueuing never itself evaluates dependencies.
    async fn enqueue(&self, job: Job) -> Result<String>;

    /// Pop the next `Queued` job from a named queue, transitioning it to
    /// `Started`. Returns `None` if the queue is empty. FIFO per queue.
    async fn dequeue(&self, queue: &str) -> Result<Option<Job>>;

    async fn fetch(&self, job_id: &str) -> Result<Option<Job>>;

    /// Transition a job's status, running dependency promotion/
    /// cancellation as a side effect of reaching `Finished` or `Failed`.
    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()>;

    /// Merge `patch`'s object keys into the job's `meta`, which stays
    /// mutable during execution so the UI can show progress.
    async fn merge_meta(&self, job_id: &str, patch: serde_json::Value) -> Result<()>;

    /// Zombie-worker detection: a job id the queue no longer knows about
    /// means its owning worker died without reporting status.
    async fn is_registered(&self, job_id: &str) -> Result<bool>;

    /// Cancel a job outright (used by callers retiring a long-running
    /// job, e.g. replacing a stale speech-detection job).
    async fn cancel(&self, job_id: &str) -> Result<()>;
}
