use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use reverb_models::{Job, JobStatus};
use tokio::sync::Mutex;
use tracing::warn;

use crate::queue::JobQueue;
use crate::{JobQueueError, Result};

struct State {
    jobs: HashMap<String, Job>,
    queues: HashMap<String, VecDeque<String>>,
    /// dependency id -> dependant ids, maintained incrementally on enqueue.
    dependants: HashMap<String, Vec<String>>,
}

/// Reference `JobQueue`: a process-local map of jobs plus one FIFO deque
/// per named queue. Dependency promotion and transitive cancellation are
/// both plain graph walks over `dependants`, no locks beyond the single
/// state mutex — explicit state over hidden framework behavior.
pub struct InMemoryJobQueue {
    state: Mutex<State>,
}

impl InMemoryJobQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryJobQueue {
            state: Mutex::new(State {
                jobs: HashMap::new(),
                queues: HashMap::new(),
                dependants: HashMap::new(),
            }),
        })
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.id) {
            return Err(JobQueueError::AlreadyExists(job.id));
        }
        let id = job.id.clone();
        if let Some(dep) = &job.depends_on {
            state
                .dependants
                .entry(dep.clone())
                .or_default()
                .push(id.clone());
        }
        if job.status == JobStatus::Queued {
            state
                .queues
                .entry(job.queue.clone())
                .or_default()
                .push_back(id.clone());
        }
        state.jobs.insert(id.clone(), job);
        Ok(id)
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(next_id) = state.queues.get_mut(queue).and_then(|q| q.pop_front()) else {
            return Ok(None);
        };
        let job = state
            .jobs
            .get_mut(&next_id)
            .ok_or_else(|| JobQueueError::NotFound(next_id.clone()))?;
        job.status = JobStatus::Started;
        Ok(Some(job.clone()))
    }

    async fn fetch(&self, job_id: &str) -> Result<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(job_id).cloned())
    }

    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobQueueError::NotFound(job_id.to_string()));
        }
        state.jobs.get_mut(job_id).unwrap().status = status;

        match status {
            JobStatus::Finished => promote_dependants(&mut state, job_id),
            JobStatus::Failed => cancel_dependants_transitively(&mut state, job_id),
            _ => {}
        }
        Ok(())
    }

    async fn merge_meta(&self, job_id: &str, patch: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobQueueError::NotFound(job_id.to_string()))?;
        match (&mut job.meta, patch) {
            (serde_json::Value::Object(existing), serde_json::Value::Object(patch)) => {
                for (k, v) in patch {
                    existing.insert(k, v);
                }
            }
            (slot, patch) => *slot = patch,
        }
        Ok(())
    }

    async fn is_registered(&self, job_id: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.jobs.contains_key(job_id))
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobQueueError::NotFound(job_id.to_string()));
        }
        state.jobs.get_mut(job_id).unwrap().status = JobStatus::Canceled;
        cancel_dependants_transitively(&mut state, job_id);
        Ok(())
    }
}

/// Promotion to queued happens atomically when a dependency finishes.
/// Atomic here means "under the single state lock", not a distributed
/// transaction — there is exactly one writer for this map.
fn promote_dependants(state: &mut State, finished_job_id: &str) {
    let Some(dependants) = state.dependants.get(finished_job_id).cloned() else {
        return;
    };
    for dependant_id in dependants {
        let Some(job) = state.jobs.get_mut(&dependant_id) else {
            warn!(job_id = %dependant_id, "dependant referenced but missing from job table");
            continue;
        };
        if job.status != JobStatus::Deferred {
            continue;
        }
        job.status = JobStatus::Queued;
        let queue = job.queue.clone();
        state.queues.entry(queue).or_default().push_back(dependant_id);
    }
}

/// Dependency failure cancels transitive dependants rather than
/// silently dropping them. Walks the dependants graph breadth-first so
/// a chain of three dependent jobs all end up `Canceled`, not just the
/// immediate child.
fn cancel_dependants_transitively(state: &mut State, failed_job_id: &str) {
    let mut frontier = vec![failed_job_id.to_string()];
    while let Some(id) = frontier.pop() {
        let Some(dependants) = state.dependants.get(&id).cloned() else {
            continue;
        };
        for dependant_id in dependants {
            if let Some(job) = state.jobs.get_mut(&dependant_id) {
                if job.status == JobStatus::Finished || job.status == JobStatus::Canceled {
                    continue;
                }
                job.status = JobStatus::Canceled;
            }
            frontier.push(dependant_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(id: &str, queue: &str) -> Job {
        Job::new(id, queue, "noop", json!({}), 60)
    }

    #[tokio::test]
    async fn enqueue_and_dequeue_fifo() {
        let q = InMemoryJobQueue::new();
        q.enqueue(job("a", "default")).await.unwrap();
        q.enqueue(job("b", "default")).await.unwrap();

        let first = q.dequeue("default").await.unwrap().unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(first.status, JobStatus::Started);

        let second = q.dequeue("default").await.unwrap().unwrap();
        assert_eq!(second.id, "b");

        assert!(q.dequeue("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dependant_promotes_to_queued_when_dependency_finishes() {
        let q = InMemoryJobQueue::new();
        q.enqueue(job("dep", "memory")).await.unwrap();
        q.enqueue(job("child", "memory").depending_on("dep"))
            .await
            .unwrap();

        assert!(q.dequeue("memory").await.unwrap().is_some());
        let dep = q.fetch("dep").await.unwrap().unwrap();
        assert_eq!(dep.status, JobStatus::Started);

        q.set_status("dep", JobStatus::Finished).await.unwrap();
        let child = q.fetch("child").await.unwrap().unwrap();
        assert_eq!(child.status, JobStatus::Queued);

        let dequeued_child = q.dequeue("memory").await.unwrap().unwrap();
        assert_eq!(dequeued_child.id, "child");
    }

    #[tokio::test]
    async fn failed_dependency_cancels_transitive_chain() {
        let q = InMemoryJobQueue::new();
        q.enqueue(job("a", "memory")).await.unwrap();
        q.enqueue(job("b", "memory").depending_on("a")).await.unwrap();
        q.enqueue(job("c", "memory").depending_on("b")).await.unwrap();

        q.set_status("a", JobStatus::Failed).await.unwrap();

        assert_eq!(q.fetch("b").await.unwrap().unwrap().status, JobStatus::Canceled);
        assert_eq!(q.fetch("c").await.unwrap().unwrap().status, JobStatus::Canceled);
    }

    #[tokio::test]
    async fn meta_patches_merge_rather_than_replace() {
        let q = InMemoryJobQueue::new();
        q.enqueue(job("a", "default")).await.unwrap();
        q.merge_meta("a", json!({"progress": 1})).await.unwrap();
        q.merge_meta("a", json!({"total": 10})).await.unwrap();
        let j = q.fetch("a").await.unwrap().unwrap();
        assert_eq!(j.meta, json!({"progress": 1, "total": 10}));
    }

    #[tokio::test]
    async fn cancel_cancels_transitive_dependants_too() {
        let q = InMemoryJobQueue::new();
        q.enqueue(job("a", "memory")).await.unwrap();
        q.enqueue(job("b", "memory").depending_on("a")).await.unwrap();

        q.cancel("a").await.unwrap();
        assert_eq!(q.fetch("a").await.unwrap().unwrap().status, JobStatus::Canceled);
        assert_eq!(q.fetch("b").await.unwrap().unwrap().status, JobStatus::Canceled);
    }

    #[tokio::test]
    async fn unknown_job_is_not_registered() {
        let q = InMemoryJobQueue::new();
        assert!(!q.is_registered("ghost").await.unwrap());
    }
}
