use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use reverb_models::{Job, JobStatus};

use crate::queue::JobQueue;
use crate::{JobQueueError, Result};

fn job_key(job_id: &str) -> String {
    format!("job:{job_id}")
}

fn queue_key(queue: &str) -> String {
    format!("job:queue:{queue}")
}

fn dependants_key(job_id: &str) -> String {
    format!("job:dependants:{job_id}")
}

/// Redis-backed job queue: a hash per job (`job:<id>`), a list per named
/// queue for FIFO dequeue (`job:queue:<name>`), and a set per job id
/// recording its dependants (`job:dependants:<id>`) so promotion on
/// finish is a direct lookup rather than a table scan.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        RedisJobQueue { conn }
    }

    async fn read_job(&self, job_id: &str) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(job_key(job_id))
            .await
            .map_err(|e| JobQueueError::Backend(e.to_string()))?;
        match raw {
            Some(raw) => {
                let job = serde_json::from_str(&raw).map_err(|e| JobQueueError::Backend(e.to_string()))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn write_job(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(job).map_err(|e| JobQueueError::Backend(e.to_string()))?;
        let _: () = conn
            .set(job_key(&job.id), raw)
            .await
            .map_err(|e| JobQueueError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: Job) -> Result<String> {
        let mut conn = self.conn.clone();
        if self.read_job(&job.id).await?.is_some() {
            return Err(JobQueueError::AlreadyExists(job.id));
        }
        if let Some(dep) = &job.depends_on {
            let _: () = conn
                .sadd(dependants_key(dep), &job.id)
                .await
                .map_err(|e| JobQueueError::Backend(e.to_string()))?;
        }
        let id = job.id.clone();
        let queue = job.queue.clone();
        let status = job.status;
        self.write_job(&job).await?;
        if status == JobStatus::Queued {
            let _: () = conn
                .rpush(queue_key(&queue), &id)
                .await
                .map_err(|e| JobQueueError::Backend(e.to_string()))?;
        }
        Ok(id)
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let next_id: Option<String> = conn
            .lpop(queue_key(queue), None)
            .await
            .map_err(|e| JobQueueError::Backend(e.to_string()))?;
        let Some(next_id) = next_id else { return Ok(None) };
        let mut job = self
            .read_job(&next_id)
            .await?
            .ok_or_else(|| JobQueueError::NotFound(next_id.clone()))?;
        job.status = JobStatus::Started;
        self.write_job(&job).await?;
        Ok(Some(job))
    }

    async fn fetch(&self, job_id: &str) -> Result<Option<Job>> {
        self.read_job(job_id).await
    }

    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        let mut job = self
            .read_job(job_id)
            .await?
            .ok_or_else(|| JobQueueError::NotFound(job_id.to_string()))?;
        job.status = status;
        self.write_job(&job).await?;

        match status {
            JobStatus::Finished => self.promote_dependants(job_id).await?,
            JobStatus::Failed => self.cancel_dependants_transitively(job_id).await?,
            _ => {}
        }
        Ok(())
    }

    async fn merge_meta(&self, job_id: &str, patch: serde_json::Value) -> Result<()> {
        let mut job = self
            .read_job(job_id)
            .await?
            .ok_or_else(|| JobQueueError::NotFound(job_id.to_string()))?;
        match (&mut job.meta, patch) {
            (serde_json::Value::Object(existing), serde_json::Value::Object(patch)) => {
                for (k, v) in patch {
                    existing.insert(k, v);
                }
            }
            (slot, patch) => *slot = patch,
        }
        self.write_job(&job).await
    }

    async fn is_registered(&self, job_id: &str) -> Result<bool> {
        Ok(self.read_job(job_id).await?.is_some())
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        let mut job = self
            .read_job(job_id)
            .await?
            .ok_or_else(|| JobQueueError::NotFound(job_id.to_string()))?;
        job.status = JobStatus::Canceled;
        self.write_job(&job).await?;
        self.cancel_dependants_transitively(job_id).await
    }
}

impl RedisJobQueue {
    async fn promote_dependants(&self, finished_job_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let dependants: Vec<String> = conn
            .smembers(dependants_key(finished_job_id))
            .await
            .map_err(|e| JobQueueError::Backend(e.to_string()))?;
        for dependant_id in dependants {
            let Some(mut job) = self.read_job(&dependant_id).await? else {
                continue;
            };
            if job.status != JobStatus::Deferred {
                continue;
            }
            job.status = JobStatus::Queued;
            let queue = job.queue.clone();
            self.write_job(&job).await?;
            let _: () = conn
                .rpush(queue_key(&queue), &dependant_id)
                .await
                .map_err(|e| JobQueueError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn cancel_dependants_transitively(&self, failed_job_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut frontier = vec![failed_job_id.to_string()];
        while let Some(id) = frontier.pop() {
            let dependants: Vec<String> = conn
                .smembers(dependants_key(&id))
                .await
                .map_err(|e| JobQueueError::Backend(e.to_string()))?;
            for dependant_id in dependants {
                if let Some(mut job) = self.read_job(&dependant_id).await? {
                    if job.status != JobStatus::Finished && job.status != JobStatus::Canceled {
                        job.status = JobStatus::Canceled;
                        self.write_job(&job).await?;
                    }
                }
                frontier.push(dependant_id);
            }
        }
        Ok(())
    }
}
