use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Deferred,
    Started,
    Finished,
    Failed,
    Canceled,
}

/// A unit of work on a named queue (`transcription`, `memory`, `audio`,
/// `default`). `depends_on` models the post-conversation chain's DAG
/// edges; promotion from `Deferred` to `Queued` happens only when the
/// dependency reaches `Finished` (see `reverb-jobs::JobQueue`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub handler: String,
    pub args: serde_json::Value,
    pub status: JobStatus,
    pub timeout_secs: u64,
    pub result_ttl_secs: u64,
    pub depends_on: Option<String>,
    pub meta: serde_json::Value,
    pub description: String,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        queue: impl Into<String>,
        handler: impl Into<String>,
        args: serde_json::Value,
        timeout_secs: u64,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            handler: handler.into(),
            args,
            status: JobStatus::Queued,
            timeout_secs,
            result_ttl_secs: 24 * 3600,
            depends_on: None,
            meta: serde_json::json!({}),
            description: String::new(),
        }
    }

    pub fn depending_on(mut self, dependency_id: impl Into<String>) -> Self {
        self.depends_on = Some(dependency_id.into());
        self.status = JobStatus::Deferred;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_with_dependency_starts_deferred() {
        let job = Job::new("job-2", "memory", "speaker_recognition", serde_json::json!({}), 3600)
            .depending_on("job-1");
        assert_eq!(job.status, JobStatus::Deferred);
        assert_eq!(job.depends_on.as_deref(), Some("job-1"));
    }
}
