//! DAG wiring for the post-conversation chain: builds and enqueues
//! every job for one closed conversation in a single call, so the
//! Conversation Monitor and the Transcription-Fallback job share one
//! code path for starting post-processing.

use reverb_jobs::JobQueue;
use reverb_models::Job;
use uuid::Uuid;

use crate::Result;

/// All chain jobs run on the `transcription` queue except the two
/// LLM-backed stages, which share `memory` — named queues exist so an
/// operator can scale STT-heavy and LLM-heavy workers independently.
const TRANSCRIPTION_QUEUE: &str = "transcription";
const MEMORY_QUEUE: &str = "memory";

fn short_prefix(conversation_id: Uuid) -> String {
    conversation_id.to_string()[..8].to_string()
}

/// Job ids enqueued for one conversation, so callers can look any of
/// them up afterwards (tests, UI progress).
#[derive(Debug, Clone)]
pub struct ChainJobIds {
    pub batch_retranscribe: Option<String>,
    pub speaker_recognition: String,
    pub memory_extraction: String,
    pub title_summary: String,
    pub event_dispatch: String,
}

/// Enqueue the whole chain. `always_batch_retranscribe` selects the
/// appropriate `depends_on_job` — when set, `speaker_recognition`
/// depends on a freshly enqueued `batch_retranscribe` job (id prefix
/// `crop_`); otherwise it has no parent and starts immediately.
///
/// If `batch_retranscribe` later fails (no meaningful speech),
/// `reverb_jobs::JobQueue::set_status(Failed)` transitively cancels
/// `speaker_recognition`, `memory_extraction`, `title_summary` and
/// `event_dispatch` on its own, since every one of them sits
/// downstream of `batch_retranscribe` in this DAG.
pub async fn enqueue_post_conversation_chain(
    jobs: &dyn JobQueue,
    conversation_id: Uuid,
    always_batch_retranscribe: bool,
) -> Result<ChainJobIds> {
    let prefix = short_prefix(conversation_id);
    let args = serde_json::json!({ "conversation_id": conversation_id });

    let batch_retranscribe = if always_batch_retranscribe {
        let id = format!("crop_{prefix}");
        let job = Job::new(id.clone(), TRANSCRIPTION_QUEUE, "batch_retranscribe", args.clone(), 3600)
            .with_description("re-run audio through batch STT".to_string());
        jobs.enqueue(job).await?;
        Some(id)
    } else {
        None
    };

    let speaker_recognition = format!("speaker_{prefix}");
    let mut speaker_job = Job::new(
        speaker_recognition.clone(),
        TRANSCRIPTION_QUEUE,
        "speaker_recognition",
        args.clone(),
        3600,
    )
    .with_description("identify speakers in conversation audio".to_string());
    if let Some(parent) = &batch_retranscribe {
        speaker_job = speaker_job.depending_on(parent.clone());
    }
    jobs.enqueue(speaker_job).await?;

    let memory_extraction = format!("memory_{prefix}");
    let memory_job = Job::new(memory_extraction.clone(), MEMORY_QUEUE, "memory_extraction", args.clone(), 600)
        .depending_on(speaker_recognition.clone())
        .with_description("extract memories from final transcript".to_string());
    jobs.enqueue(memory_job).await?;

    let title_summary = format!("title_summary_{prefix}");
    let title_job = Job::new(title_summary.clone(), MEMORY_QUEUE, "title_summary", args.clone(), 600)
        .depending_on(memory_extraction.clone())
        .with_description("generate title and summary".to_string());
    jobs.enqueue(title_job).await?;

    let event_dispatch = format!("event_dispatch_{prefix}");
    let dispatch_job = Job::new(event_dispatch.clone(), TRANSCRIPTION_QUEUE, "event_dispatch", args, 120)
        .depending_on(title_summary.clone())
        .with_description("dispatch conversation.complete to plugins".to_string());
    jobs.enqueue(dispatch_job).await?;

    Ok(ChainJobIds {
        batch_retranscribe,
        speaker_recognition,
        memory_extraction,
        title_summary,
        event_dispatch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverb_jobs::InMemoryJobQueue;
    use reverb_models::JobStatus;

    #[tokio::test]
    async fn without_batch_retranscribe_speaker_recognition_starts_queued() {
        let jobs = InMemoryJobQueue::new();
        let conversation_id = Uuid::new_v4();
        let ids = enqueue_post_conversation_chain(jobs.as_ref(), conversation_id, false)
            .await
            .unwrap();

        assert!(ids.batch_retranscribe.is_none());
        let speaker = jobs.fetch(&ids.speaker_recognition).await.unwrap().unwrap();
        assert_eq!(speaker.status, JobStatus::Queued);
        assert!(speaker.depends_on.is_none());

        let memory = jobs.fetch(&ids.memory_extraction).await.unwrap().unwrap();
        assert_eq!(memory.status, JobStatus::Deferred);
        assert_eq!(memory.depends_on.as_deref(), Some(ids.speaker_recognition.as_str()));

        let title = jobs.fetch(&ids.title_summary).await.unwrap().unwrap();
        assert_eq!(title.depends_on.as_deref(), Some(ids.memory_extraction.as_str()));

        let dispatch = jobs.fetch(&ids.event_dispatch).await.unwrap().unwrap();
        assert_eq!(dispatch.depends_on.as_deref(), Some(ids.title_summary.as_str()));
    }

    #[tokio::test]
    async fn with_batch_retranscribe_speaker_recognition_is_deferred_on_it() {
        let jobs = InMemoryJobQueue::new();
        let conversation_id = Uuid::new_v4();
        let ids = enqueue_post_conversation_chain(jobs.as_ref(), conversation_id, true)
            .await
            .unwrap();

        let batch_id = ids.batch_retranscribe.clone().unwrap();
        assert!(batch_id.starts_with("crop_"));
        let speaker = jobs.fetch(&ids.speaker_recognition).await.unwrap().unwrap();
        assert_eq!(speaker.status, JobStatus::Deferred);
        assert_eq!(speaker.depends_on.as_deref(), Some(batch_id.as_str()));
    }

    #[tokio::test]
    async fn failing_batch_retranscribe_cancels_the_whole_chain() {
        let jobs = InMemoryJobQueue::new();
        let conversation_id = Uuid::new_v4();
        let ids = enqueue_post_conversation_chain(jobs.as_ref(), conversation_id, true)
            .await
            .unwrap();

        let batch_id = ids.batch_retranscribe.unwrap();
        jobs.set_status(&batch_id, JobStatus::Failed).await.unwrap();

        for id in [
            &ids.speaker_recognition,
            &ids.memory_extraction,
            &ids.title_summary,
            &ids.event_dispatch,
        ] {
            let job = jobs.fetch(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Canceled, "{id} should be cancelled");
        }
    }
}
