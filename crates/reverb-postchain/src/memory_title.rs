//! `memory_extraction` and `title_summary` stages. Both are thin trait
//! boundaries onto an external LLM service — only the contracts that
//! the monitor and the post-conversation chain depend on live here.
//!
//! `Job.depends_on` models a single parent, so the conceptual fork
//! `{memory_extraction, title_summary}` is serialized here into
//! `memory_extraction -> title_summary` (see `chain.rs` and
//! `DESIGN.md`); `title_summary` reads its memory context back out of
//! `memory_extraction`'s job `meta` rather than from a shared channel.

use async_trait::async_trait;
use reverb_jobs::JobQueue;
use reverb_models::ProcessingStatus;
use reverb_persistence::ConversationRepository;
use uuid::Uuid;

use crate::Result;

#[async_trait]
pub trait MemoryExtractor: Send + Sync {
    /// Pure consumer of the final transcript text; returns whatever
    /// memory items it extracted, opaque to this crate beyond a count.
    async fn extract(&self, transcript: &str) -> anyhow::Result<serde_json::Value>;
}

#[derive(Debug, Clone)]
pub struct TitleSummary {
    pub title: String,
    pub summary: String,
    pub detailed_summary: String,
}

#[async_trait]
pub trait TitleSummarizer: Send + Sync {
    async fn summarize(
        &self,
        transcript: &str,
        segments: &[reverb_models::Segment],
        memory_context: Option<&serde_json::Value>,
    ) -> anyhow::Result<TitleSummary>;
}

pub async fn run_memory_extraction(
    conversation_id: Uuid,
    job_id: &str,
    conversations: &dyn ConversationRepository,
    jobs: &dyn JobQueue,
    extractor: &dyn MemoryExtractor,
) -> Result<()> {
    let conversation = conversations.get(conversation_id).await?;
    let transcript = conversation
        .active_transcript()
        .map(|v| v.transcript.clone())
        .unwrap_or_default();

    match extractor.extract(&transcript).await {
        Ok(memories) => {
            jobs.merge_meta(job_id, serde_json::json!({"memories": memories})).await?;
        }
        Err(err) => {
            // Logged and marked, never bubbled to the monitor.
            tracing::error!(%conversation_id, %err, "memory extraction failed");
            jobs.merge_meta(job_id, serde_json::json!({"memory_extraction_error": err.to_string()}))
                .await?;
        }
    }
    Ok(())
}

pub async fn run_title_summary(
    conversation_id: Uuid,
    memory_extraction_job_id: Option<&str>,
    conversations: &dyn ConversationRepository,
    jobs: &dyn JobQueue,
    summarizer: &dyn TitleSummarizer,
) -> Result<()> {
    let memory_context = match memory_extraction_job_id {
        Some(id) => jobs
            .fetch(id)
            .await?
            .and_then(|job| job.meta.get("memories").cloned()),
        None => None,
    };

    let conversation = conversations.get(conversation_id).await?;
    let (transcript, segments) = conversation
        .active_transcript()
        .map(|v| (v.transcript.clone(), v.segments.clone()))
        .unwrap_or_default();

    let outcome = summarizer.summarize(&transcript, &segments, memory_context.as_ref()).await;

    conversations
        .mutate(
            conversation_id,
            Box::new(move |conversation| match outcome {
                Ok(result) => {
                    conversation.title = result.title;
                    conversation.summary = Some(result.summary);
                    conversation.detailed_summary = Some(result.detailed_summary);
                    conversation.processing_status = ProcessingStatus::Completed;
                }
                Err(err) => {
                    tracing::error!(%err, "title/summary generation failed");
                    conversation.processing_status = ProcessingStatus::TranscriptionFailed;
                }
            }),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reverb_jobs::InMemoryJobQueue;
    use reverb_models::{Conversation, DiarizationSource, Job, JobStatus, TranscriptVersion};
    use reverb_persistence::InMemoryConversationRepository;

    struct StubExtractor;

    #[async_trait]
    impl MemoryExtractor for StubExtractor {
        async fn extract(&self, _transcript: &str) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!([{"fact": "likes coffee"}]))
        }
    }

    struct StubSummarizer;

    #[async_trait]
    impl TitleSummarizer for StubSummarizer {
        async fn summarize(
            &self,
            _transcript: &str,
            _segments: &[reverb_models::Segment],
            memory_context: Option<&serde_json::Value>,
        ) -> anyhow::Result<TitleSummary> {
            Ok(TitleSummary {
                title: "Coffee chat".into(),
                summary: "Talked about coffee".into(),
                detailed_summary: format!("context: {:?}", memory_context),
            })
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl TitleSummarizer for FailingSummarizer {
        async fn summarize(
            &self,
            _transcript: &str,
            _segments: &[reverb_models::Segment],
            _memory_context: Option<&serde_json::Value>,
        ) -> anyhow::Result<TitleSummary> {
            Err(anyhow::anyhow!("llm unreachable"))
        }
    }

    async fn conversation_with_transcript() -> (Uuid, InMemoryConversationRepository) {
        let conversations = InMemoryConversationRepository::new();
        let mut conversation = Conversation::new_recording("user-1", "client-1");
        let id = conversation.conversation_id;
        conversation.set_active_transcript(TranscriptVersion {
            version_id: "streaming_abc".into(),
            transcript: "we talked about coffee".into(),
            words: vec![],
            segments: vec![],
            provider: "mock".into(),
            model: "mock".into(),
            diarization_source: Some(DiarizationSource::Provider),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        });
        conversations.create(conversation).await.unwrap();
        (id, conversations)
    }

    #[tokio::test]
    async fn memory_extraction_writes_memories_into_job_meta() {
        let (id, conversations) = conversation_with_transcript().await;
        let jobs = InMemoryJobQueue::new();
        jobs.enqueue(Job::new("mem-1", "memory", "memory_extraction", serde_json::json!({}), 600))
            .await
            .unwrap();

        run_memory_extraction(id, "mem-1", conversations.as_ref(), jobs.as_ref(), &StubExtractor)
            .await
            .unwrap();

        let job = jobs.fetch("mem-1").await.unwrap().unwrap();
        assert!(job.meta.get("memories").is_some());
    }

    #[tokio::test]
    async fn title_summary_reads_memory_context_and_completes_conversation() {
        let (id, conversations) = conversation_with_transcript().await;
        let jobs = InMemoryJobQueue::new();
        let mut mem_job = Job::new("mem-1", "memory", "memory_extraction", serde_json::json!({}), 600);
        mem_job.meta = serde_json::json!({"memories": [{"fact": "likes coffee"}]});
        mem_job.status = JobStatus::Finished;
        jobs.enqueue(mem_job).await.unwrap();

        run_title_summary(id, Some("mem-1"), conversations.as_ref(), jobs.as_ref(), &StubSummarizer)
            .await
            .unwrap();

        let conversation = conversations.get(id).await.unwrap();
        assert_eq!(conversation.title, "Coffee chat");
        assert_eq!(conversation.processing_status, ProcessingStatus::Completed);
        assert!(conversation.detailed_summary.unwrap().contains("likes coffee"));
    }

    #[tokio::test]
    async fn title_summary_failure_marks_conversation_transcription_failed() {
        let (id, conversations) = conversation_with_transcript().await;
        let jobs = InMemoryJobQueue::new();

        run_title_summary(id, None, conversations.as_ref(), jobs.as_ref(), &FailingSummarizer)
            .await
            .unwrap();

        let conversation = conversations.get(id).await.unwrap();
        assert_eq!(conversation.processing_status, ProcessingStatus::TranscriptionFailed);
    }
}
