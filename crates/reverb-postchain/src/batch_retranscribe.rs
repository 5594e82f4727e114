//! `batch_retranscribe` stage (optional): re-runs a conversation's
//! audio through a batch STT provider and makes the result the active
//! transcript. Validates meaningful speech first — this is the chain's
//! only stage that can legitimately end the conversation rather than
//! just annotate it, since a conversation with no real speech should
//! never reach `speaker_recognition`.

use reverb_config::limits;
use reverb_jobs::JobQueue;
use reverb_models::{DiarizationSource, TranscriptVersion, Word};
use reverb_persistence::{reconstruct_wav, ChunkRepository, ConversationRepository};
use reverb_transcribe::BatchStt;
use uuid::Uuid;

use crate::{ChainError, Result};

/// Same threshold check as the streaming speech-detection job, applied
/// to a batch transcript's word list instead of a fabric
/// `AggregatedView` — small enough, and different enough an input type,
/// that it isn't worth a cross-crate dependency for it.
fn has_meaningful_speech(words: &[Word]) -> bool {
    let duration = match (words.first(), words.last()) {
        (Some(first), Some(last)) => (last.end - first.start).max(0.0),
        _ => 0.0,
    };
    words.len() >= limits::SPEECH_MIN_WORDS && duration >= limits::SPEECH_MIN_SECONDS
}

pub async fn run_batch_retranscribe(
    conversation_id: Uuid,
    job_id: &str,
    chunks: &dyn ChunkRepository,
    conversations: &dyn ConversationRepository,
    jobs: &dyn JobQueue,
    stt: &dyn BatchStt,
) -> Result<()> {
    jobs.merge_meta(job_id, serde_json::json!({"current": 0, "total": 1, "percent": 0, "message": "reconstructing audio"}))
        .await?;

    let chunk_list = chunks.list_for_conversation(conversation_id).await?;
    let wav = reconstruct_wav(&chunk_list)?;

    jobs.merge_meta(job_id, serde_json::json!({"percent": 25, "message": "transcribing"}))
        .await?;
    let transcript = stt
        .transcribe_wav(&wav)
        .await
        .map_err(|err| ChainError::BatchStt(err.to_string()))?;

    if !has_meaningful_speech(&transcript.words) {
        tracing::info!(%conversation_id, "batch retranscribe: no meaningful speech, deleting conversation");
        conversations
            .mutate(
                conversation_id,
                Box::new(|conversation| conversation.soft_delete("no_meaningful_speech")),
            )
            .await?;
        return Err(ChainError::NoMeaningfulSpeech);
    }

    let prefix = short_prefix(conversation_id);
    let word_count = transcript.words.len();
    let has_segments = !transcript.segments.is_empty();
    let version = TranscriptVersion {
        version_id: format!("batch_{prefix}"),
        transcript: transcript.text,
        words: transcript.words,
        segments: transcript.segments,
        provider: transcript.provider,
        model: transcript.model,
        diarization_source: has_segments.then_some(DiarizationSource::Provider),
        metadata: serde_json::json!({"source": "batch", "word_count": word_count}),
        created_at: chrono::Utc::now(),
    };

    conversations
        .mutate(
            conversation_id,
            Box::new(move |conversation| conversation.set_active_transcript(version)),
        )
        .await?;

    jobs.merge_meta(job_id, serde_json::json!({"percent": 100, "message": "done"})).await?;
    Ok(())
}

fn short_prefix(conversation_id: Uuid) -> String {
    conversation_id.to_string()[..8].to_string()
}
