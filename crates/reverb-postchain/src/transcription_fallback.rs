//! Transcription-Fallback Job (enqueued by Speech-Detection when a
//! session's streaming transcript never produced meaningful speech).
//! Lives in this crate rather than `reverb-speech-detect` because it
//! shares `enqueue_post_conversation_chain`'s DAG-building logic with
//! the Conversation Monitor's own close path.
//!
//! Two audio sources are checked, in order:
//! 1. A conversation already has persisted chunks — the normal case
//!    when the Audio Persistence Worker ran but Speech-Detection
//!    (reading only the result stream) never saw a transcript. Here the
//!    fallback defers entirely to the job queue: enqueueing
//!    `batch_retranscribe` and letting its `depends_on` chain carry the
//!    rest forward is "waiting for the batch transcription to finish"
//!    without a busy-poll, matching how the monitor's own close path
//!    starts the same chain.
//! 2. No chunks exist yet, but PCM is still sitting unread in the
//!    client's raw audio stream (e.g. `always_persist` was off). There is
//!    no job that accepts raw stream audio directly, so this stage
//!    transcribes it inline and seeds a new conversation's active
//!    transcript itself before enqueueing the rest of the chain.
//!
//! If neither source has anything, the job reports `skipped, no_audio`.

use std::time::Duration;

use reverb_fabric::AudioStream;
use reverb_jobs::JobQueue;
use reverb_models::{Conversation, DiarizationSource, TranscriptVersion};
use reverb_persistence::{ChunkRepository, ConversationRepository};
use reverb_session::KeyValueStore;
use reverb_transcribe::BatchStt;
use uuid::Uuid;

use crate::chain::enqueue_post_conversation_chain;
use crate::{ChainError, Result};

/// How long to wait on each read while draining the raw audio stream
/// before concluding "nothing more is available right now" — this job
/// runs after Speech-Detection already gave up, so there is no live
/// producer left to wait on.
const AUDIO_DRAIN_READ_TIMEOUT: Duration = Duration::from_millis(200);

fn conversation_current_key(session_id: &str) -> String {
    format!("conversation:current:{session_id}")
}

fn short_prefix(conversation_id: Uuid) -> String {
    conversation_id.to_string()[..8].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStatus {
    /// Chunks already existed; `batch_retranscribe` plus the rest of the
    /// chain were enqueued for the job queue to run.
    ChainEnqueued,
    /// No chunks existed; raw stream audio was transcribed inline and the
    /// chain was enqueued from `speaker_recognition` on.
    TranscribedRawAudio,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub status: FallbackStatus,
    pub reason: Option<String>,
    pub conversation_id: Option<Uuid>,
}

impl FallbackOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            status: FallbackStatus::Skipped,
            reason: Some(reason.to_string()),
            conversation_id: None,
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_transcription_fallback(
    session_id: &str,
    client_id: &str,
    user_id: &str,
    kv: &dyn KeyValueStore,
    chunks: &dyn ChunkRepository,
    conversations: &dyn ConversationRepository,
    audio: &dyn AudioStream,
    jobs: &dyn JobQueue,
    stt: &dyn BatchStt,
) -> Result<FallbackOutcome> {
    if let Some(conversation_id) = existing_conversation_with_chunks(session_id, kv, chunks).await? {
        tracing::info!(
            %conversation_id,
            "transcription fallback: persisted chunks found, enqueueing chain"
        );
        enqueue_post_conversation_chain(jobs, conversation_id, true).await?;
        return Ok(FallbackOutcome {
            status: FallbackStatus::ChainEnqueued,
            reason: None,
            conversation_id: Some(conversation_id),
        });
    }

    let entries = drain_pending_audio(client_id, audio).await?;
    if entries.is_empty() {
        tracing::info!(session_id, "transcription fallback: no audio anywhere, skipping");
        return Ok(FallbackOutcome::skipped("no_audio"));
    }

    let wav = wav_from_pcm_entries(&entries)?;
    let transcript = stt
        .transcribe_wav(&wav)
        .await
        .map_err(|err| ChainError::BatchStt(err.to_string()))?;

    let mut conversation = Conversation::new_recording(user_id, client_id);
    let conversation_id = conversation.conversation_id;
    let word_count = transcript.words.len();
    let has_segments = !transcript.segments.is_empty();
    conversation.set_active_transcript(TranscriptVersion {
        version_id: format!("fallback_{}", short_prefix(conversation_id)),
        transcript: transcript.text,
        words: transcript.words,
        segments: transcript.segments,
        provider: transcript.provider,
        model: transcript.model,
        diarization_source: has_segments.then_some(DiarizationSource::Provider),
        metadata: serde_json::json!({"source": "transcription_fallback", "word_count": word_count}),
        created_at: chrono::Utc::now(),
    });
    conversations.create(conversation).await?;

    tracing::info!(
        %conversation_id,
        "transcription fallback: transcribed raw stream audio, enqueueing chain"
    );
    enqueue_post_conversation_chain(jobs, conversation_id, false).await?;

    Ok(FallbackOutcome {
        status: FallbackStatus::TranscribedRawAudio,
        reason: None,
        conversation_id: Some(conversation_id),
    })
}

async fn existing_conversation_with_chunks(
    session_id: &str,
    kv: &dyn KeyValueStore,
    chunks: &dyn ChunkRepository,
) -> Result<Option<Uuid>> {
    let Some(raw) = kv.get(&conversation_current_key(session_id)).await? else {
        return Ok(None);
    };
    let Ok(conversation_id) = raw.parse::<Uuid>() else {
        return Ok(None);
    };
    let count = chunks.count_for_conversation(conversation_id).await?;
    Ok((count > 0).then_some(conversation_id))
}

/// Drain whatever is immediately readable off a fresh consumer group on
/// the client's audio stream, stopping at the END sentinel or as soon as
/// a read doesn't resolve within [`AUDIO_DRAIN_READ_TIMEOUT`].
async fn drain_pending_audio(
    client_id: &str,
    audio: &dyn AudioStream,
) -> Result<Vec<reverb_fabric::AudioEntry>> {
    let mut consumer = audio.open_consumer_group(client_id, "transcription_fallback").await?;
    let mut entries = Vec::new();
    loop {
        match tokio::time::timeout(AUDIO_DRAIN_READ_TIMEOUT, consumer.read_next()).await {
            Ok(Ok(Some(entry))) if entry.is_end() => break,
            Ok(Ok(Some(entry))) => entries.push(entry),
            Ok(Ok(None)) | Err(_) => break,
            Ok(Err(err)) => return Err(err.into()),
        }
    }
    Ok(entries)
}

/// The audio stream carries already-decoded 16-bit PCM (the gateway
/// decodes Opus before publishing), so this is a direct byte-to-sample
/// conversion, unlike [`reverb_persistence::reconstruct_wav`] which has
/// to undo persisted chunks' own Opus compression.
fn wav_from_pcm_entries(entries: &[reverb_fabric::AudioEntry]) -> Result<Vec<u8>> {
    let first = &entries[0];
    let spec = hound::WavSpec {
        channels: first.channels as u16,
        sample_rate: first.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buffer = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut buffer);
        let mut writer = hound::WavWriter::new(cursor, spec)
            .map_err(|e| ChainError::BatchStt(format!("wav encode: {e}")))?;
        for entry in entries {
            for sample in entry.audio.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                    .map_err(|e| ChainError::BatchStt(format!("wav encode: {e}")))?;
            }
        }
        writer
            .finalize()
            .map_err(|e| ChainError::BatchStt(format!("wav encode: {e}")))?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reverb_fabric::{AudioEntry, InMemoryAudioStream};
    use reverb_jobs::InMemoryJobQueue;
    use reverb_persistence::{InMemoryChunkRepository, InMemoryConversationRepository};
    use reverb_session::InMemoryKeyValueStore;
    use reverb_transcribe::{BatchTranscript, SttCapabilities};
    use reverb_models::{AudioChunk, Word};

    struct StubBatchStt {
        transcript: BatchTranscript,
    }

    #[async_trait]
    impl BatchStt for StubBatchStt {
        fn capabilities(&self) -> SttCapabilities {
            SttCapabilities::default()
        }

        async fn transcribe_wav(&self, _wav_bytes: &[u8]) -> reverb_transcribe::Result<BatchTranscript> {
            Ok(self.transcript.clone())
        }
    }

    fn stt_with(text: &str) -> StubBatchStt {
        StubBatchStt {
            transcript: BatchTranscript {
                text: text.to_string(),
                words: vec![Word {
                    word: text.to_string(),
                    start: 0.0,
                    end: 0.5,
                    confidence: 0.9,
                    speaker: None,
                }],
                segments: vec![],
                provider: "mock".into(),
                model: "mock".into(),
            },
        }
    }

    fn pcm_entry(client_id: &str, seq: u64) -> AudioEntry {
        let samples: Vec<i16> = (0..160).map(|i| (i % 50) as i16 * 10).collect();
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        AudioEntry {
            session_id: client_id.to_string(),
            chunk_id: AudioEntry::format_chunk_id(seq),
            audio: bytes,
            sample_rate: 16_000,
            channels: 1,
            sample_width: 2,
            user_id: "user-1".to_string(),
            client_id: client_id.to_string(),
        }
    }

    #[tokio::test]
    async fn existing_chunks_delegate_to_chain_without_transcribing() {
        let kv = InMemoryKeyValueStore::new();
        let chunks = InMemoryChunkRepository::new();
        let conversations = InMemoryConversationRepository::new();
        let audio = InMemoryAudioStream::new();
        let jobs = InMemoryJobQueue::new();
        let stt = stt_with("should not be called");

        let conversation = Conversation::new_recording("user-1", "client-1");
        let conversation_id = conversation.conversation_id;
        conversations.create(conversation).await.unwrap();
        kv.set(&conversation_current_key("sess-1"), conversation_id.to_string(), None)
            .await
            .unwrap();
        chunks
            .insert(AudioChunk {
                conversation_id,
                chunk_index: 0,
                start_time: 0.0,
                end_time: 1.0,
                duration: 1.0,
                sample_rate: 16_000,
                channels: 1,
                sample_width: 2,
                audio_data: vec![],
            })
            .await
            .unwrap();

        let outcome = run_transcription_fallback(
            "sess-1",
            "client-1",
            "user-1",
            kv.as_ref(),
            chunks.as_ref(),
            conversations.as_ref(),
            audio.as_ref(),
            jobs.as_ref(),
            &stt,
        )
        .await
        .unwrap();

        assert_eq!(outcome.status, FallbackStatus::ChainEnqueued);
        assert_eq!(outcome.conversation_id, Some(conversation_id));
        let conversation = conversations.get(conversation_id).await.unwrap();
        assert!(conversation.active_transcript().is_none());
    }

    #[tokio::test]
    async fn raw_stream_audio_is_transcribed_and_chain_starts_without_batch_retranscribe() {
        let kv = InMemoryKeyValueStore::new();
        let chunks = InMemoryChunkRepository::new();
        let conversations = InMemoryConversationRepository::new();
        let audio = InMemoryAudioStream::new();
        let jobs = InMemoryJobQueue::new();
        let stt = stt_with("hello there");

        audio.publish("client-1", pcm_entry("client-1", 0)).await.unwrap();
        audio.publish_end("client-1", "sess-1", "user-1").await.unwrap();

        let outcome = run_transcription_fallback(
            "sess-1",
            "client-1",
            "user-1",
            kv.as_ref(),
            chunks.as_ref(),
            conversations.as_ref(),
            audio.as_ref(),
            jobs.as_ref(),
            &stt,
        )
        .await
        .unwrap();

        assert_eq!(outcome.status, FallbackStatus::TranscribedRawAudio);
        let conversation_id = outcome.conversation_id.unwrap();
        let conversation = conversations.get(conversation_id).await.unwrap();
        assert_eq!(conversation.active_transcript().unwrap().transcript, "hello there");

        let ids = jobs.fetch(&format!("speaker_{}", short_prefix(conversation_id))).await.unwrap().unwrap();
        assert!(ids.depends_on.is_none(), "no batch_retranscribe parent when transcribed inline");
    }

    #[tokio::test]
    async fn no_audio_anywhere_is_skipped() {
        let kv = InMemoryKeyValueStore::new();
        let chunks = InMemoryChunkRepository::new();
        let conversations = InMemoryConversationRepository::new();
        let audio = InMemoryAudioStream::new();
        let jobs = InMemoryJobQueue::new();
        let stt = stt_with("unused");

        let outcome = run_transcription_fallback(
            "sess-1",
            "client-1",
            "user-1",
            kv.as_ref(),
            chunks.as_ref(),
            conversations.as_ref(),
            audio.as_ref(),
            jobs.as_ref(),
            &stt,
        )
        .await
        .unwrap();

        assert_eq!(outcome.status, FallbackStatus::Skipped);
        assert_eq!(outcome.reason.as_deref(), Some("no_audio"));
    }
}
