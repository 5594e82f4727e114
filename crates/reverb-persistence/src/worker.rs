//! The Audio Persistence Worker's long-running job: tails the audio
//! stream through its own consumer group, packages PCM into
//! fixed-duration Opus chunks, and writes them through
//! [`ChunkRepository`], rotating which conversation they belong to by
//! polling `conversation:current:<session_id>` before every flush.

use std::sync::Arc;
use std::time::Duration;

use reverb_config::limits;
use reverb_fabric::AudioStream;
use reverb_models::{AudioChunk, Conversation, ProcessingStatus};
use reverb_session::{KeyValueStore, SessionStore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{opus_codec, ChunkRepository, ConversationRepository, Result};

#[derive(Debug, Clone)]
pub struct PersistenceWorkerConfig {
    pub session_id: String,
    pub client_id: String,
    pub chunk_duration: Duration,
}

impl PersistenceWorkerConfig {
    pub fn new(session_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            client_id: client_id.into(),
            chunk_duration: limits::PERSISTENCE_CHUNK_DURATION,
        }
    }
}

fn conversation_current_key(session_id: &str) -> String {
    format!("conversation:current:{session_id}")
}

struct PcmBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u8,
    sample_width: u8,
    start_time: f64,
}

impl PcmBuffer {
    fn new(sample_rate: u32, channels: u8, sample_width: u8, start_time: f64) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            channels,
            sample_width,
            start_time,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.samples.extend(
            bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );
    }

    fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.channels.max(1) as f64 / self.sample_rate as f64
    }
}

/// Create the `pending_transcription` placeholder conversation that
/// guarantees audio is saved even if no speech is ever detected, when
/// `session.always_persist` is set.
async fn ensure_placeholder(
    kv: &dyn KeyValueStore,
    conversations: &dyn ConversationRepository,
    session_id: &str,
    user_id: &str,
    client_id: &str,
) -> Result<()> {
    let key = conversation_current_key(session_id);
    if kv.exists(&key).await.is_ok_and(|exists| exists) {
        return Ok(());
    }
    let mut conversation = Conversation::new_recording(user_id, client_id);
    conversation.always_persist = true;
    conversation.processing_status = ProcessingStatus::PendingTranscription;
    let conversation_id = conversation.conversation_id;
    conversations.create(conversation).await?;
    let _ = kv
        .set(
            &key,
            conversation_id.to_string(),
            Some(limits::CONVERSATION_CURRENT_TTL),
        )
        .await;
    Ok(())
}

async fn flush(
    buffer: PcmBuffer,
    conversation_id: Uuid,
    chunks: &dyn ChunkRepository,
) -> Result<()> {
    if buffer.samples.is_empty() {
        return Ok(());
    }
    let duration = buffer.duration_seconds();
    let encoded = opus_codec::encode_opus_frame(&buffer.samples, buffer.sample_rate, buffer.channels)?;
    let index = chunks.next_index(conversation_id).await?;
    chunks
        .insert(AudioChunk {
            conversation_id,
            chunk_index: index,
            start_time: buffer.start_time,
            end_time: buffer.start_time + duration,
            duration,
            sample_rate: buffer.sample_rate,
            channels: buffer.channels,
            sample_width: buffer.sample_width,
            audio_data: encoded,
        })
        .await?;
    Ok(())
}

/// Run the persistence worker until the `END` sentinel arrives, the audio
/// stream disappears, or `cancel` fires. The 24h timeout is enforced by
/// the caller wrapping this future, matching the queue backend's own
/// hard-kill-after-timeout model.
pub async fn run_persistence_worker(
    config: PersistenceWorkerConfig,
    audio_stream: Arc<dyn AudioStream>,
    kv: Arc<dyn KeyValueStore>,
    sessions: Arc<dyn SessionStore>,
    conversations: Arc<dyn ConversationRepository>,
    chunks: Arc<dyn ChunkRepository>,
    cancel: CancellationToken,
) -> Result<()> {
    let session = match sessions.get(&config.session_id).await {
        Ok(session) => session,
        Err(_) => {
            tracing::warn!(session_id = %config.session_id, "persistence worker: session gone at start");
            return Ok(());
        }
    };

    if session.always_persist {
        ensure_placeholder(
            kv.as_ref(),
            conversations.as_ref(),
            &config.session_id,
            &session.user_id,
            &config.client_id,
        )
        .await?;
    }

    let mut consumer = match audio_stream
        .open_consumer_group(&config.client_id, "persistence")
        .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            tracing::warn!(client_id = %config.client_id, %err, "persistence worker: could not open consumer group");
            return Ok(());
        }
    };

    let mut current_conversation: Option<Uuid> = None;
    let mut buffer: Option<PcmBuffer> = None;
    let mut elapsed = 0.0f64;

    loop {
        if cancel.is_cancelled() {
            tracing::info!(session_id = %config.session_id, "persistence worker cancelled");
            break;
        }

        let entry = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            entry = consumer.read_next() => entry,
        };

        let Some(entry) = entry.ok().flatten() else {
            tracing::info!(session_id = %config.session_id, "persistence worker: audio stream gone, exiting");
            break;
        };

        if entry.is_end() {
            if let Some(buf) = buffer.take() {
                if let Some(conversation_id) = resolve_conversation(
                    kv.as_ref(),
                    &config.session_id,
                    &mut current_conversation,
                )
                .await
                {
                    flush(buf, conversation_id, chunks.as_ref()).await?;
                }
            }
            let _ = consumer.ack(&entry.chunk_id).await;
            tracing::info!(session_id = %config.session_id, "persistence worker: end sentinel received");
            break;
        }

        let conversation_id = resolve_conversation(
            kv.as_ref(),
            &config.session_id,
            &mut current_conversation,
        )
        .await;

        if buffer.is_none() {
            buffer = Some(PcmBuffer::new(
                entry.sample_rate,
                entry.channels,
                entry.sample_width,
                elapsed,
            ));
        }
        if let Some(buf) = buffer.as_mut() {
            buf.push_bytes(&entry.audio);
            if buf.duration_seconds() >= config.chunk_duration.as_secs_f64() {
                elapsed += buf.duration_seconds();
                let full = buffer.take().unwrap();
                if let Some(conversation_id) = conversation_id {
                    flush(full, conversation_id, chunks.as_ref()).await?;
                }
            }
        }

        let _ = consumer.ack(&entry.chunk_id).await;
    }

    Ok(())
}

/// Read `conversation:current:<session_id>` fresh before every flush —
/// the worker never picks the conversation id itself, it reads this key
/// whenever it is about to write a chunk. `current` is cached only to
/// detect a rotation for logging.
async fn resolve_conversation(
    kv: &dyn KeyValueStore,
    session_id: &str,
    current: &mut Option<Uuid>,
) -> Option<Uuid> {
    let raw = kv.get(&conversation_current_key(session_id)).await.ok().flatten()?;
    let id = Uuid::parse_str(&raw).ok()?;
    if *current != Some(id) {
        tracing::debug!(session_id, conversation_id = %id, "persistence worker: conversation rotated");
        *current = Some(id);
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverb_fabric::{AudioEntry, InMemoryAudioStream};
    use reverb_models::{AudioFormat, RecordingMode, Session};
    use reverb_session::InMemoryKeyValueStore;
    use reverb_session::InMemorySessionStore;

    use crate::{InMemoryChunkRepository, InMemoryConversationRepository};

    #[tokio::test]
    async fn flushes_one_chunk_per_configured_duration() {
        let audio_stream = InMemoryAudioStream::new();
        let kv = InMemoryKeyValueStore::new();
        let sessions = InMemorySessionStore::new();
        let conversations = InMemoryConversationRepository::new();
        let chunks = InMemoryChunkRepository::new();

        let session = Session::new(
            "client-1",
            "user-1",
            "user@example.com",
            AudioFormat::default(),
            RecordingMode::Streaming,
            "deepgram",
            "conn-1",
        );
        sessions.create(session).await.unwrap();

        let conversation = Conversation::new_recording("user-1", "client-1");
        let conversation_id = conversation.conversation_id;
        conversations.create(conversation).await.unwrap();
        kv.set(
            "conversation:current:client-1",
            conversation_id.to_string(),
            None,
        )
        .await
        .unwrap();

        let mut config = PersistenceWorkerConfig::new("client-1", "client-1");
        config.chunk_duration = Duration::from_millis(20); // one opus frame

        let pcm: Vec<u8> = vec![0u8; 640]; // 320 i16 samples == 20ms @ 16kHz mono
        audio_stream
            .publish(
                "client-1",
                AudioEntry {
                    session_id: "client-1".into(),
                    chunk_id: "00000".into(),
                    audio: pcm,
                    sample_rate: 16_000,
                    channels: 1,
                    sample_width: 2,
                    user_id: "user-1".into(),
                    client_id: "client-1".into(),
                },
            )
            .await
            .unwrap();
        audio_stream
            .publish_end("client-1", "client-1", "user-1")
            .await
            .unwrap();

        run_persistence_worker(
            config,
            audio_stream,
            kv,
            sessions,
            conversations,
            chunks.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let stored = chunks.list_for_conversation(conversation_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].chunk_index, 0);
    }
}
