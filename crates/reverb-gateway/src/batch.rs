//! Batch-mode accumulation and rolling flush. In batch mode the gateway buffers PCM itself rather than streaming it
//! through the audio fabric — there is no Speech-Detection/Conversation
//! Monitor pass over a batch recording, so the gateway drives the
//! post-conversation chain directly at each flush.

use std::sync::Arc;

use reverb_config::limits;
use reverb_jobs::JobQueue;
use reverb_models::{AudioChunk, Conversation, ProcessingStatus};
use reverb_persistence::{opus_codec, ChunkRepository, ConversationRepository};

use crate::error::Result;

/// Accumulates raw PCM for one batch-mode connection between rolling
/// flushes.
pub struct BatchBuffer {
    user_id: String,
    client_id: String,
    sample_rate: u32,
    channels: u8,
    sample_width: u8,
    samples: Vec<i16>,
    part_number: u32,
}

impl BatchBuffer {
    pub fn new(user_id: impl Into<String>, client_id: impl Into<String>, sample_rate: u32, channels: u8, sample_width: u8) -> Self {
        Self {
            user_id: user_id.into(),
            client_id: client_id.into(),
            sample_rate,
            channels,
            sample_width,
            samples: Vec::new(),
            part_number: 0,
        }
    }

    pub fn push(&mut self, pcm: &[u8]) {
        self.samples.extend(
            pcm.chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );
    }

    fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.channels.max(1) as f64 / self.sample_rate as f64
    }

    /// Flush once accumulated duration reaches 30 minutes.
    pub fn should_flush(&self) -> bool {
        self.duration_seconds() >= limits::BATCH_ROLLING_FLUSH.as_secs_f64()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Create `Recording Part N`, persist the buffered PCM as a single
    /// chunk, enqueue batch transcription plus the full post-processing
    /// chain, and reset the buffer to keep accumulating.
    pub async fn flush(
        &mut self,
        conversations: &Arc<dyn ConversationRepository>,
        chunks: &Arc<dyn ChunkRepository>,
        jobs: &Arc<dyn JobQueue>,
    ) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        self.part_number += 1;
        let duration = self.duration_seconds();

        let mut conversation = Conversation::new_recording(&self.user_id, &self.client_id);
        conversation.title = format!("Recording Part {}", self.part_number);
        conversation.processing_status = ProcessingStatus::BatchTranscription;
        let conversation_id = conversation.conversation_id;
        conversations.create(conversation).await?;

        let encoded = opus_codec::encode_opus_frame(&self.samples, self.sample_rate, self.channels)?;
        chunks
            .insert(AudioChunk {
                conversation_id,
                chunk_index: 0,
                start_time: 0.0,
                end_time: duration,
                duration,
                sample_rate: self.sample_rate,
                channels: self.channels,
                sample_width: self.sample_width,
                audio_data: encoded,
            })
            .await?;

        // `always_batch_retranscribe = true`: the chain's own
        // `batch_retranscribe` stage *is* the batch transcription job,
        // so enqueuing the chain once here covers both batch
        // transcription and the post-processing chain.
        reverb_postchain::enqueue_post_conversation_chain(jobs.as_ref(), conversation_id, true).await?;

        self.samples.clear();
        tracing::info!(
            client_id = %self.client_id,
            conversation_id = %conversation_id,
            part = self.part_number,
            "batch rolling flush"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverb_jobs::InMemoryJobQueue;
    use reverb_persistence::{InMemoryChunkRepository, InMemoryConversationRepository};

    #[tokio::test]
    async fn flush_creates_numbered_conversation_and_enqueues_chain() {
        let conversations_concrete = InMemoryConversationRepository::new();
        let conversations: Arc<dyn ConversationRepository> = conversations_concrete.clone();
        let chunks: Arc<dyn ChunkRepository> = InMemoryChunkRepository::new();
        let jobs: Arc<dyn JobQueue> = InMemoryJobQueue::new();

        let mut buffer = BatchBuffer::new("user-1", "client-1", 16_000, 1, 2);
        buffer.push(&vec![0u8; 640]);
        assert!(!buffer.should_flush());

        buffer.flush(&conversations, &chunks, &jobs).await.unwrap();
        buffer.push(&vec![0u8; 640]);
        buffer.flush(&conversations, &chunks, &jobs).await.unwrap();

        let all = conversations_concrete.list_all().await;
        assert_eq!(all.len(), 2);
        let mut titles: Vec<_> = all.iter().map(|c| c.title.clone()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Recording Part 1", "Recording Part 2"]);
    }
}
