//! `speaker_recognition` stage: reconstructs WAV audio from stored
//! chunks, windows it when long, calls out to a speaker-recognition
//! service per window, and folds the results back into the
//! conversation's active transcript.

use std::sync::Arc;

use async_trait::async_trait;
use reverb_config::limits;
use reverb_models::{Segment, SegmentType};
use reverb_persistence::{reconstruct_wav, ChunkRepository, ConversationRepository};
use uuid::Uuid;

use crate::speaker_merge::{merge_overlapping_speaker_segments, split_into_windows, SpeakerSegment};
use crate::{ChainError, Result};

/// `connection_failed`/`timeout`/`client_error` must propagate so the
/// job fails and cascades cancellation to dependants; a
/// `processing_error` on one window is swallowed and treated as that
/// window contributing no segments.
#[derive(Debug, thiserror::Error)]
pub enum SpeakerServiceError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("timed out")]
    Timeout,
    #[error("client error: {0}")]
    ClientError(String),
    #[error("processing error: {0}")]
    ProcessingError(String),
}

impl SpeakerServiceError {
    fn is_recoverable_per_window(&self) -> bool {
        matches!(self, SpeakerServiceError::ProcessingError(_))
    }
}

#[async_trait]
pub trait SpeakerRecognitionService: Send + Sync {
    /// `wav_bytes` covers one window (or the whole recording, for short
    /// audio); segment times are relative to the start of that window.
    async fn identify_speakers(
        &self,
        wav_bytes: &[u8],
    ) -> std::result::Result<Vec<SpeakerSegment>, SpeakerServiceError>;
}

/// Chunks overlapping `[window_start, window_end)`, by audio time, in
/// `chunk_index` order — the slice `reconstruct_wav` needs to build one
/// window's worth of audio without re-decoding the whole recording.
fn chunks_in_window(
    chunks: &[reverb_models::AudioChunk],
    window_start: f64,
    window_end: f64,
) -> Vec<reverb_models::AudioChunk> {
    chunks
        .iter()
        .filter(|c| c.start_time < window_end && c.end_time > window_start)
        .cloned()
        .collect()
}

pub async fn run_speaker_recognition(
    conversation_id: Uuid,
    chunks: &dyn ChunkRepository,
    conversations: &dyn ConversationRepository,
    service: Arc<dyn SpeakerRecognitionService>,
) -> Result<()> {
    let all_chunks = chunks.list_for_conversation(conversation_id).await?;
    if all_chunks.is_empty() {
        tracing::info!(%conversation_id, "speaker recognition: no audio chunks, skipping");
        return Ok(());
    }
    let total_duration = all_chunks.last().map(|c| c.end_time).unwrap_or(0.0);

    let windows = split_into_windows(
        total_duration,
        limits::SPEAKER_WINDOW_SEGMENT.as_secs_f64(),
        limits::SPEAKER_WINDOW_OVERLAP.as_secs_f64(),
    );
    let windowed = total_duration > limits::SPEAKER_LONG_AUDIO_THRESHOLD.as_secs_f64();

    let mut all_segments = Vec::new();
    for (window_start, window_end) in windows {
        let window_chunks = if windowed {
            chunks_in_window(&all_chunks, window_start, window_end)
        } else {
            all_chunks.clone()
        };
        if window_chunks.is_empty() {
            continue;
        }
        let wav = reconstruct_wav(&window_chunks)?;

        match service.identify_speakers(&wav).await {
            Ok(segments) => {
                for mut segment in segments {
                    segment.start += window_start;
                    segment.end += window_start;
                    all_segments.push(segment);
                }
            }
            Err(err) if err.is_recoverable_per_window() => {
                tracing::warn!(%conversation_id, window_start, %err, "speaker recognition: window processing error, skipping window");
            }
            Err(err) => {
                return Err(ChainError::SpeakerService(err.to_string()));
            }
        }
    }

    if all_segments.is_empty() {
        tracing::info!(%conversation_id, "speaker recognition: empty result, leaving transcript unchanged");
        return Ok(());
    }

    let merged = merge_overlapping_speaker_segments(all_segments);
    let segments: Vec<Segment> = merged
        .iter()
        .map(|s| Segment {
            start: s.start,
            end: s.end,
            text: s.text.clone(),
            speaker: Segment::normalize_speaker(Some(&s.speaker)),
            segment_type: SegmentType::Speech,
        })
        .collect();
    let mut speakers: Vec<String> = segments.iter().map(|s| s.speaker.clone()).collect();
    speakers.sort();
    speakers.dedup();

    conversations
        .mutate(
            conversation_id,
            Box::new(move |conversation| {
                if let Some(version) = conversation
                    .active_transcript_version_id
                    .clone()
                    .and_then(|id| {
                        conversation
                            .transcript_versions
                            .iter_mut()
                            .find(|v| v.version_id == id)
                    })
                {
                    version.segments = segments.clone();
                    version.diarization_source = Some(reverb_models::DiarizationSource::SpeakerService);
                }
                conversation.speakers_identified = speakers.clone();
            }),
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reverb_models::{Conversation, DiarizationSource, TranscriptVersion};
    use reverb_persistence::{InMemoryChunkRepository, InMemoryConversationRepository};

    struct StubService {
        segments: Vec<SpeakerSegment>,
    }

    #[async_trait]
    impl SpeakerRecognitionService for StubService {
        async fn identify_speakers(
            &self,
            _wav_bytes: &[u8],
        ) -> std::result::Result<Vec<SpeakerSegment>, SpeakerServiceError> {
            Ok(self.segments.clone())
        }
    }

    struct FailingService;

    #[async_trait]
    impl SpeakerRecognitionService for FailingService {
        async fn identify_speakers(
            &self,
            _wav_bytes: &[u8],
        ) -> std::result::Result<Vec<SpeakerSegment>, SpeakerServiceError> {
            Err(SpeakerServiceError::Timeout)
        }
    }

    fn chunk(conversation_id: Uuid, index: u64, start: f64, end: f64) -> reverb_models::AudioChunk {
        reverb_models::AudioChunk {
            conversation_id,
            chunk_index: index,
            start_time: start,
            end_time: end,
            duration: end - start,
            sample_rate: 16_000,
            channels: 1,
            sample_width: 2,
            audio_data: crate::test_support::silent_opus_frame(),
        }
    }

    async fn setup_conversation() -> (Uuid, InMemoryChunkRepository, InMemoryConversationRepository) {
        let chunks = InMemoryChunkRepository::new();
        let conversations = InMemoryConversationRepository::new();
        let mut conversation = Conversation::new_recording("user-1", "client-1");
        let id = conversation.conversation_id;
        conversation.set_active_transcript(TranscriptVersion {
            version_id: "streaming_abc".into(),
            transcript: "hello world".into(),
            words: vec![],
            segments: vec![],
            provider: "mock".into(),
            model: "mock".into(),
            diarization_source: Some(DiarizationSource::Provider),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        });
        conversations.create(conversation).await.unwrap();
        chunks.insert(chunk(id, 0, 0.0, 1.0)).await.unwrap();
        (id, chunks, conversations)
    }

    #[tokio::test]
    async fn identifies_speakers_and_updates_active_transcript() {
        let (id, chunks, conversations) = setup_conversation().await;
        let service = Arc::new(StubService {
            segments: vec![SpeakerSegment {
                start: 0.0,
                end: 1.0,
                text: "hello world".into(),
                speaker: "1".into(),
                confidence: 0.9,
            }],
        });

        run_speaker_recognition(id, chunks.as_ref(), conversations.as_ref(), service)
            .await
            .unwrap();

        let conversation = conversations.get(id).await.unwrap();
        let version = conversation.active_transcript().unwrap();
        assert_eq!(version.segments.len(), 1);
        assert_eq!(version.segments[0].speaker, "Speaker 1");
        assert_eq!(conversation.speakers_identified, vec!["Speaker 1".to_string()]);
    }

    #[tokio::test]
    async fn timeout_propagates_as_an_error() {
        let (id, chunks, conversations) = setup_conversation().await;
        let err = run_speaker_recognition(id, chunks.as_ref(), conversations.as_ref(), Arc::new(FailingService))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::SpeakerService(_)));
    }

    #[test]
    fn windows_in_range_pick_only_overlapping_chunks() {
        let id = Uuid::new_v4();
        let chunks = vec![chunk(id, 0, 0.0, 10.0), chunk(id, 1, 10.0, 20.0), chunk(id, 2, 20.0, 30.0)];
        let windowed = chunks_in_window(&chunks, 15.0, 25.0);
        assert_eq!(windowed.len(), 2);
        assert_eq!(windowed[0].chunk_index, 1);
        assert_eq!(windowed[1].chunk_index, 2);
    }
}
