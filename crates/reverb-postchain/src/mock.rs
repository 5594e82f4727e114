//! No-op/deterministic stand-ins for the three external services this
//! chain depends on (memory/title-summary LLM, speaker recognition) —
//! the same role `reverb_transcribe::MockStreamingStt` plays for the
//! STT vendor. Good enough to run the chain end-to-end with no external
//! network dependency configured; never meant to produce real output.

use async_trait::async_trait;

use crate::speaker_merge::SpeakerSegment;
use crate::speaker_recognition::{SpeakerRecognitionService, SpeakerServiceError};
use crate::{MemoryExtractor, TitleSummarizer};

/// Extracts nothing; records that it ran. A real implementation calls
/// out to the LLM memory-extraction service.
pub struct NoopMemoryExtractor;

#[async_trait]
impl MemoryExtractor for NoopMemoryExtractor {
    async fn extract(&self, _transcript: &str) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!([]))
    }
}

/// Derives a deterministic title/summary from the transcript's first
/// words, so a conversation always reaches `processing_status=completed`
/// even with no LLM configured.
pub struct EchoTitleSummarizer;

#[async_trait]
impl TitleSummarizer for EchoTitleSummarizer {
    async fn summarize(
        &self,
        transcript: &str,
        _segments: &[reverb_models::Segment],
        _memory_context: Option<&serde_json::Value>,
    ) -> anyhow::Result<crate::TitleSummary> {
        let words: Vec<&str> = transcript.split_whitespace().take(6).collect();
        let title = if words.is_empty() {
            "Untitled conversation".to_string()
        } else {
            words.join(" ")
        };
        Ok(crate::TitleSummary {
            title,
            summary: transcript.chars().take(200).collect(),
            detailed_summary: transcript.to_string(),
        })
    }
}

/// Returns no speaker segments for every window — conservative default
/// that leaves a conversation's transcript unchanged rather than
/// fabricating speaker labels.
pub struct NoopSpeakerRecognitionService;

#[async_trait]
impl SpeakerRecognitionService for NoopSpeakerRecognitionService {
    async fn identify_speakers(
        &self,
        _wav_bytes: &[u8],
    ) -> std::result::Result<Vec<SpeakerSegment>, SpeakerServiceError> {
        Ok(Vec::new())
    }
}
