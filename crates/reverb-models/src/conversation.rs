use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::Marker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    PendingTranscription,
    BatchTranscription,
    Reprocessing,
    Completed,
    TranscriptionFailed,
}

/// Priority order for determining why a conversation closed; variant
/// order is the fixed priority list so a simple `min` over a
/// `Vec<EndReason>` (if several signals fired the same tick) picks
/// correctly as long as callers push candidates in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    WebsocketDisconnect,
    CloseRequested,
    InactivityTimeout,
    MaxDuration,
    UserStopped,
    AudioChunksNotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiarizationSource {
    Provider,
    SpeakerService,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f32,
    pub speaker: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Speech,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub speaker: String,
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
}

impl Segment {
    /// Normalizes the speaker field: empty/absent becomes `SPEAKER_00`;
    /// a bare number becomes `Speaker N`.
    pub fn normalize_speaker(raw: Option<&str>) -> String {
        match raw.map(str::trim) {
            None => "SPEAKER_00".to_string(),
            Some("") => "SPEAKER_00".to_string(),
            Some(s) => {
                if let Ok(n) = s.parse::<i64>() {
                    format!("Speaker {n}")
                } else {
                    s.to_string()
                }
            }
        }
    }
}

/// One transcript produced for a conversation; a conversation may have
/// several (streaming first, batch re-transcription later) but only one
/// is `active` at a time via `Conversation::active_transcript_version_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptVersion {
    pub version_id: String,
    pub transcript: String,
    pub words: Vec<Word>,
    pub segments: Vec<Segment>,
    pub provider: String,
    pub model: String,
    pub diarization_source: Option<DiarizationSource>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TranscriptVersion {
    /// Invariant: if `segments` is empty, `words` must be non-empty.
    pub fn is_well_formed(&self) -> bool {
        !self.segments.is_empty() || !self.words.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: Uuid,
    pub user_id: String,
    pub client_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub detailed_summary: Option<String>,
    pub transcript_versions: Vec<TranscriptVersion>,
    pub active_transcript_version_id: Option<String>,
    pub audio_chunks_count: u64,
    pub audio_total_duration: f64,
    pub processing_status: ProcessingStatus,
    pub always_persist: bool,
    pub end_reason: Option<EndReason>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub markers: Vec<Marker>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_reason: Option<String>,
    pub starred: bool,
    pub speakers_identified: Vec<String>,
}

impl Conversation {
    pub fn new_recording(user_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            conversation_id: Uuid::new_v4(),
            user_id: user_id.into(),
            client_id: client_id.into(),
            title: "Recording…".to_string(),
            summary: None,
            detailed_summary: None,
            transcript_versions: Vec::new(),
            active_transcript_version_id: None,
            audio_chunks_count: 0,
            audio_total_duration: 0.0,
            processing_status: ProcessingStatus::PendingTranscription,
            always_persist: false,
            end_reason: None,
            created_at: Utc::now(),
            completed_at: None,
            markers: Vec::new(),
            deleted: false,
            deleted_at: None,
            deleted_reason: None,
            starred: false,
            speakers_identified: Vec::new(),
        }
    }

    /// Add a transcript version and make it active, enforcing the
    /// invariant that `active_transcript_version_id` always references an
    /// element of `transcript_versions`.
    pub fn set_active_transcript(&mut self, version: TranscriptVersion) {
        self.active_transcript_version_id = Some(version.version_id.clone());
        self.transcript_versions.push(version);
    }

    pub fn active_transcript(&self) -> Option<&TranscriptVersion> {
        let id = self.active_transcript_version_id.as_ref()?;
        self.transcript_versions.iter().find(|v| &v.version_id == id)
    }

    pub fn soft_delete(&mut self, reason: impl Into<String>) {
        self.deleted = true;
        self.deleted_at = Some(Utc::now());
        self.deleted_reason = Some(reason.into());
    }

    pub fn close(&mut self, reason: EndReason) {
        self.end_reason = Some(reason);
        self.completed_at = Some(Utc::now());
    }
}
