use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{rate, width, channels}` of the audio a session is streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub sample_width: u8,
    pub channels: u8,
}

impl Default for AudioFormat {
    /// The legacy-binary default: 16 kHz, 16-bit, mono.
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            sample_width: 2,
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    Streaming,
    Batch,
}

/// One-way lifecycle: `Active -> Finalizing -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Finalizing,
    Finished,
}

impl SessionStatus {
    /// True if `next` is a legal one-way transition from `self`.
    ///
    /// `Active -> Active`, `Finalizing -> Finalizing`, and
    /// `Finished -> Finished` are all treated as legal no-ops so repeated,
    /// at-least-once writers don't need to special-case idempotent retries.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Active, Active)
                | (Active, Finalizing)
                | (Active, Finished)
                | (Finalizing, Finalizing)
                | (Finalizing, Finished)
                | (Finished, Finished)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    UserStopped,
    WebsocketDisconnect,
    AllJobsComplete,
}

/// A device event (button press, etc.) recorded against a session and
/// later attached to whichever conversation is open when it arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Marker {
    pub state: String,
    pub timestamp: DateTime<Utc>,
    pub audio_uuid: Option<String>,
}

/// A live recording connection. `session_id == client_id` by construction
/// so lookups never need a secondary index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub client_id: String,
    pub user_id: String,
    pub user_email: String,
    pub audio_format: AudioFormat,
    pub mode: RecordingMode,
    pub provider: String,
    pub status: SessionStatus,
    pub completion_reason: Option<CompletionReason>,
    pub websocket_connected: bool,
    pub chunks_published: u64,
    pub connection_id: String,
    pub speech_detection_job_id: Option<String>,
    pub persistence_job_id: Option<String>,
    pub transcription_error: Option<String>,
    pub conversation_close_requested: Option<String>,
    pub markers: Vec<Marker>,
    pub always_persist: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        client_id: impl Into<String>,
        user_id: impl Into<String>,
        user_email: impl Into<String>,
        audio_format: AudioFormat,
        mode: RecordingMode,
        provider: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        let client_id = client_id.into();
        let now = Utc::now();
        Self {
            session_id: client_id.clone(),
            client_id,
            user_id: user_id.into(),
            user_email: user_email.into(),
            audio_format,
            mode,
            provider: provider.into(),
            status: SessionStatus::Active,
            completion_reason: None,
            websocket_connected: true,
            chunks_published: 0,
            connection_id: connection_id.into(),
            speech_detection_job_id: None,
            persistence_job_id: None,
            transcription_error: None,
            conversation_close_requested: None,
            markers: Vec::new(),
            always_persist: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Monotonic: never decreases, regardless of caller.
    pub fn increment_chunks_published(&mut self, by: u64) {
        self.chunks_published = self.chunks_published.saturating_add(by);
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, next: SessionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    pub fn drain_markers(&mut self) -> Vec<Marker> {
        std::mem::take(&mut self.markers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_transitions_backwards_out_of_finished() {
        let status = SessionStatus::Finished;
        assert!(!status.can_transition_to(SessionStatus::Active));
        assert!(!status.can_transition_to(SessionStatus::Finalizing));
        assert!(status.can_transition_to(SessionStatus::Finished));
    }

    #[test]
    fn status_moves_forward_one_way() {
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Finalizing));
        assert!(SessionStatus::Finalizing.can_transition_to(SessionStatus::Finished));
        assert!(!SessionStatus::Finalizing.can_transition_to(SessionStatus::Active));
    }

    #[test]
    fn chunks_published_is_monotonic() {
        let mut session = Session::new(
            "client-1",
            "user-1",
            "user@example.com",
            AudioFormat::default(),
            RecordingMode::Streaming,
            "deepgram",
            "conn-1",
        );
        session.increment_chunks_published(3);
        session.increment_chunks_published(2);
        assert_eq!(session.chunks_published, 5);
    }
}
