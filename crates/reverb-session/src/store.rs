use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use reverb_models::{CompletionReason, Marker, Session, SessionStatus};

use crate::{Result, SessionError};

/// Session CRUD plus the atomic per-field operations callers need without
/// racing each other: status transitions, monotonic counters, and
/// one-time marker drains. Every write is safe to repeat, because they
/// are all either idempotent (`set_status` is a no-op once already at
/// `next`) or naturally monotonic (`increment_chunks_published`).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session) -> Result<()>;
    async fn get(&self, session_id: &str) -> Result<Session>;
    async fn try_get(&self, session_id: &str) -> Result<Option<Session>>;

    /// Atomic field set: `status`. Returns `Ok(false)` (not an error) when
    /// the transition is illegal, so at-least-once callers can treat a
    /// failed transition as "already handled" rather than crash.
    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<bool>;

    async fn set_completion_reason(
        &self,
        session_id: &str,
        reason: CompletionReason,
    ) -> Result<()>;

    async fn set_websocket_connected(&self, session_id: &str, connected: bool) -> Result<()>;

    /// Atomic increment; never decreases.
    async fn increment_chunks_published(&self, session_id: &str, by: u64) -> Result<u64>;

    async fn set_transcription_error(&self, session_id: &str, message: String) -> Result<()>;

    /// "Set field if unset": used for `conversation_close_requested` so a
    /// second close request (plugin + device button in the same tick)
    /// doesn't overwrite the first reason.
    async fn request_conversation_close_if_unset(
        &self,
        session_id: &str,
        reason: String,
    ) -> Result<bool>;

    /// Clears and returns the close-request reason, if any. Consumed
    /// defensively on each tick so a stale request never lingers.
    async fn take_conversation_close_request(&self, session_id: &str) -> Result<Option<String>>;

    async fn append_marker(&self, session_id: &str, marker: Marker) -> Result<()>;

    /// Drains and returns all markers, clearing them from the session.
    async fn drain_markers(&self, session_id: &str) -> Result<Vec<Marker>>;

    async fn set_speech_detection_job_id(
        &self,
        session_id: &str,
        job_id: Option<String>,
    ) -> Result<()>;

    async fn set_persistence_job_id(&self, session_id: &str, job_id: Option<String>) -> Result<()>;

    /// Apply a 1h TTL once a conversation ends.
    async fn expire_after(&self, session_id: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, session_id: &str) -> Result<()>;

    /// The one exception to the one-way `Active -> Finalizing -> Finished`
    /// lifecycle: race recovery un-finishes a session whose
    /// `Finished`/`AllJobsComplete` transition turned out to be spurious
    /// (the client is still connected, just between conversations),
    /// clearing `completion_reason` so the next tick doesn't re-trigger
    /// the same recovery.
    async fn reopen_for_next_conversation(&self, session_id: &str) -> Result<()>;
}

#[derive(Clone)]
struct Entry {
    session: Session,
    expires_at: Option<std::time::Instant>,
}

/// Default in-memory backend. A single `DashMap` keyed by `session_id`
/// gives per-key locking without a global mutex, suiting the many
/// writers/many readers access pattern without explicit locking.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Entry>,
}

impl InMemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn not_expired(entry: &Entry) -> bool {
        match entry.expires_at {
            Some(at) => std::time::Instant::now() < at,
            None => true,
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: Session) -> Result<()> {
        self.sessions.insert(
            session.session_id.clone(),
            Entry {
                session,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Session> {
        self.try_get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    async fn try_get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .get(session_id)
            .filter(|e| Self::not_expired(e))
            .map(|e| e.session.clone()))
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<bool> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(entry.session.set_status(status))
    }

    async fn set_completion_reason(
        &self,
        session_id: &str,
        reason: CompletionReason,
    ) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.session.completion_reason = Some(reason);
        Ok(())
    }

    async fn set_websocket_connected(&self, session_id: &str, connected: bool) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.session.websocket_connected = connected;
        Ok(())
    }

    async fn increment_chunks_published(&self, session_id: &str, by: u64) -> Result<u64> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.session.increment_chunks_published(by);
        Ok(entry.session.chunks_published)
    }

    async fn set_transcription_error(&self, session_id: &str, message: String) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.session.transcription_error = Some(message);
        Ok(())
    }

    async fn request_conversation_close_if_unset(
        &self,
        session_id: &str,
        reason: String,
    ) -> Result<bool> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if entry.session.conversation_close_requested.is_some() {
            return Ok(false);
        }
        entry.session.conversation_close_requested = Some(reason);
        Ok(true)
    }

    async fn take_conversation_close_request(&self, session_id: &str) -> Result<Option<String>> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(entry.session.conversation_close_requested.take())
    }

    async fn append_marker(&self, session_id: &str, marker: Marker) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.session.markers.push(marker);
        Ok(())
    }

    async fn drain_markers(&self, session_id: &str) -> Result<Vec<Marker>> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(entry.session.drain_markers())
    }

    async fn set_speech_detection_job_id(
        &self,
        session_id: &str,
        job_id: Option<String>,
    ) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.session.speech_detection_job_id = job_id;
        Ok(())
    }

    async fn set_persistence_job_id(&self, session_id: &str, job_id: Option<String>) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.session.persistence_job_id = job_id;
        Ok(())
    }

    async fn expire_after(&self, session_id: &str, ttl: Duration) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.expires_at = Some(std::time::Instant::now() + ttl);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.remove(session_id);
        Ok(())
    }

    async fn reopen_for_next_conversation(&self, session_id: &str) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        entry.session.status = SessionStatus::Active;
        entry.session.completion_reason = None;
        entry.session.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverb_models::{AudioFormat, RecordingMode};

    fn sample_session(id: &str) -> Session {
        Session::new(
            id,
            "user-1",
            "user@example.com",
            AudioFormat::default(),
            RecordingMode::Streaming,
            "deepgram",
            "conn-1",
        )
    }

    #[tokio::test]
    async fn unknown_session_reads_as_not_found() {
        let store = InMemorySessionStore::new();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn status_transitions_are_one_way() {
        let store = InMemorySessionStore::new();
        store.create(sample_session("s1")).await.unwrap();

        assert!(store
            .set_status("s1", SessionStatus::Finalizing)
            .await
            .unwrap());
        assert!(store
            .set_status("s1", SessionStatus::Finished)
            .await
            .unwrap());
        assert!(!store
            .set_status("s1", SessionStatus::Active)
            .await
            .unwrap());

        let session = store.get("s1").await.unwrap();
        assert_eq!(session.status, SessionStatus::Finished);
    }

    #[tokio::test]
    async fn close_request_is_set_once() {
        let store = InMemorySessionStore::new();
        store.create(sample_session("s1")).await.unwrap();

        assert!(store
            .request_conversation_close_if_unset("s1", "plugin".into())
            .await
            .unwrap());
        assert!(!store
            .request_conversation_close_if_unset("s1", "button".into())
            .await
            .unwrap());

        let reason = store.take_conversation_close_request("s1").await.unwrap();
        assert_eq!(reason.as_deref(), Some("plugin"));

        // Second take returns None: the flag is consumed, not sticky.
        let reason = store.take_conversation_close_request("s1").await.unwrap();
        assert_eq!(reason, None);
    }

    #[tokio::test]
    async fn chunks_published_counter_is_monotonic_across_writers() {
        let store = InMemorySessionStore::new();
        store.create(sample_session("s1")).await.unwrap();

        store.increment_chunks_published("s1", 5).await.unwrap();
        let total = store.increment_chunks_published("s1", 3).await.unwrap();
        assert_eq!(total, 8);
    }
}
