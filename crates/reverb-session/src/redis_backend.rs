//! Redis-backed implementations of [`crate::SessionStore`] and
//! [`crate::KeyValueStore`]: one hash per session at
//! `audio:session:<session_id>`, plain string/counter keys for
//! everything else.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use reverb_models::{CompletionReason, Marker, Session, SessionStatus};

use crate::{KeyValueStore, Result, SessionError, SessionStore};

fn session_key(session_id: &str) -> String {
    format!("audio:session:{session_id}")
}

fn backend_err(err: redis::RedisError) -> SessionError {
    SessionError::Backend(err.to_string())
}

pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(backend_err)?;
        let conn = client.get_connection_manager().await.map_err(backend_err)?;
        Ok(Self { conn })
    }

    async fn read_session(&self, session_id: &str) -> Result<Option<Session>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .hget(session_key(session_id), "data")
            .await
            .map_err(backend_err)?;
        match raw {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).map_err(|e| SessionError::Backend(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn write_session(&self, session: &Session) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(session).map_err(|e| SessionError::Backend(e.to_string()))?;
        let _: () = conn
            .hset(session_key(&session.session_id), "data", json)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    /// Read-modify-write under the key-ownership convention: each field
    /// is owned by exactly one writer, so a plain HGET/mutate/HSET round
    /// trip is safe without `WATCH`/`MULTI`.
    async fn mutate<F>(&self, session_id: &str, f: F) -> Result<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut session = self
            .read_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        f(&mut session);
        self.write_session(&session).await?;
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, session: Session) -> Result<()> {
        self.write_session(&session).await
    }

    async fn get(&self, session_id: &str) -> Result<Session> {
        self.read_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    async fn try_get(&self, session_id: &str) -> Result<Option<Session>> {
        self.read_session(session_id).await
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<bool> {
        let mut transitioned = false;
        self.mutate(session_id, |s| transitioned = s.set_status(status))
            .await?;
        Ok(transitioned)
    }

    async fn set_completion_reason(
        &self,
        session_id: &str,
        reason: CompletionReason,
    ) -> Result<()> {
        self.mutate(session_id, |s| s.completion_reason = Some(reason))
            .await?;
        Ok(())
    }

    async fn set_websocket_connected(&self, session_id: &str, connected: bool) -> Result<()> {
        self.mutate(session_id, |s| s.websocket_connected = connected)
            .await?;
        Ok(())
    }

    async fn increment_chunks_published(&self, session_id: &str, by: u64) -> Result<u64> {
        let session = self
            .mutate(session_id, |s| s.increment_chunks_published(by))
            .await?;
        Ok(session.chunks_published)
    }

    async fn set_transcription_error(&self, session_id: &str, message: String) -> Result<()> {
        self.mutate(session_id, |s| s.transcription_error = Some(message))
            .await?;
        Ok(())
    }

    async fn request_conversation_close_if_unset(
        &self,
        session_id: &str,
        reason: String,
    ) -> Result<bool> {
        let mut set = false;
        self.mutate(session_id, |s| {
            if s.conversation_close_requested.is_none() {
                s.conversation_close_requested = Some(reason);
                set = true;
            }
        })
        .await?;
        Ok(set)
    }

    async fn take_conversation_close_request(&self, session_id: &str) -> Result<Option<String>> {
        let mut taken = None;
        self.mutate(session_id, |s| taken = s.conversation_close_requested.take())
            .await?;
        Ok(taken)
    }

    async fn append_marker(&self, session_id: &str, marker: Marker) -> Result<()> {
        self.mutate(session_id, |s| s.markers.push(marker)).await?;
        Ok(())
    }

    async fn drain_markers(&self, session_id: &str) -> Result<Vec<Marker>> {
        let mut drained = Vec::new();
        self.mutate(session_id, |s| drained = s.drain_markers())
            .await?;
        Ok(drained)
    }

    async fn set_speech_detection_job_id(
        &self,
        session_id: &str,
        job_id: Option<String>,
    ) -> Result<()> {
        self.mutate(session_id, |s| s.speech_detection_job_id = job_id)
            .await?;
        Ok(())
    }

    async fn set_persistence_job_id(&self, session_id: &str, job_id: Option<String>) -> Result<()> {
        self.mutate(session_id, |s| s.persistence_job_id = job_id)
            .await?;
        Ok(())
    }

    async fn expire_after(&self, session_id: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .expire(session_key(session_id), ttl.as_secs() as i64)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(session_key(session_id)).await.map_err(backend_err)?;
        Ok(())
    }

    async fn reopen_for_next_conversation(&self, session_id: &str) -> Result<()> {
        self.mutate(session_id, |s| {
            s.status = SessionStatus::Active;
            s.completion_reason = None;
            s.updated_at = chrono::Utc::now();
        })
        .await?;
        Ok(())
    }
}

pub struct RedisKeyValueStore {
    conn: ConnectionManager,
}

impl RedisKeyValueStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(backend_err)?;
        let conn = client.get_connection_manager().await.map_err(backend_err)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, value, ttl.as_secs())
                    .await
                    .map_err(backend_err)?;
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(backend_err)?;
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(backend_err)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(backend_err)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(backend_err)
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await.map_err(backend_err)?;
        if let Some(ttl) = ttl {
            let _: () = conn
                .expire(key, ttl.as_secs() as i64)
                .await
                .map_err(backend_err)?;
        }
        Ok(value)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let set: bool = match ttl {
            Some(ttl) => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(&value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs())
                    .query_async::<_, Option<String>>(&mut conn)
                    .await
                    .map_err(backend_err)?
                    .is_some()
            }
            None => conn.set_nx(key, &value).await.map_err(backend_err)?,
        };
        Ok(set)
    }
}
