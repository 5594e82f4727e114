//! Session initialization: compute the deterministic session id, create
//! the session record, and enqueue the two long-running jobs every
//! connection needs regardless of mode.

use std::sync::Arc;

use reverb_config::limits;
use reverb_jobs::JobQueue;
use reverb_models::{AudioFormat, Job, RecordingMode, Session};
use reverb_session::{KeyValueStore, SessionStore};

use crate::auth::AuthClaims;
use crate::error::Result;
use crate::protocol::AudioStartData;

fn speech_detection_job_key(client_id: &str) -> String {
    format!("speech_detection_job:{client_id}")
}

/// `session_id = client_id`, deterministic from the authenticated user
/// and the device name the client presents: the same user reconnecting
/// from the same device lands on the same session id, so in-flight jobs
/// keyed on it can find it again after a reconnect.
pub fn compute_client_id(user_id: &str, device_name: &str) -> String {
    fn sanitize(raw: &str) -> String {
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
    format!("{}__{}", sanitize(user_id), sanitize(device_name))
}

/// Outcome of session setup, handed back to the WS handler so it can
/// drive the per-connection interim-subscriber task and the ingest loop.
pub struct InitializedSession {
    pub session: Session,
    pub speech_detection_job_id: String,
    pub persistence_job_id: String,
    pub transcription_job_id: Option<String>,
}

/// Creates the session record and enqueues its jobs. The interim pub/sub
/// subscription is the WS handler's own long-lived task, not part of
/// session setup proper.
pub async fn initialize_session(
    claims: &AuthClaims,
    device_name: &str,
    connection_id: &str,
    audio_format: AudioFormat,
    mode: RecordingMode,
    provider: &str,
    sessions: &Arc<dyn SessionStore>,
    kv: &Arc<dyn KeyValueStore>,
    jobs: &Arc<dyn JobQueue>,
) -> Result<InitializedSession> {
    let client_id = compute_client_id(&claims.user_id, device_name);

    let mut session = Session::new(
        client_id.clone(),
        claims.user_id.clone(),
        claims.user_email.clone(),
        audio_format,
        mode,
        provider,
        connection_id,
    );

    let speech_detection_job_id = format!("open-conv-detect_{client_id}_0");
    let persistence_job_id = format!("persist_{client_id}");

    let speech_job = Job::new(
        speech_detection_job_id.clone(),
        "transcription",
        "speech_detection",
        serde_json::json!({
            "session_id": client_id,
            "user_id": claims.user_id,
            "client_id": client_id,
        }),
        limits::SPEECH_DETECTION_TIMEOUT.as_secs(),
    )
    .with_description(format!("detect conversation start for session {client_id}"));

    let persistence_job = Job::new(
        persistence_job_id.clone(),
        "audio",
        "audio_persistence",
        serde_json::json!({
            "session_id": client_id,
            "client_id": client_id,
        }),
        limits::PERSISTENCE_WORKER_TIMEOUT.as_secs(),
    )
    .with_description(format!("persist audio chunks for session {client_id}"));

    jobs.enqueue(speech_job).await?;
    jobs.enqueue(persistence_job).await?;

    // Only streaming-mode sessions feed the audio fabric, so only they
    // need a consumer tailing it for STT (batch mode transcribes inline
    // from the gateway's own buffer, see `batch.rs`).
    let transcription_job_id = if mode == RecordingMode::Streaming {
        let job_id = format!("streaming-transcribe_{client_id}");
        let job = Job::new(
            job_id.clone(),
            "transcription",
            "streaming_transcription",
            serde_json::json!({
                "session_id": client_id,
                "client_id": client_id,
                "provider": provider,
            }),
            limits::PERSISTENCE_WORKER_TIMEOUT.as_secs(),
        )
        .with_description(format!("stream transcription for session {client_id}"));
        jobs.enqueue(job).await?;
        Some(job_id)
    } else {
        None
    };

    session.speech_detection_job_id = Some(speech_detection_job_id.clone());
    session.persistence_job_id = Some(persistence_job_id.clone());
    sessions.create(session.clone()).await?;

    kv.set(
        &speech_detection_job_key(&client_id),
        speech_detection_job_id.clone(),
        None,
    )
    .await?;

    Ok(InitializedSession {
        session,
        speech_detection_job_id,
        persistence_job_id,
        transcription_job_id,
    })
}

/// Streaming vs. batch validation: browser clients (codec `pcm`) get a
/// hard error; wearable clients (codec `opus`) are silently downgraded
/// to batch.
pub fn resolve_mode(
    requested: &AudioStartData,
    streaming_configured: bool,
    is_wearable: bool,
) -> std::result::Result<RecordingMode, crate::error::GatewayError> {
    let requested_mode = requested.mode.unwrap_or(RecordingMode::Streaming);
    if requested_mode == RecordingMode::Streaming && !streaming_configured {
        if is_wearable {
            return Ok(RecordingMode::Batch);
        }
        return Err(crate::error::GatewayError::StreamingNotConfigured);
    }
    Ok(requested_mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_user_and_device_yields_the_same_client_id() {
        let a = compute_client_id("alice@example.com", "pixel-7");
        let b = compute_client_id("alice@example.com", "pixel-7");
        assert_eq!(a, b);
        let c = compute_client_id("alice@example.com", "pixel-8");
        assert_ne!(a, c);
    }

    #[test]
    fn streaming_unconfigured_errors_for_browser_downgrades_for_wearable() {
        let requested = AudioStartData {
            rate: 16_000,
            width: 2,
            channels: 1,
            mode: Some(RecordingMode::Streaming),
        };
        assert!(resolve_mode(&requested, false, false).is_err());
        assert_eq!(resolve_mode(&requested, false, true).unwrap(), RecordingMode::Batch);
        assert_eq!(resolve_mode(&requested, true, false).unwrap(), RecordingMode::Streaming);
    }
}
