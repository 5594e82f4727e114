//! The Conversation Monitor's long-running job. One instance owns
//! exactly one conversation from open to close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reverb_config::limits;
use reverb_fabric::{aggregate, ResultStream};
use reverb_jobs::JobQueue;
use reverb_models::{
    CompletionReason, Conversation, DiarizationSource, EndReason, Job, ProcessingStatus,
    SessionStatus, TranscriptVersion,
};
use reverb_persistence::{ChunkRepository, ConversationRepository};
use reverb_plugins::PluginRouter;
use reverb_session::{KeyValueStore, SessionStore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::segment::validate_and_normalize_segments;
use crate::Result;

fn conversation_current_key(session_id: &str) -> String {
    format!("conversation:current:{session_id}")
}

fn open_conversation_key(session_id: &str) -> String {
    format!("open_conversation:session:{session_id}")
}

fn conversation_count_key(session_id: &str) -> String {
    format!("session:conversation_count:{session_id}")
}

fn transcription_complete_key(session_id: &str) -> String {
    format!("transcription:complete:{session_id}")
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub session_id: String,
    pub user_id: String,
    pub client_id: String,
    /// This job's own id (`open-conv_<session_id>_<N>`).
    pub job_id: String,
    /// The speech-detection job that spawned this monitor, so its meta
    /// can be stamped with `conversation_id`.
    pub speech_detection_job_id: Option<String>,
    pub always_batch_retranscribe: bool,
    pub inactivity_timeout: Duration,
    pub tick_interval: Duration,
    pub max_duration: Duration,
    pub close_wait_transcription_complete: Duration,
    pub close_wait_audio_chunks: Duration,
}

impl MonitorConfig {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        client_id: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            client_id: client_id.into(),
            job_id: job_id.into(),
            speech_detection_job_id: None,
            always_batch_retranscribe: false,
            inactivity_timeout: limits::DEFAULT_INACTIVITY_TIMEOUT,
            tick_interval: limits::MONITOR_TICK_INTERVAL,
            max_duration: limits::MONITOR_MAX_DURATION,
            close_wait_transcription_complete: limits::CLOSE_WAIT_TRANSCRIPTION_COMPLETE,
            close_wait_audio_chunks: limits::CLOSE_WAIT_AUDIO_CHUNKS,
        }
    }
}

/// Map a session's terminal `completion_reason` onto a conversation
/// `end_reason`. `AllJobsComplete` never reaches this mapping directly
/// — it is intercepted earlier by the race-recovery check — but is
/// mapped defensively rather than panicking if it ever does.
fn map_completion_reason(reason: CompletionReason) -> EndReason {
    match reason {
        CompletionReason::UserStopped => EndReason::UserStopped,
        CompletionReason::WebsocketDisconnect => EndReason::WebsocketDisconnect,
        CompletionReason::AllJobsComplete => EndReason::UserStopped,
    }
}

/// Race recovery: a `finished` session that is still websocket-connected
/// and closed itself only because of an inter-conversation lull is
/// spurious and should be un-finished.
pub fn is_spurious_finish(
    status: SessionStatus,
    completion_reason: Option<CompletionReason>,
    websocket_connected: bool,
) -> bool {
    status == SessionStatus::Finished
        && completion_reason == Some(CompletionReason::AllJobsComplete)
        && websocket_connected
}

/// Priority order, decided once the loop has broken out for one of
/// these reasons. Exactly one of the boolean/option inputs should be
/// the actual trigger; this function just encodes priority when more
/// than one signal is simultaneously true.
fn decide_end_reason(
    completion_reason: Option<CompletionReason>,
    close_requested: bool,
    inactivity_fired: bool,
    max_duration_fired: bool,
) -> EndReason {
    if let Some(reason) = completion_reason {
        return map_completion_reason(reason);
    }
    if close_requested {
        return EndReason::CloseRequested;
    }
    if inactivity_fired {
        return EndReason::InactivityTimeout;
    }
    if max_duration_fired {
        return EndReason::MaxDuration;
    }
    EndReason::UserStopped
}

enum CloseTrigger {
    SessionDone,
    CloseRequested,
    MaxDuration,
    Inactivity,
}

/// Outcome of the open+tick+close stages, consumed by the always-run
/// end-of-conversation handler.
struct ClosedConversation {
    conversation_id: Uuid,
    end_reason: EndReason,
    chain_enqueued: bool,
}

/// Run one Conversation Monitor job to completion. Returns once the
/// conversation is closed and the end-of-conversation handler has run —
/// the handler runs even if an earlier stage returned an error.
#[allow(clippy::too_many_arguments)]
pub async fn run_conversation_monitor_job(
    config: MonitorConfig,
    results: Arc<dyn ResultStream>,
    sessions: Arc<dyn SessionStore>,
    kv: Arc<dyn KeyValueStore>,
    jobs: Arc<dyn JobQueue>,
    conversations: Arc<dyn ConversationRepository>,
    chunks: Arc<dyn ChunkRepository>,
    router: Arc<PluginRouter>,
    cancel: CancellationToken,
) -> Result<()> {
    let open = open_conversation(&config, sessions.as_ref(), kv.as_ref(), jobs.as_ref(), conversations.as_ref()).await;
    let conversation_id = match open {
        Ok(id) => id,
        Err(err) => {
            tracing::error!(session_id = %config.session_id, %err, "monitor: failed to open conversation");
            return Err(err);
        }
    };

    let loop_result = run_tick_loop(
        &config,
        conversation_id,
        results.as_ref(),
        sessions.as_ref(),
        jobs.as_ref(),
        router.as_ref(),
        &cancel,
    )
    .await;

    // The end-of-conversation handler runs regardless of how the tick
    // loop or close sequence turned out — this is the only site that
    // re-enables the session for its next conversation.
    let closed = match loop_result {
        Ok(trigger) => {
            close_conversation(
                &config,
                conversation_id,
                trigger,
                sessions.as_ref(),
                kv.as_ref(),
                jobs.as_ref(),
                conversations.as_ref(),
                chunks.as_ref(),
                results.as_ref(),
            )
            .await
        }
        Err(err) => {
            tracing::error!(session_id = %config.session_id, %err, "monitor: tick loop failed, closing with best-effort reason");
            Ok(ClosedConversation {
                conversation_id,
                end_reason: EndReason::UserStopped,
                chain_enqueued: false,
            })
        }
    };

    let closed = match closed {
        Ok(closed) => closed,
        Err(err) => {
            tracing::error!(session_id = %config.session_id, %err, "monitor: close sequence failed, finishing with best-effort reason");
            ClosedConversation {
                conversation_id,
                end_reason: EndReason::UserStopped,
                chain_enqueued: false,
            }
        }
    };
    finish_conversation(
        &config,
        &closed,
        results.as_ref(),
        sessions.as_ref(),
        kv.as_ref(),
        jobs.as_ref(),
        conversations.as_ref(),
    )
    .await?;
    Ok(())
}

/// Open (or resume) the conversation record this job owns.
async fn open_conversation(
    config: &MonitorConfig,
    sessions: &dyn SessionStore,
    kv: &dyn KeyValueStore,
    jobs: &dyn JobQueue,
    conversations: &dyn ConversationRepository,
) -> Result<Uuid> {
    let key = conversation_current_key(&config.session_id);
    let existing = kv.get(&key).await?.and_then(|raw| Uuid::parse_str(&raw).ok());

    let conversation_id = if let Some(id) = existing {
        match conversations.try_get(id).await? {
            Some(conversation)
                if conversation.always_persist
                    && conversation.processing_status == ProcessingStatus::PendingTranscription =>
            {
                conversations
                    .mutate(
                        id,
                        Box::new(|c| {
                            c.title = "Recording…".to_string();
                            c.summary = Some("Transcribing audio…".to_string());
                        }),
                    )
                    .await?;
                id
            }
            _ => create_new_conversation(config, conversations).await?,
        }
    } else {
        create_new_conversation(config, conversations).await?
    };

    kv.set(&key, conversation_id.to_string(), Some(limits::CONVERSATION_CURRENT_TTL))
        .await?;

    if let Some(sd_job_id) = &config.speech_detection_job_id {
        jobs.merge_meta(sd_job_id, serde_json::json!({"conversation_id": conversation_id}))
            .await?;
    }

    let markers = sessions.drain_markers(&config.session_id).await?;
    if !markers.is_empty() {
        conversations
            .mutate(
                conversation_id,
                Box::new(move |c| c.markers.extend(markers)),
            )
            .await?;
    }

    Ok(conversation_id)
}

async fn create_new_conversation(
    config: &MonitorConfig,
    conversations: &dyn ConversationRepository,
) -> Result<Uuid> {
    let conversation = Conversation::new_recording(&config.user_id, &config.client_id);
    let id = conversation.conversation_id;
    conversations.create(conversation).await?;
    Ok(id)
}

/// The once-a-second tick loop, returning the reason the loop exited so
/// the caller can run the close sequence.
async fn run_tick_loop(
    config: &MonitorConfig,
    conversation_id: Uuid,
    results: &dyn ResultStream,
    sessions: &dyn SessionStore,
    jobs: &dyn JobQueue,
    router: &PluginRouter,
    cancel: &CancellationToken,
) -> Result<CloseTrigger> {
    let opened_at = Instant::now();
    let mut last_word_count = 0usize;
    let mut last_chunk_count = 0usize;

    loop {
        // Step 1: zombie check.
        if !jobs.is_registered(&config.job_id).await? {
            tracing::warn!(job_id = %config.job_id, "monitor: job record missing, exiting as zombie");
            return Ok(CloseTrigger::SessionDone);
        }
        if cancel.is_cancelled() {
            return Ok(CloseTrigger::SessionDone);
        }

        // Step 2: finalize signal + race recovery.
        let session = sessions.get(&config.session_id).await?;
        if is_spurious_finish(session.status, session.completion_reason, session.websocket_connected) {
            sessions.reopen_for_next_conversation(&config.session_id).await?;
        } else if matches!(session.status, SessionStatus::Finalizing | SessionStatus::Finished) {
            return Ok(CloseTrigger::SessionDone);
        }

        // Step 3: close-request signal.
        if sessions
            .take_conversation_close_request(&config.session_id)
            .await?
            .is_some()
        {
            return Ok(CloseTrigger::CloseRequested);
        }

        // Step 4: max runtime.
        if opened_at.elapsed() >= config.max_duration {
            return Ok(CloseTrigger::MaxDuration);
        }

        // Step 5-6: aggregate, validate segments, update job meta.
        let entries = results.read_all(&config.session_id).await.unwrap_or_default();
        let view = aggregate(&entries);
        let segments = validate_and_normalize_segments(&view.segments);
        let speakers: std::collections::BTreeSet<&str> =
            segments.iter().map(|s| s.speaker.as_str()).collect();

        jobs.merge_meta(
            &config.job_id,
            serde_json::json!({
                "transcript": view.text.clone(),
                "word_count": view.word_count(),
                "speaker_count": speakers.len(),
                "chunk_count": view.chunk_count,
            }),
        )
        .await?;

        // Step 7: inactivity timeout, measured in audio time from the
        // last word (using wall-clock elapsed-since-open as a stand-in
        // for audio-stream position, since live audio arrives at
        // real-time rate).
        let audio_now = opened_at.elapsed().as_secs_f64();
        let last_word_end = view.last_word_end().unwrap_or(0.0);
        if audio_now - last_word_end >= config.inactivity_timeout.as_secs_f64() {
            return Ok(CloseTrigger::Inactivity);
        }

        // Step 8: dispatch transcript.streaming if new results arrived.
        if view.word_count() != last_word_count || view.chunk_count != last_chunk_count {
            last_word_count = view.word_count();
            last_chunk_count = view.chunk_count;
            router
                .dispatch_event(
                    "transcript.streaming",
                    &config.user_id,
                    serde_json::json!({
                        "transcript": view.text,
                        "segment_id": view.chunk_count,
                        "conversation_id": conversation_id,
                        "segments": segments,
                        "word_count": view.word_count(),
                    }),
                    None,
                )
                .await;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(CloseTrigger::SessionDone),
            _ = tokio::time::sleep(config.tick_interval) => {}
        }
    }
}

/// Decide the end reason and run the close sequence.
#[allow(clippy::too_many_arguments)]
async fn close_conversation(
    config: &MonitorConfig,
    conversation_id: Uuid,
    trigger: CloseTrigger,
    sessions: &dyn SessionStore,
    kv: &dyn KeyValueStore,
    jobs: &dyn JobQueue,
    conversations: &dyn ConversationRepository,
    chunks: &dyn ChunkRepository,
    results: &dyn ResultStream,
) -> Result<ClosedConversation> {
    let session = sessions.try_get(&config.session_id).await?;
    let completion_reason = session.as_ref().and_then(|s| s.completion_reason);
    let close_requested = matches!(trigger, CloseTrigger::CloseRequested);
    let inactivity_fired = matches!(trigger, CloseTrigger::Inactivity);
    let max_duration_fired = matches!(trigger, CloseTrigger::MaxDuration);

    let end_reason = decide_end_reason(completion_reason, close_requested, inactivity_fired, max_duration_fired);

    // Step 1: wait for streaming transcription completion, skipped on an
    // explicit close request.
    if !close_requested {
        wait_for(config.close_wait_transcription_complete, || {
            kv.exists(&transcription_complete_key(&config.session_id))
        })
        .await;
    }

    // Step 2: wait for at least one persisted audio chunk.
    let has_chunk = wait_for(config.close_wait_audio_chunks, || {
        chunks.count_for_conversation(conversation_id)
    })
    .await
    .unwrap_or(0)
        > 0;

    if !has_chunk {
        conversations
            .mutate(
                conversation_id,
                Box::new(|c| c.soft_delete("audio_chunks_not_ready")),
            )
            .await?;
        return Ok(ClosedConversation {
            conversation_id,
            end_reason: EndReason::AudioChunksNotReady,
            chain_enqueued: false,
        });
    }

    // Step 3: snapshot the final aggregator view into the active
    // transcript version.
    let entries = results.read_all(&config.session_id).await.unwrap_or_default();
    let view = aggregate(&entries);
    let segments = validate_and_normalize_segments(&view.segments);
    let session_prefix: String = config.session_id.chars().take(8).collect();
    let word_count = view.word_count();
    let chunk_count = view.chunk_count;
    let provider = view.provider.clone().unwrap_or_else(|| "unknown".to_string());
    let has_segments = !segments.is_empty();

    let version = TranscriptVersion {
        version_id: format!("streaming_{session_prefix}"),
        transcript: view.text,
        words: view.words,
        segments,
        provider: provider.clone(),
        model: provider,
        diarization_source: has_segments.then_some(DiarizationSource::Provider),
        metadata: serde_json::json!({"source": "streaming", "chunk_count": chunk_count, "word_count": word_count}),
        created_at: chrono::Utc::now(),
    };

    conversations
        .mutate(conversation_id, Box::new(move |c| c.set_active_transcript(version)))
        .await?;

    // Step 4: hand off to the post-conversation chain.
    reverb_postchain::enqueue_post_conversation_chain(jobs, conversation_id, config.always_batch_retranscribe)
        .await?;

    Ok(ClosedConversation {
        conversation_id,
        end_reason,
        chain_enqueued: true,
    })
}

/// Poll `check` every 500ms until it reports a truthy/positive result or
/// `budget` elapses.
async fn wait_for<T, E, F, Fut>(budget: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    T: Truthy,
{
    let deadline = Instant::now() + budget;
    loop {
        if let Ok(value) = check().await {
            if value.is_truthy() {
                return Some(value);
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

trait Truthy {
    fn is_truthy(&self) -> bool;
}

impl Truthy for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
}

impl Truthy for u64 {
    fn is_truthy(&self) -> bool {
        *self > 0
    }
}

/// Always runs, re-enabling the session for its next conversation (or
/// ending it).
async fn finish_conversation(
    config: &MonitorConfig,
    closed: &ClosedConversation,
    results: &dyn ResultStream,
    sessions: &dyn SessionStore,
    kv: &dyn KeyValueStore,
    jobs: &dyn JobQueue,
    conversations: &dyn ConversationRepository,
) -> Result<()> {
    let _ = conversations
        .mutate(closed.conversation_id, {
            let end_reason = closed.end_reason;
            Box::new(move |c| c.close(end_reason))
        })
        .await;

    // Step 1: drop the result stream. Never the audio stream — that
    // belongs to the client.
    let _ = results.delete(&config.session_id).await;

    let _ = sessions.expire_after(&config.session_id, limits::SESSION_TTL_AFTER_CONVERSATION).await;
    let _ = kv.delete(&open_conversation_key(&config.session_id)).await;
    let _ = kv.delete(&conversation_current_key(&config.session_id)).await;
    let _ = kv
        .incr(&conversation_count_key(&config.session_id), Some(limits::CONVERSATION_COUNT_TTL))
        .await;

    jobs.set_status(&config.job_id, reverb_models::JobStatus::Finished).await?;

    let session = sessions.try_get(&config.session_id).await?;
    let Some(session) = session else {
        return Ok(());
    };

    let should_restart = if session.status == SessionStatus::Active {
        true
    } else if session.websocket_connected {
        sessions.reopen_for_next_conversation(&config.session_id).await?;
        true
    } else {
        false
    };

    if should_restart {
        let _ = kv.delete(&transcription_complete_key(&config.session_id)).await;
        let n = kv
            .get(&conversation_count_key(&config.session_id))
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let sd_job_id = format!("open-conv-detect_{}_{}", config.session_id, n);
        let job = Job::new(
            sd_job_id.clone(),
            "transcription",
            "speech_detection",
            serde_json::json!({
                "session_id": config.session_id,
                "user_id": config.user_id,
                "client_id": config.client_id,
            }),
            limits::SPEECH_DETECTION_TIMEOUT.as_secs(),
        )
        .with_description(format!("detect next conversation for session {}", config.session_id));
        jobs.enqueue(job).await?;
    }

    let _ = closed.chain_enqueued;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverb_fabric::{InMemoryResultStream, ResultEntry};
    use reverb_jobs::InMemoryJobQueue;
    use reverb_models::{AudioChunk, AudioFormat, RecordingMode, Session, Word};
    use reverb_persistence::{InMemoryChunkRepository, InMemoryConversationRepository};
    use reverb_session::{InMemoryKeyValueStore, InMemorySessionStore};

    fn config() -> MonitorConfig {
        let mut c = MonitorConfig::new("sess-1", "user-1", "sess-1", "open-conv_sess-1_0");
        c.tick_interval = Duration::from_millis(10);
        c.max_duration = Duration::from_secs(3600);
        c.inactivity_timeout = Duration::from_secs(3600);
        c.close_wait_transcription_complete = Duration::from_millis(50);
        c.close_wait_audio_chunks = Duration::from_millis(50);
        c
    }

    async fn setup() -> (
        Arc<InMemoryResultStream>,
        Arc<InMemorySessionStore>,
        Arc<InMemoryKeyValueStore>,
        Arc<InMemoryJobQueue>,
        Arc<InMemoryConversationRepository>,
        Arc<InMemoryChunkRepository>,
        Arc<PluginRouter>,
    ) {
        let results = InMemoryResultStream::new();
        let sessions = InMemorySessionStore::new();
        let kv = InMemoryKeyValueStore::new();
        let jobs = InMemoryJobQueue::new();
        let conversations = InMemoryConversationRepository::new();
        let chunks = InMemoryChunkRepository::new();
        let router = Arc::new(PluginRouter::new());

        sessions
            .create(Session::new(
                "sess-1",
                "user-1",
                "user@example.com",
                AudioFormat::default(),
                RecordingMode::Streaming,
                "mock",
                "conn-1",
            ))
            .await
            .unwrap();
        jobs.enqueue(Job::new(
            "open-conv_sess-1_0",
            "transcription",
            "conversation_monitor",
            serde_json::json!({}),
            3600,
        ))
        .await
        .unwrap();

        (results, sessions, kv, jobs, conversations, chunks, router)
    }

    #[tokio::test]
    async fn user_stopped_conversation_closes_and_restarts_detection() {
        let (results, sessions, kv, jobs, conversations, chunks, router) = setup().await;

        results
            .publish(
                "sess-1",
                ResultEntry {
                    chunk_index: 0,
                    text: "hello world".into(),
                    words: vec![
                        Word { word: "hello".into(), start: 0.0, end: 0.4, confidence: 1.0, speaker: None },
                        Word { word: "world".into(), start: 0.5, end: 0.9, confidence: 1.0, speaker: None },
                    ],
                    segments: vec![],
                    provider: "mock".into(),
                    is_final: true,
                },
            )
            .await
            .unwrap();

        // Pre-create the conversation id the worker would have created,
        // and insert one chunk so the close sequence finds persisted audio.
        let handle = tokio::spawn({
            let results = results.clone();
            let sessions = sessions.clone();
            let kv = kv.clone();
            let jobs = jobs.clone();
            let conversations = conversations.clone();
            let chunks = chunks.clone();
            let router = router.clone();
            async move {
                run_conversation_monitor_job(
                    config(),
                    results,
                    sessions,
                    kv,
                    jobs,
                    conversations,
                    chunks,
                    router,
                    CancellationToken::new(),
                )
                .await
            }
        });

        // Let the loop open the conversation and tick once, then insert a
        // chunk and signal session finalization (user stop).
        tokio::time::sleep(Duration::from_millis(30)).await;
        let conversation_id_raw = kv.get("conversation:current:sess-1").await.unwrap().unwrap();
        let conversation_id = Uuid::parse_str(&conversation_id_raw).unwrap();
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
        kv.set("transcription:complete:sess-1", "ok".into(), None).await.unwrap();
        sessions.set_completion_reason("sess-1", CompletionReason::UserStopped).await.unwrap();
        sessions.set_websocket_connected("sess-1", false).await.unwrap();
        sessions.set_status("sess-1", SessionStatus::Finalizing).await.unwrap();
        sessions.set_status("sess-1", SessionStatus::Finished).await.unwrap();

        handle.await.unwrap().unwrap();

        let conversation = conversations.get(conversation_id).await.unwrap();
        assert_eq!(conversation.end_reason, Some(EndReason::UserStopped));
        assert!(conversation.active_transcript().is_some());
        assert!(!conversations.get(conversation_id).await.unwrap().deleted);

        assert!(!kv.exists("open_conversation:session:sess-1").await.unwrap());
        assert!(!kv.exists("conversation:current:sess-1").await.unwrap());
        assert_eq!(kv.get("session:conversation_count:sess-1").await.unwrap(), Some("1".to_string()));

        // session is Finished and not websocket_connected ->
        // no restart job should have been enqueued.
        let job = jobs.fetch("open-conv_sess-1_0").await.unwrap().unwrap();
        assert_eq!(job.status, reverb_models::JobStatus::Finished);
    }

    #[tokio::test]
    async fn no_audio_chunk_soft_deletes_with_reason() {
        let (results, sessions, kv, jobs, conversations, chunks, router) = setup().await;
        sessions.set_completion_reason("sess-1", CompletionReason::UserStopped).await.unwrap();
        sessions.set_status("sess-1", SessionStatus::Finalizing).await.unwrap();
        sessions.set_status("sess-1", SessionStatus::Finished).await.unwrap();

        run_conversation_monitor_job(
            config(),
            results,
            sessions,
            kv.clone(),
            jobs,
            conversations.clone(),
            chunks,
            router,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let conversation_id_raw_deleted = conversations.list_all().await;
        let conversation = conversation_id_raw_deleted.first().expect("one conversation created");
        assert!(conversation.deleted);
        assert_eq!(conversation.deleted_reason.as_deref(), Some("audio_chunks_not_ready"));
    }

    #[test]
    fn spurious_finish_is_recognized() {
        assert!(is_spurious_finish(
            SessionStatus::Finished,
            Some(CompletionReason::AllJobsComplete),
            true
        ));
        assert!(!is_spurious_finish(
            SessionStatus::Finished,
            Some(CompletionReason::UserStopped),
            true
        ));
        assert!(!is_spurious_finish(
            SessionStatus::Finished,
            Some(CompletionReason::AllJobsComplete),
            false
        ));
    }

    #[test]
    fn end_reason_priority_follows_fixed_order() {
        assert_eq!(
            decide_end_reason(Some(CompletionReason::WebsocketDisconnect), true, true, true),
            EndReason::WebsocketDisconnect
        );
        assert_eq!(decide_end_reason(None, true, true, true), EndReason::CloseRequested);
        assert_eq!(decide_end_reason(None, false, true, true), EndReason::InactivityTimeout);
        assert_eq!(decide_end_reason(None, false, false, true), EndReason::MaxDuration);
        assert_eq!(decide_end_reason(None, false, false, false), EndReason::UserStopped);
    }
}
