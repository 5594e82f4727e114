//! Per-queue job dispatch: each named queue (`transcription`, `audio`,
//! `memory`) gets its own dequeue loop that matches a job's `handler`
//! string against the concrete entry point it names and runs it on a
//! fresh task, so a single slow job never blocks the next dequeue —
//! queues are independently scheduled.
//!
//! Job args are plain `serde_json::Value`; every handler here is
//! responsible for pulling its own fields back out and failing loudly
//! (job `Failed`) if they're missing, rather than the queue itself
//! knowing each handler's shape.

use std::sync::Arc;
use std::time::Duration;

use reverb_config::AppConfig;
use reverb_fabric::{AudioStream, InterimPubSub, ResultStream};
use reverb_jobs::JobQueue;
use reverb_models::{Job, JobStatus};
use reverb_persistence::{ChunkRepository, ConversationRepository};
use reverb_plugins::PluginRouter;
use reverb_postchain::mock::{EchoTitleSummarizer, NoopMemoryExtractor, NoopSpeakerRecognitionService};
use reverb_session::{KeyValueStore, SessionStore};
use reverb_speech_detect::NoopSpeakerCheck;
use reverb_transcribe::{MockBatchStt, MockStreamingStt};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How long an idle queue sleeps between empty dequeues.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

const QUEUES: &[&str] = &["transcription", "audio", "memory", "default"];

/// Every backend handle a job handler might need. Cloned cheaply (all
/// `Arc`) into each dispatched task.
#[derive(Clone)]
pub struct Backends {
    pub sessions: Arc<dyn SessionStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub jobs: Arc<dyn JobQueue>,
    pub audio_stream: Arc<dyn AudioStream>,
    pub results: Arc<dyn ResultStream>,
    pub interim: Arc<dyn InterimPubSub>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub chunks: Arc<dyn ChunkRepository>,
    pub plugins: Arc<PluginRouter>,
    pub config: Arc<AppConfig>,
}

/// Spawn one dequeue loop per named queue. Returns their join handles so
/// the caller can await a clean shutdown.
pub fn spawn_all(backends: Backends, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    QUEUES
        .iter()
        .map(|queue| {
            let backends = backends.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(run_queue_loop(queue.to_string(), backends, shutdown))
        })
        .collect()
}

async fn run_queue_loop(queue: String, backends: Backends, shutdown: CancellationToken) {
    let mut in_flight = JoinSet::new();
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match backends.jobs.dequeue(&queue).await {
            Ok(Some(job)) => {
                let backends = backends.clone();
                let job_cancel = shutdown.clone();
                in_flight.spawn(async move { run_job(job, backends, job_cancel).await });
            }
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                }
            }
            Err(err) => {
                tracing::error!(queue = %queue, %err, "dequeue failed, backing off");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    tracing::info!(queue = %queue, pending = in_flight.len(), "queue loop shutting down, draining in-flight jobs");
    while in_flight.join_next().await.is_some() {}
}

async fn run_job(job: Job, backends: Backends, cancel: CancellationToken) {
    let job_id = job.id.clone();
    let handler = job.handler.clone();
    tracing::info!(job_id = %job_id, handler = %handler, "dispatching job");

    let outcome = dispatch_one(&job, &backends, cancel).await;

    match outcome {
        Ok(()) => {
            if let Err(err) = backends.jobs.set_status(&job_id, JobStatus::Finished).await {
                tracing::warn!(job_id = %job_id, %err, "failed to mark job finished");
            }
        }
        Err(err) => {
            tracing::error!(job_id = %job_id, handler = %handler, %err, "job failed");
            if let Err(err) = backends.jobs.set_status(&job_id, JobStatus::Failed).await {
                tracing::warn!(job_id = %job_id, %err, "failed to mark job failed");
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("job {0} missing required arg {1}")]
    MissingArg(String, &'static str),
    #[error("job {0} has invalid conversation_id: {1}")]
    BadConversationId(String, uuid::Error),
    #[error("unknown job handler: {0}")]
    UnknownHandler(String),
    #[error(transparent)]
    SpeechDetect(#[from] reverb_speech_detect::SpeechDetectError),
    #[error(transparent)]
    Monitor(#[from] reverb_monitor::MonitorError),
    #[error(transparent)]
    Persistence(#[from] reverb_persistence::PersistenceError),
    #[error(transparent)]
    Transcribe(#[from] reverb_transcribe::TranscribeError),
    #[error(transparent)]
    Chain(#[from] reverb_postchain::ChainError),
}

fn require_str<'a>(job: &'a Job, field: &'static str) -> Result<&'a str, DispatchError> {
    job.args
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| DispatchError::MissingArg(job.id.clone(), field))
}

fn require_conversation_id(job: &Job) -> Result<Uuid, DispatchError> {
    let raw = require_str(job, "conversation_id")?;
    Uuid::parse_str(raw).map_err(|err| DispatchError::BadConversationId(job.id.clone(), err))
}

async fn dispatch_one(job: &Job, backends: &Backends, cancel: CancellationToken) -> Result<(), DispatchError> {
    match job.handler.as_str() {
        "speech_detection" => {
            let config = reverb_speech_detect::SpeechDetectionConfig {
                session_id: require_str(job, "session_id")?.to_string(),
                client_id: require_str(job, "client_id")?.to_string(),
                user_id: require_str(job, "user_id")?.to_string(),
                job_id: job.id.clone(),
                run_speaker_check: false,
            };
            reverb_speech_detect::run_speech_detection_job(
                config,
                backends.results.clone(),
                backends.sessions.clone(),
                backends.kv.clone(),
                backends.jobs.clone(),
                Arc::new(NoopSpeakerCheck),
                cancel,
            )
            .await?;
        }
        "audio_persistence" => {
            let config = reverb_persistence::PersistenceWorkerConfig::new(
                require_str(job, "session_id")?,
                require_str(job, "client_id")?,
            );
            reverb_persistence::run_persistence_worker(
                config,
                backends.audio_stream.clone(),
                backends.kv.clone(),
                backends.sessions.clone(),
                backends.conversations.clone(),
                backends.chunks.clone(),
                cancel,
            )
            .await?;
        }
        "streaming_transcription" => {
            let config = reverb_transcribe::TranscriptionConsumerConfig {
                session_id: require_str(job, "session_id")?.to_string(),
                client_id: require_str(job, "client_id")?.to_string(),
                provider: require_str(job, "provider")?.to_string(),
            };
            // Real streaming vendors are out of scope here; the mock
            // provider exercises the full consumer loop the same way
            // `MockStreamingStt` does in this crate's own tests.
            let stt: Arc<dyn reverb_transcribe::SpeechToText> = Arc::new(MockStreamingStt::default());
            reverb_transcribe::run_transcription_consumer(
                config,
                backends.audio_stream.clone(),
                backends.results.clone(),
                backends.interim.clone(),
                backends.sessions.clone(),
                backends.kv.clone(),
                stt,
                cancel,
            )
            .await?;
        }
        "conversation_monitor" => {
            let mut config = reverb_monitor::MonitorConfig::new(
                require_str(job, "session_id")?,
                require_str(job, "user_id")?,
                require_str(job, "client_id")?,
                job.id.clone(),
            );
            config.speech_detection_job_id = job
                .args
                .get("speech_detection_job_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            config.always_batch_retranscribe = backends.config.post_chain.always_batch_retranscribe;
            config.inactivity_timeout = backends.config.inactivity_timeout();
            reverb_monitor::run_conversation_monitor_job(
                config,
                backends.results.clone(),
                backends.sessions.clone(),
                backends.kv.clone(),
                backends.jobs.clone(),
                backends.conversations.clone(),
                backends.chunks.clone(),
                backends.plugins.clone(),
                cancel,
            )
            .await?;
        }
        "batch_retranscribe" => {
            let conversation_id = require_conversation_id(job)?;
            let stt = MockBatchStt::new();
            reverb_postchain::run_batch_retranscribe(
                conversation_id,
                &job.id,
                backends.chunks.as_ref(),
                backends.conversations.as_ref(),
                backends.jobs.as_ref(),
                stt.as_ref(),
            )
            .await?;
        }
        "speaker_recognition" => {
            let conversation_id = require_conversation_id(job)?;
            reverb_postchain::run_speaker_recognition(
                conversation_id,
                backends.chunks.as_ref(),
                backends.conversations.as_ref(),
                Arc::new(NoopSpeakerRecognitionService),
            )
            .await?;
        }
        "memory_extraction" => {
            let conversation_id = require_conversation_id(job)?;
            reverb_postchain::run_memory_extraction(
                conversation_id,
                &job.id,
                backends.conversations.as_ref(),
                backends.jobs.as_ref(),
                &NoopMemoryExtractor,
            )
            .await?;
        }
        "title_summary" => {
            let conversation_id = require_conversation_id(job)?;
            reverb_postchain::run_title_summary(
                conversation_id,
                job.depends_on.as_deref(),
                backends.conversations.as_ref(),
                backends.jobs.as_ref(),
                &EchoTitleSummarizer,
            )
            .await?;
        }
        "event_dispatch" => {
            let conversation_id = require_conversation_id(job)?;
            reverb_postchain::run_event_dispatch(
                conversation_id,
                backends.conversations.as_ref(),
                backends.plugins.as_ref(),
            )
            .await?;
        }
        "transcription_fallback" => {
            let stt = MockBatchStt::new();
            reverb_postchain::run_transcription_fallback(
                require_str(job, "session_id")?,
                require_str(job, "client_id")?,
                require_str(job, "user_id")?,
                backends.kv.as_ref(),
                backends.chunks.as_ref(),
                backends.conversations.as_ref(),
                backends.audio_stream.as_ref(),
                backends.jobs.as_ref(),
                stt.as_ref(),
            )
            .await?;
        }
        other => return Err(DispatchError::UnknownHandler(other.to_string())),
    }
    Ok(())
}
