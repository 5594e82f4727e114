//! Shared, cloneable handle to every backend the gateway talks to, built
//! once at process start and handed to each connection's axum handler.

use std::sync::Arc;

use reverb_config::AppConfig;
use reverb_fabric::{AudioStream, InterimPubSub, ResultStream};
use reverb_jobs::JobQueue;
use reverb_persistence::{ChunkRepository, ConversationRepository};
use reverb_plugins::PluginRouter;
use reverb_session::{KeyValueStore, SessionStore};
use tokio::sync::Semaphore;

use crate::auth::TokenAuthenticator;

/// CPU-bound, shared across sessions, never on the request task. A
/// semaphore models "a small fixed thread pool" without actually
/// standing up a dedicated pool crate the rest of the corpus doesn't
/// use.
const OPUS_DECODE_CONCURRENCY: usize = 4;

#[derive(Clone)]
pub struct GatewayState {
    pub sessions: Arc<dyn SessionStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub jobs: Arc<dyn JobQueue>,
    pub audio_stream: Arc<dyn AudioStream>,
    pub results: Arc<dyn ResultStream>,
    pub interim: Arc<dyn InterimPubSub>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub chunks: Arc<dyn ChunkRepository>,
    pub config: Arc<AppConfig>,
    pub plugins: Arc<PluginRouter>,
    pub auth: Arc<dyn TokenAuthenticator>,
    pub opus_decode_permits: Arc<Semaphore>,
}

impl GatewayState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        kv: Arc<dyn KeyValueStore>,
        jobs: Arc<dyn JobQueue>,
        audio_stream: Arc<dyn AudioStream>,
        results: Arc<dyn ResultStream>,
        interim: Arc<dyn InterimPubSub>,
        conversations: Arc<dyn ConversationRepository>,
        chunks: Arc<dyn ChunkRepository>,
        config: Arc<AppConfig>,
        plugins: Arc<PluginRouter>,
        auth: Arc<dyn TokenAuthenticator>,
    ) -> Self {
        Self {
            sessions,
            kv,
            jobs,
            audio_stream,
            results,
            interim,
            conversations,
            chunks,
            config,
            plugins,
            auth,
            opus_decode_permits: Arc::new(Semaphore::new(OPUS_DECODE_CONCURRENCY)),
        }
    }

    /// Whether a streaming STT provider is configured.
    pub fn streaming_configured(&self) -> bool {
        self.config.transcription.streaming_provider.is_some()
    }
}
