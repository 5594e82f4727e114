//! Process entry point: wires every backend component together and
//! runs them in one process — components may run in the same process,
//! separate processes, or separate hosts; this binary picks the first
//! for a single-node deployment. The WebSocket gateway runs on the
//! Tokio default multi-threaded runtime as one task per connection; the
//! per-queue job dispatchers (`dispatch.rs`) run alongside it as plain
//! loops, each an independently-scheduled job consumer against the
//! queue backend, without requiring a separate process per worker kind.

mod dispatch;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use redis::aio::ConnectionManager;
use reverb_config::AppConfig;
use reverb_fabric::{AudioStream, InterimPubSub, ResultStream};
use reverb_gateway::{GatewayState, SharedSecretAuthenticator};
use reverb_jobs::JobQueue;
use reverb_persistence::{ChunkRepository, ConversationRepository, SqliteStore};
use reverb_plugins::{PluginRouter, WakeWordLogger};
use reverb_session::{KeyValueStore, SessionStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Real-time voice-capture ingest backend.
#[derive(Parser, Debug)]
#[command(name = "reverb-server", version)]
struct Cli {
    /// TOML config file. Falls back to defaults + REVERB_* env vars if absent.
    #[arg(long, env = "REVERB_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Address the WebSocket gateway binds to.
    #[arg(long, env = "REVERB_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading config from {path:?}"))?,
        None => AppConfig::from_env_only(),
    };
    let config = Arc::new(config);

    tracing::info!(bind = %cli.bind, redis = %config.redis.url, "starting reverb-server");

    let client = redis::Client::open(config.redis.url.as_str()).context("opening redis client")?;
    let conn: ConnectionManager = client
        .get_connection_manager()
        .await
        .context("connecting to redis")?;

    let sessions: Arc<dyn SessionStore> =
        Arc::new(reverb_session::RedisSessionStore::connect(&config.redis.url).await?);
    let kv: Arc<dyn KeyValueStore> =
        Arc::new(reverb_session::RedisKeyValueStore::connect(&config.redis.url).await?);
    let jobs: Arc<dyn JobQueue> = Arc::new(reverb_jobs::RedisJobQueue::new(conn.clone()));
    let audio_stream: Arc<dyn AudioStream> = Arc::new(reverb_fabric::RedisAudioStream::new(conn.clone()));
    let results: Arc<dyn ResultStream> = Arc::new(reverb_fabric::RedisResultStream::new(conn.clone()));
    let interim: Arc<dyn InterimPubSub> =
        Arc::new(reverb_fabric::RedisInterimPubSub::new(conn.clone(), client));

    let sqlite = Arc::new(SqliteStore::open(&config.storage.sqlite_path).with_context(|| {
        format!("opening sqlite store at {}", config.storage.sqlite_path)
    })?);
    let conversations: Arc<dyn ConversationRepository> = sqlite.clone();
    let chunks: Arc<dyn ChunkRepository> = sqlite;

    let plugins = Arc::new(build_plugin_router(&config)?);

    let auth = Arc::new(SharedSecretAuthenticator::new(config.ws_auth_secret.clone()));

    let gateway_state = GatewayState::new(
        sessions.clone(),
        kv.clone(),
        jobs.clone(),
        audio_stream.clone(),
        results.clone(),
        interim.clone(),
        conversations.clone(),
        chunks.clone(),
        config.clone(),
        plugins.clone(),
        auth,
    );

    let shutdown = CancellationToken::new();

    let dispatcher = dispatch::Backends {
        sessions,
        kv,
        jobs: jobs.clone(),
        audio_stream,
        results,
        interim,
        conversations,
        chunks,
        plugins,
        config: config.clone(),
    };
    let dispatch_handles = dispatch::spawn_all(dispatcher, shutdown.clone());

    let app = reverb_gateway::router(gateway_state);
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(%err, "gateway server exited with error");
            }
        }
        _ = wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received, cancelling worker dispatchers");
        }
    }

    shutdown.cancel();
    for handle in dispatch_handles {
        let _ = handle.await;
    }

    Ok(())
}

fn build_plugin_router(config: &AppConfig) -> anyhow::Result<PluginRouter> {
    let mut router = PluginRouter::new();
    let Some(path) = &config.plugin_manifest_path else {
        tracing::info!("no plugin manifest configured, starting with no plugins registered");
        return Ok(router);
    };
    let yaml = std::fs::read_to_string(path).with_context(|| format!("reading plugin manifest {path}"))?;
    let registrations = reverb_plugins::load_manifest(&yaml).context("parsing plugin manifest")?;
    for (plugin_id, registration) in registrations {
        if !registration.enabled {
            continue;
        }
        // Plugin implementations beyond the contract are out of scope
        // here; every manifest entry is bound to the same
        // contract-conformance fixture so wake-word routing and event
        // dispatch are exercised end-to-end regardless of which
        // concrete plugin a deployment intends to run here.
        tracing::info!(%plugin_id, "registering plugin");
        router.register_plugin(registration, Arc::new(WakeWordLogger));
    }
    Ok(router)
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
