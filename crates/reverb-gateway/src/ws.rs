//! The `/ws` endpoint itself. One axum task per connection drives the
//! framed protocol state machine: the socket is upgraded first, then the
//! presented token is verified; once authenticated the task alternates
//! between `ControlMode` (waiting for `audio-start`) and
//! `AudioStreamingMode` (ingesting chunks) until `audio-stop` or
//! disconnect.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use reverb_config::limits;
use reverb_fabric::{AudioEntry, InterimMessage};
use reverb_models::{AudioFormat, CompletionReason, Marker, RecordingMode, SessionStatus};
use reverb_plugins::button_event_name;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::auth::AuthClaims;
use crate::batch::BatchBuffer;
use crate::error::{GatewayError, Result};
use crate::protocol::{parse_header, AudioStartData, ButtonEventData, Header, WsCodec};
use crate::session_init::{initialize_session, resolve_mode, InitializedSession};
use crate::state::GatewayState;

pub fn router(state: GatewayState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

#[derive(Debug, serde::Deserialize)]
struct WsParams {
    token: String,
    codec: String,
    device_name: String,
}

type WsSender = Arc<AsyncMutex<SplitSink<WebSocket, Message>>>;

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Query(params): Query<WsParams>,
) -> impl IntoResponse {
    let codec = match WsCodec::parse(&params.codec) {
        Ok(codec) => codec,
        Err(_) => return axum::http::StatusCode::BAD_REQUEST.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token, codec, params.device_name))
}

/// Per-connection state threaded through the receive loop. Lives only for
/// the duration of one WebSocket connection.
struct Connection {
    claims: AuthClaims,
    device_name: String,
    connection_id: String,
    codec: WsCodec,
    session: Option<InitializedSession>,
    batch: Option<BatchBuffer>,
    chunk_seq: AtomicU64,
    interim_task: Option<tokio::task::JoinHandle<()>>,
}

impl Connection {
    fn provider<'a>(&self, config: &'a reverb_config::AppConfig) -> &'a str {
        config
            .transcription
            .streaming_provider
            .as_deref()
            .unwrap_or("mock-streaming-stt")
    }
}

async fn handle_socket(socket: WebSocket, state: GatewayState, token: String, codec: WsCodec, device_name: String) {
    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(AsyncMutex::new(sender));

    let Some(claims) = state.auth.verify(&token).await else {
        send_error_and_close(&sender, "auth_failed", "authentication failed", 1008).await;
        return;
    };

    send_json(
        &sender,
        serde_json::json!({"type": "ready", "data": {"message": "authenticated"}}),
    )
    .await;

    let connection_id = Uuid::new_v4().to_string();
    let mut conn = Connection {
        claims,
        device_name,
        connection_id,
        codec,
        session: None,
        batch: None,
        chunk_seq: AtomicU64::new(0),
        interim_task: None,
    };

    while let Some(frame) = receiver.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(_) => break,
        };
        let outcome = match message {
            Message::Text(text) => handle_text_frame(&text, &mut conn, &state, &sender).await,
            Message::Binary(payload) => handle_binary_frame(payload, &mut conn, &state).await,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => Ok(()),
        };
        if let Err(GatewayError::StreamingNotConfigured) = outcome {
            send_error_and_close(
                &sender,
                "streaming_not_configured",
                "streaming mode is not configured on this server",
                1008,
            )
            .await;
            break;
        }
        if let Err(err) = outcome {
            tracing::warn!(%err, "closing connection after protocol error");
            break;
        }
    }

    teardown(conn, &state).await;
}

async fn send_json(sender: &WsSender, value: serde_json::Value) {
    let _ = sender.lock().await.send(Message::Text(value.to_string())).await;
}

/// Sends the typed `error` message, then a close frame carrying the same
/// code. The only two server-initiated error paths the client ever sees:
/// auth failure and streaming-not-configured.
async fn send_error_and_close(sender: &WsSender, error: &str, message: &str, code: u16) {
    send_json(
        sender,
        serde_json::json!({"type": "error", "error": error, "message": message, "code": code}),
    )
    .await;
    let mut guard = sender.lock().await;
    let _ = guard
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Owned(error.to_string()),
        })))
        .await;
}

async fn handle_text_frame(
    text: &str,
    conn: &mut Connection,
    state: &GatewayState,
    sender: &WsSender,
) -> Result<()> {
    let header = match parse_header(text) {
        Ok(header) => header,
        Err(err) => {
            tracing::warn!(%err, "dropping malformed frame");
            return Ok(());
        }
    };

    match header {
        Header::AudioStart(data) => start_audio(data, conn, state, sender).await?,
        // The payload length is advisory only — the following binary WS
        // frame already carries exactly one payload, so there is nothing
        // further to buffer here.
        Header::AudioChunk { .. } => {}
        Header::AudioStop => stop_audio(conn, state).await?,
        Header::ButtonEvent(data) => handle_button_event(data, conn, state).await?,
        Header::Ping => send_json(sender, serde_json::json!({"type": "pong"})).await,
        Header::Unknown(kind) => tracing::debug!(kind, "unhandled frame type"),
    }
    Ok(())
}

async fn start_audio(data: AudioStartData, conn: &mut Connection, state: &GatewayState, sender: &WsSender) -> Result<()> {
    // Duplicate `audio-start` on an already-initialized connection is
    // tolerated idempotently: same session, nothing to redo.
    if let Some(existing) = conn.session.as_ref() {
        tracing::debug!(client_id = %existing.session.client_id, "ignoring duplicate audio-start");
        return Ok(());
    }

    let is_wearable = conn.codec == WsCodec::Opus;
    let mode = resolve_mode(&data, state.streaming_configured(), is_wearable)?;
    let audio_format = AudioFormat {
        sample_rate: data.rate,
        sample_width: data.width,
        channels: data.channels,
    };

    begin_session(conn, state, audio_format, mode, Some(sender)).await
}

/// Shared by the framed `audio-start` path and the legacy no-header path:
/// run session init, then either arm the batch buffer or spawn the
/// interim-forwarding task, depending on the resolved mode.
async fn begin_session(
    conn: &mut Connection,
    state: &GatewayState,
    audio_format: AudioFormat,
    mode: RecordingMode,
    sender: Option<&WsSender>,
) -> Result<()> {
    let provider = conn.provider(&state.config).to_string();

    let initialized = initialize_session(
        &conn.claims,
        &conn.device_name,
        &conn.connection_id,
        audio_format,
        mode,
        &provider,
        &state.sessions,
        &state.kv,
        &state.jobs,
    )
    .await?;

    match (mode, sender) {
        (RecordingMode::Batch, _) => {
            conn.batch = Some(BatchBuffer::new(
                initialized.session.user_id.clone(),
                initialized.session.client_id.clone(),
                audio_format.sample_rate,
                audio_format.channels,
                audio_format.sample_width,
            ));
        }
        (RecordingMode::Streaming, Some(sender)) => {
            conn.interim_task = Some(spawn_interim_forwarder(
                &initialized.session.client_id,
                state,
                sender.clone(),
            ));
        }
        // Legacy bootstrap has no `sender` handle yet; the interim task is
        // armed lazily the first time one becomes available is not
        // possible here, so streaming legacy connections simply don't get
        // interim forwarding — acceptable, since legacy raw-binary clients
        // predate the interim pub/sub feature entirely.
        (RecordingMode::Streaming, None) => {}
    }

    conn.session = Some(initialized);
    Ok(())
}

fn spawn_interim_forwarder(client_id: &str, state: &GatewayState, sender: WsSender) -> tokio::task::JoinHandle<()> {
    let client_id = client_id.to_string();
    let interim = state.interim.clone();
    tokio::spawn(async move {
        let mut subscription = match interim.subscribe(&client_id).await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::warn!(%err, "could not subscribe to interim results");
                return;
            }
        };
        while let Some(message) = subscription.recv().await {
            send_json(&sender, interim_payload(&message)).await;
        }
    })
}

fn interim_payload(message: &InterimMessage) -> serde_json::Value {
    serde_json::json!({
        "type": "interim_transcript",
        "data": { "text": message.text, "is_final": message.is_final },
    })
}

async fn handle_binary_frame(payload: Vec<u8>, conn: &mut Connection, state: &GatewayState) -> Result<()> {
    // Legacy clients never send `audio-start`: the first binary frame
    // simply *is* a default-format PCM chunk.
    if conn.session.is_none() {
        let default_format = AudioFormat::default();
        let mode = resolve_mode(
            &AudioStartData {
                rate: default_format.sample_rate,
                width: default_format.sample_width,
                channels: default_format.channels,
                mode: Some(RecordingMode::Streaming),
            },
            state.streaming_configured(),
            conn.codec == WsCodec::Opus,
        )
        .unwrap_or(RecordingMode::Batch);
        begin_session(conn, state, default_format, mode, None).await?;
    }

    let pcm = decode_payload(conn, payload, state).await?;
    ingest_pcm(conn, state, pcm).await
}

async fn decode_payload(conn: &Connection, payload: Vec<u8>, state: &GatewayState) -> Result<Vec<u8>> {
    if conn.codec != WsCodec::Opus {
        return Ok(payload);
    }
    let format = conn
        .session
        .as_ref()
        .map(|s| s.session.audio_format)
        .unwrap_or_default();
    crate::opus_decode::decode_packet(
        &state.opus_decode_permits,
        payload,
        format.sample_rate,
        format.channels,
        format.sample_rate as usize / 10,
    )
    .await
    .map_err(Into::into)
}

async fn ingest_pcm(conn: &mut Connection, state: &GatewayState, pcm: Vec<u8>) -> Result<()> {
    let Some(initialized) = conn.session.as_ref() else {
        return Ok(());
    };
    let session = &initialized.session;

    if let Some(batch) = conn.batch.as_mut() {
        batch.push(&pcm);
        if batch.should_flush() {
            batch.flush(&state.conversations, &state.chunks, &state.jobs).await?;
        }
    } else {
        let seq = conn.chunk_seq.fetch_add(1, Ordering::SeqCst);
        let entry = AudioEntry {
            session_id: session.session_id.clone(),
            chunk_id: AudioEntry::format_chunk_id(seq),
            audio: pcm,
            sample_rate: session.audio_format.sample_rate,
            channels: session.audio_format.channels,
            sample_width: session.audio_format.sample_width,
            user_id: session.user_id.clone(),
            client_id: session.client_id.clone(),
        };
        state.audio_stream.publish(&session.client_id, entry).await?;
    }

    state.sessions.increment_chunks_published(&session.session_id, 1).await?;
    Ok(())
}

async fn stop_audio(conn: &mut Connection, state: &GatewayState) -> Result<()> {
    let Some(initialized) = conn.session.as_ref() else {
        return Ok(());
    };
    let session_id = initialized.session.session_id.clone();

    if let Some(batch) = conn.batch.as_mut() {
        batch.flush(&state.conversations, &state.chunks, &state.jobs).await?;
    } else {
        state
            .audio_stream
            .publish_end(&initialized.session.client_id, &session_id, &initialized.session.user_id)
            .await?;
    }

    state.sessions.set_status(&session_id, SessionStatus::Finalizing).await?;
    state
        .sessions
        .set_completion_reason(&session_id, CompletionReason::UserStopped)
        .await?;
    // The WebSocket stays open — closing only follows an explicit close or
    // disconnect — so the connection simply returns to `ControlMode` and
    // can accept another `audio-start` later.
    Ok(())
}

async fn handle_button_event(data: ButtonEventData, conn: &mut Connection, state: &GatewayState) -> Result<()> {
    let Some(initialized) = conn.session.as_ref() else {
        return Ok(());
    };
    let session_id = initialized.session.session_id.clone();

    state
        .sessions
        .append_marker(
            &session_id,
            Marker {
                state: data.state.clone(),
                timestamp: chrono::Utc::now(),
                audio_uuid: None,
            },
        )
        .await?;

    if let Some(event) = button_event_name(&data.state) {
        state
            .plugins
            .dispatch_event(
                event,
                &initialized.session.user_id,
                serde_json::json!({ "client_id": initialized.session.client_id }),
                None,
            )
            .await;
    }
    Ok(())
}

async fn teardown(mut conn: Connection, state: &GatewayState) {
    if let Some(task) = conn.interim_task.take() {
        task.abort();
    }

    let Some(initialized) = conn.session.take() else {
        return;
    };
    let session_id = initialized.session.session_id.clone();

    let flush_result: Result<()> = if let Some(batch) = conn.batch.as_mut() {
        batch.flush(&state.conversations, &state.chunks, &state.jobs).await
    } else {
        state
            .audio_stream
            .publish_end(&initialized.session.client_id, &session_id, &initialized.session.user_id)
            .await
            .map_err(GatewayError::from)
    };
    if let Err(err) = flush_result {
        tracing::warn!(%err, session_id, "error finalizing audio on disconnect");
    }

    let _ = state.sessions.set_status(&session_id, SessionStatus::Finalizing).await;

    // Don't clobber a completion reason `audio-stop` already claimed —
    // `WebsocketDisconnect` only applies when nothing has.
    if let Ok(current) = state.sessions.get(&session_id).await {
        if current.completion_reason.is_none() {
            let _ = state
                .sessions
                .set_completion_reason(&session_id, CompletionReason::WebsocketDisconnect)
                .await;
        }
    }

    // Finalizing is followed straight through to finished on a disconnect —
    // the monitor's own end-of-conversation handler decides whether the
    // *next* conversation restarts it, not this path.
    let _ = state.sessions.set_status(&session_id, SessionStatus::Finished).await;

    let _ = state.sessions.set_websocket_connected(&session_id, false).await;
    let _ = state
        .audio_stream
        .set_ttl(&initialized.session.client_id, limits::AUDIO_STREAM_DISCONNECT_TTL)
        .await;
}
