//! Connection handlers for the Huddle server.
//!
//! A connection goes through two phases. First the login: the client has
//! `login_timeout_ms` to send a `login` frame naming its room, and gets a
//! `welcome` or an `error` back. Then the session: `chat` frames are handed to
//! the room, and room events are written straight to the socket by the
//! participant's sink. The session ends when either side goes away.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use huddle_core::{ChatError, ChatService, EventWriter, Participant, SinkError};
use huddle_protocol::{codec, ClientFrame, ErrorCode, ProtocolError, ServerFrame, PROTOCOL_VERSION};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Shared server state.
pub struct AppState {
    /// The chat service.
    pub service: ChatService,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state, starting the chat service.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            service: ChatService::new(config.room_config()),
            config,
        }
    }
}

/// Why a connection stopped reading.
#[derive(Debug, Error)]
enum ConnectionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

/// Room events written to the socket.
struct WsWriter {
    sender: WsSender,
}

#[async_trait]
impl EventWriter for WsWriter {
    async fn write(&mut self, event: &ServerFrame) -> Result<(), SinkError> {
        let data = codec::encode(event).map_err(|e| SinkError::WriteFailed(e.to_string()))?;
        metrics::record_bytes(data.len(), "outbound");

        self.sender
            .lock()
            .await
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let state = Arc::new(AppState::new(config));
    serve(listener, state, shutdown_signal()).await
}

/// Serve on `listener` until `shutdown` resolves, then stop every room.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve<S>(listener: TcpListener, state: Arc<AppState>, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let service = state.service.clone();
    tokio::spawn(metrics::track_active_rooms(service.watch_room_count()));

    // Rooms go first: that disconnects every participant, which lets the
    // websocket tasks finish and the server drain.
    let drain = async move {
        shutdown.await;
        info!("Shutting down, stopping all rooms");
        if let Err(e) = service.shutdown().await {
            warn!(error = %e, "Room shutdown incomplete");
        }
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(drain)
        .await?;

    info!("Huddle server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = match state.service.stats().await {
        Ok(stats) => {
            serde_json::json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "rooms": stats.room_count,
                "rooms_created": stats.rooms_created,
            })
        }
        Err(_) => serde_json::json!({
            "status": "stopping",
            "version": env!("CARGO_PKG_VERSION"),
        }),
    };

    axum::Json(body)
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(Mutex::new(sender));
    let mut read_buffer = BytesMut::with_capacity(4096);

    let Some(participant) = login(&state, &sender, &mut receiver, &mut read_buffer).await else {
        close(&sender).await;
        return;
    };

    debug!(
        participant = %participant.id(),
        user = %participant.user_name(),
        room = %participant.room().key(),
        "WebSocket session started"
    );

    loop {
        tokio::select! {
            () = participant.departed() => {
                debug!(participant = %participant.id(), "Participant departed, closing connection");
                break;
            }

            frame = read_frame(&mut receiver, &mut read_buffer) => match frame {
                Ok(Some(ClientFrame::Chat { text })) => {
                    metrics::record_chat();
                    if participant.send_chat(text).is_err() {
                        break;
                    }
                }
                Ok(Some(ClientFrame::Login { .. })) => {
                    warn!(participant = %participant.id(), "Ignoring repeated login");
                    metrics::record_error("repeated_login");
                }
                Ok(None) => {
                    debug!(participant = %participant.id(), "WebSocket stream ended");
                    break;
                }
                Err(e) => {
                    warn!(participant = %participant.id(), error = %e, "Connection read failed");
                    metrics::record_error("read");
                    break;
                }
            }
        }
    }

    participant.disconnect();
    close(&sender).await;

    debug!(participant = %participant.id(), "WebSocket disconnected");
}

/// Run the login handshake. On failure the client has been sent an error.
async fn login(
    state: &AppState,
    sender: &WsSender,
    receiver: &mut SplitStream<WebSocket>,
    read_buffer: &mut BytesMut,
) -> Option<Participant> {
    let first = tokio::time::timeout(
        state.config.login_timeout(),
        read_frame(receiver, read_buffer),
    )
    .await;

    let frame = match first {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => {
            debug!("Connection closed before login");
            return None;
        }
        Ok(Err(e)) => {
            reject(sender, "malformed", ErrorCode::MalformedFrame, e.to_string()).await;
            return None;
        }
        Err(_) => {
            reject(sender, "timeout", ErrorCode::LoginTimeout, "No login received").await;
            return None;
        }
    };

    let (version, room, user_name) = match frame {
        ClientFrame::Login {
            version,
            room,
            user_name,
        } => (version, room, user_name),
        other => {
            let message = format!("Expected login, got {}", other.kind());
            reject(sender, "expected_login", ErrorCode::ExpectedLogin, message).await;
            return None;
        }
    };

    let Some(version) = PROTOCOL_VERSION.negotiate(version) else {
        let message = format!("Server speaks {PROTOCOL_VERSION}, client speaks {version}");
        reject(sender, "version", ErrorCode::IncompatibleVersion, message).await;
        return None;
    };

    if user_name.len() > state.config.limits.max_name_length {
        reject(sender, "invalid_name", ErrorCode::InvalidName, "User name too long").await;
        return None;
    }

    let started = Instant::now();

    // Hold the socket until the welcome is out, so no room event overtakes it.
    let mut outbound = Arc::clone(sender).lock_owned().await;

    let writer = WsWriter {
        sender: Arc::clone(sender),
    };
    let participant = match state.service.login_and_join(&room, &user_name, writer).await {
        Ok(participant) => participant,
        Err(e) => {
            drop(outbound);
            let (reason, code) = match &e {
                ChatError::InvalidRoomKey(_) => ("invalid_room", ErrorCode::InvalidRoom),
                ChatError::InvalidUserName(_) => ("invalid_name", ErrorCode::InvalidName),
                ChatError::Room(_) | ChatError::Registry(_) => ("unavailable", ErrorCode::Internal),
            };
            reject(sender, reason, code, e.to_string()).await;
            return None;
        }
    };

    let heartbeat = u32::try_from(state.service.heartbeat_interval().as_millis()).unwrap_or(u32::MAX);
    let welcome = ServerFrame::welcome(participant.id().get(), version, heartbeat);

    let sent = match codec::encode(&welcome) {
        Ok(data) => {
            metrics::record_bytes(data.len(), "outbound");
            outbound.send(Message::Binary(data.to_vec())).await.is_ok()
        }
        Err(e) => {
            error!(error = %e, "Failed to encode welcome");
            false
        }
    };
    drop(outbound);

    if !sent {
        participant.disconnect();
        metrics::record_login("welcome_failed", 0.0);
        return None;
    }

    metrics::record_login("ok", started.elapsed().as_secs_f64());

    info!(
        participant = %participant.id(),
        user = %participant.user_name(),
        room = %room,
        version = %version,
        "Login accepted"
    );

    Some(participant)
}

/// Send an error frame for a failed login.
async fn reject(sender: &WsSender, reason: &'static str, code: ErrorCode, message: impl Into<String>) {
    let message = message.into();
    debug!(reason, code = ?code, message = %message, "Login rejected");
    metrics::record_login(reason, 0.0);

    let frame = ServerFrame::error(code, message);
    if let Ok(data) = codec::encode(&frame) {
        metrics::record_bytes(data.len(), "outbound");
        let _ = sender.lock().await.send(Message::Binary(data.to_vec())).await;
    }
}

async fn close(sender: &WsSender) {
    let _ = sender.lock().await.close().await;
}

/// Read the next client frame, buffering partial ones.
///
/// Returns `Ok(None)` once the client has closed the connection.
async fn read_frame(
    receiver: &mut SplitStream<WebSocket>,
    buffer: &mut BytesMut,
) -> Result<Option<ClientFrame>, ConnectionError> {
    loop {
        if let Some(frame) = codec::decode_from(buffer)? {
            return Ok(Some(frame));
        }

        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => {
                metrics::record_bytes(data.len(), "inbound");
                buffer.extend_from_slice(&data);
            }
            Some(Ok(Message::Text(text))) => {
                // Treat text as binary
                buffer.extend_from_slice(text.as_bytes());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Err(e)) => return Err(e.into()),
        }
    }
}
