//! Connection handlers for the Relay server.
//!
//! This module owns the connection lifecycle: WebSocket upgrade, session
//! handshake, the per-connection event loop, and teardown.

use crate::auth::JwtVerifier;
use crate::config::Config;
use crate::directory::StaticDirectory;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use relay_core::{
    Broadcaster, ConnectionHandle, ConnectionId, Outbound, Registry, SessionHandshake,
};
use relay_protocol::{codec, ClientEvent, ProtocolError};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Header carrying the bearer credential on the upgrade request.
const AUTHENTICATION_HEADER: &str = "authentication";

/// Shared server state.
pub struct AppState {
    /// The connection registry.
    pub registry: Arc<Registry>,
    /// Fan-out router over the registry.
    pub broadcaster: Broadcaster,
    /// Handshake orchestrator.
    pub handshake: SessionHandshake,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(Registry::new());
        let verifier = Arc::new(JwtVerifier::new(&config.auth.jwt_secret));
        let directory = Arc::new(StaticDirectory::from_seeds(&config.principals));

        let handshake = SessionHandshake::new(verifier, directory, registry.clone())
            .with_timeout(Duration::from_millis(config.auth.handshake_timeout_ms));
        let broadcaster = Broadcaster::new(registry.clone());

        Self {
            registry,
            broadcaster,
            handshake,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    info!(principals = config.principals.len(), "Directory seeded");

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
///
/// The bearer credential travels in the `authentication` header of the
/// upgrade request; it is captured here and handed to the handshake.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let credential = headers
        .get(AUTHENTICATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(String::from);

    ws.on_upgrade(move |socket| handle_websocket(socket, credential, state))
}

/// Handle a WebSocket connection from accept to teardown.
async fn handle_websocket(socket: WebSocket, credential: Option<String>, state: Arc<AppState>) {
    let connection_id = ConnectionId::generate();
    debug!(connection = %connection_id, "WebSocket connected");

    let (handle, mut outbound_rx) = ConnectionHandle::channel(connection_id.clone());

    // Accept -> Authenticating. Rejected peers get the transport dropped
    // with no reason payload.
    let session = match state.handshake.admit(handle, credential.as_deref()).await {
        Ok(session) => session,
        Err(e) => {
            debug!(connection = %connection_id, error = %e, "Handshake rejected");
            metrics::record_auth_failure();
            return;
        }
    };

    // Record connection metrics; only registered connections count.
    let _metrics_guard = ConnectionMetricsGuard::new();
    metrics::record_broadcast("presence");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Read buffer for partial events
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Event loop: outbound commands are drained with priority so a forced
    // close is observed promptly.
    'session: loop {
        tokio::select! {
            biased;

            Some(cmd) = outbound_rx.recv() => {
                match cmd {
                    Outbound::Deliver(event) => {
                        match codec::encode(event.as_ref()) {
                            Ok(data) => {
                                metrics::record_message(data.len(), "outbound");
                                if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                                    break 'session;
                                }
                            }
                            Err(e) => {
                                error!(connection = %connection_id, error = %e, "Failed to encode event");
                                metrics::record_error("encode");
                            }
                        }
                    }
                    Outbound::Close => {
                        debug!(connection = %connection_id, "Force-closed (session replaced)");
                        break 'session;
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        if let Err(e) =
                            dispatch_buffered(&mut read_buffer, &state.broadcaster, &connection_id)
                        {
                            warn!(connection = %connection_id, error = %e, "Protocol error");
                            metrics::record_error("protocol");
                            break 'session;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        metrics::record_message(text.len(), "inbound");
                        read_buffer.extend_from_slice(text.as_bytes());

                        if let Err(e) =
                            dispatch_buffered(&mut read_buffer, &state.broadcaster, &connection_id)
                        {
                            warn!(connection = %connection_id, error = %e, "Protocol error");
                            metrics::record_error("protocol");
                            break 'session;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break 'session;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break 'session;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break 'session;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break 'session;
                    }
                }
            }
        }
    }

    // Registered -> Closed: idempotent removal plus presence announcement.
    session.close();
    metrics::record_broadcast("presence");

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Drain every complete event out of the read buffer and dispatch it.
///
/// Called after any frame extends the buffer, so an event split across
/// frames is dispatched as soon as the frame that completes it arrives,
/// whether that frame was binary or text.
fn dispatch_buffered(
    read_buffer: &mut BytesMut,
    broadcaster: &Broadcaster,
    connection_id: &ConnectionId,
) -> Result<(), ProtocolError> {
    while let Some(event) = codec::decode_from::<ClientEvent>(read_buffer)? {
        match event {
            ClientEvent::MessageFromClient { message } => {
                broadcaster.handle_chat(connection_id, message);
                metrics::record_broadcast("chat");
            }
        }
    }
    Ok(())
}
