//! WebSocket transport for greeter sessions.

use std::{
    io::ErrorKind,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use greeter_core::{
    ConfigError, Connection, ConnectionError, Session, SessionConfig, Termination,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A WebSocket seen as a plain-text `Connection`.
///
/// Each Text frame is one message. Binary frames are accepted when they
/// hold valid UTF-8 and skipped otherwise. Sends go through a single
/// lock so frames from concurrent senders are never interleaved.
pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    closed: AtomicBool,
}

impl WsConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }

    /// Finish the closing handshake, ignoring failures.
    ///
    /// If the peer already closed, the socket has queued its Close reply
    /// and only needs a flush; otherwise a Close frame with `code` is sent.
    pub async fn close(&self, code: u16, reason: &str) {
        let mut sink = self.sink.lock().await;
        if !self.closed.load(Ordering::Acquire) {
            let frame = CloseFrame {
                code,
                reason: reason.into(),
            };
            match sink.send(Message::Close(Some(frame))).await {
                Ok(()) => return,
                Err(e) => tracing::trace!("Close frame not sent: {e}"),
            }
        }
        if let Err(e) = sink.flush().await {
            tracing::trace!("Close reply not flushed: {e}");
        }
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn send_error(&self, e: &axum::Error) -> ConnectionError {
        if self.closed.load(Ordering::Acquire) || is_closed_error(e) {
            self.mark_closed();
            ConnectionError::Closed
        } else {
            ConnectionError::Transport(e.to_string())
        }
    }
}

/// Errors tungstenite reports once the socket is closing or closed.
const CLOSED_MESSAGES: [&str; 3] = [
    "Connection closed normally",
    "Trying to work with closed connection",
    "Sending after closing is not allowed",
];

/// Whether a send error means the peer is gone rather than a fault.
fn is_closed_error(e: &axum::Error) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
            ) {
                return true;
            }
        }
        let message = err.to_string();
        if CLOSED_MESSAGES.iter().any(|m| message.contains(m)) {
            return true;
        }
        current = err.source();
    }
    false
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&self, text: &str) -> Result<(), ConnectionError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| self.send_error(&e))
    }

    async fn recv(&self) -> Result<Option<String>, ConnectionError> {
        let mut stream = self.stream.lock().await;
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(s) => return Ok(Some(s)),
                    Err(_) => {
                        tracing::debug!("Skipping non UTF-8 binary frame");
                    }
                },
                Ok(Message::Close(_)) => {
                    self.mark_closed();
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) => return Err(ConnectionError::Transport(e.to_string())),
            }
        }
        self.mark_closed();
        Ok(None)
    }
}

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Settings shared by every session.
    pub config: Arc<SessionConfig>,
    /// Cancelled on server shutdown; stops all sessions.
    pub shutdown: CancellationToken,
}

impl WsState {
    /// Create new WebSocket state.
    ///
    /// # Errors
    /// Returns error if `config` is rejected by `SessionConfig::validate`.
    pub fn new(
        config: impl Into<Arc<SessionConfig>>,
        shutdown: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let config = config.into();
        config.validate()?;
        Ok(Self { config, shutdown })
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let conn = Arc::new(WsConnection::new(socket));
    let session = match Session::new(Arc::clone(&state.config)) {
        Ok(session) => session.with_shutdown(state.shutdown.clone()),
        Err(e) => {
            tracing::error!("Rejecting WebSocket: {e}");
            conn.close(close_code::ERROR, "invalid configuration").await;
            return;
        }
    };
    let session_id = session.id();

    let (code, reason) = match session.run(Arc::clone(&conn)).await {
        Ok(Termination::PeerClosed) => (close_code::NORMAL, ""),
        Ok(Termination::Shutdown) => (close_code::AWAY, "server shutting down"),
        Err(e) => {
            tracing::debug!(%session_id, "Closing socket after error: {e}");
            (close_code::ERROR, "session error")
        }
    };

    conn.close(code, reason).await;
    tracing::debug!(%session_id, "WebSocket disconnected");
}

/// Create WebSocket router.
///
/// Both `/` and `/ws` upgrade to a session.
///
/// # Example
/// ```ignore
/// let app = create_ws_router(WsState::new(SessionConfig::default(), shutdown)?);
/// ```
#[must_use]
pub fn create_ws_router(state: WsState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}
