//! WebSocket transport adapter: accepts connections, feeds decoded frames to
//! the [`RelayEngine`], and owns one writer task per connection.
//!
//! Outbound frames are pushed onto each connection's bounded outbox and
//! written by that connection's writer task, so a slow recipient only
//! stalls its own socket. A recipient whose outbox fills up is evicted
//! instead of buffering without limit. Every close path (close frame, read
//! error, write error, dropped TCP stream, eviction, server shutdown) ends
//! in the same cleanup: stop both tasks, detach the outbox, then let the
//! engine unregister the connection and notify its rooms.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use roomcast_proto::codec::{self, Frame};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc, watch};

use crate::engine::{RelayEngine, Transport};
use crate::registry::ConnectionId;

/// Default maximum accepted inbound frame size in bytes (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default number of frames a connection may have queued before it is
/// evicted as a slow consumer.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;

/// Errors that can occur when starting the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The TCP listener could not be bound or inspected.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

struct OutboxSender {
    frames: mpsc::Sender<Message>,
    evicted: Arc<Notify>,
}

/// Receiving side of a connection's outbox, owned by its socket tasks.
pub struct Outbox {
    /// Identifier allocated for the connection.
    pub id: ConnectionId,
    /// Frames waiting to be written to the socket.
    pub frames: mpsc::Receiver<Message>,
    /// Notified once if the transport evicts the connection.
    pub evicted: Arc<Notify>,
}

/// Outbound channels for every live WebSocket connection.
pub struct WsTransport {
    outboxes: RwLock<HashMap<ConnectionId, OutboxSender>>,
    next_id: AtomicU64,
    outbox_capacity: usize,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl WsTransport {
    /// Creates a transport whose outboxes hold up to `outbox_capacity`
    /// frames each.
    #[must_use]
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            outboxes: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            outbox_capacity: outbox_capacity.max(1),
        }
    }

    /// Allocates an id for a newly accepted connection and attaches its
    /// outbox.
    pub fn open(&self) -> Outbox {
        let id = ConnectionId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        let evicted = Arc::new(Notify::new());
        self.outboxes.write().insert(
            id,
            OutboxSender {
                frames: tx,
                evicted: Arc::clone(&evicted),
            },
        );
        Outbox {
            id,
            frames: rx,
            evicted,
        }
    }

    /// Detaches a connection's outbox. Returns `false` if it was not attached.
    pub fn detach(&self, id: ConnectionId) -> bool {
        self.outboxes.write().remove(&id).is_some()
    }

    /// Number of attached connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.outboxes.read().len()
    }

    /// Asks one connection's writer to send a close frame and stop.
    pub fn close(&self, id: ConnectionId) {
        tracing::info!(conn = %id, "sending close frame");
        self.push(id, Message::Close(None));
    }

    /// Asks every connection's writer to send a close frame and stop.
    pub fn close_all(&self) {
        let ids: Vec<ConnectionId> = self.outboxes.read().keys().copied().collect();
        for id in ids {
            self.close(id);
        }
    }

    fn push(&self, to: ConnectionId, msg: Message) -> bool {
        let result = {
            let outboxes = self.outboxes.read();
            let Some(outbox) = outboxes.get(&to) else {
                tracing::debug!(conn = %to, "no outbox for connection");
                return false;
            };
            outbox.frames.try_send(msg)
        };

        match result {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(conn = %to, "outbound send failed");
                false
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    conn = %to,
                    capacity = self.outbox_capacity,
                    "outbox full, evicting slow connection"
                );
                if let Some(outbox) = self.outboxes.write().remove(&to) {
                    outbox.evicted.notify_one();
                }
                false
            }
        }
    }
}

impl Transport for WsTransport {
    fn send(&self, to: ConnectionId, frame: &Frame) -> bool {
        match codec::encode(frame) {
            Ok(text) => self.push(to, Message::Text(Utf8Bytes::from(text))),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode outbound frame");
                false
            }
        }
    }

    fn deliver(&self, recipients: &[ConnectionId], frame: &Frame) -> usize {
        if recipients.is_empty() {
            return 0;
        }
        let text = match codec::encode(frame) {
            Ok(text) => Utf8Bytes::from(text),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode outbound frame");
                return 0;
            }
        };
        recipients
            .iter()
            .filter(|id| self.push(**id, Message::Text(text.clone())))
            .count()
    }
}

/// Shared relay server state: the engine plus transport limits.
pub struct RelayState {
    /// Event processor and membership tables.
    pub engine: RelayEngine<WsTransport>,
    /// Maximum accepted inbound frame size in bytes.
    max_frame_size: usize,
    /// Flipped to `true` once shutdown starts.
    stopping: watch::Sender<bool>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_FRAME_SIZE, DEFAULT_OUTBOX_CAPACITY)
    }

    /// Creates relay state with a custom frame size limit and outbox
    /// capacity.
    #[must_use]
    pub fn with_limits(max_frame_size: usize, outbox_capacity: usize) -> Self {
        Self {
            engine: RelayEngine::new(WsTransport::new(outbox_capacity)),
            max_frame_size,
            stopping: watch::Sender::new(false),
        }
    }

    /// Returns the configured inbound frame size limit.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.stopping.borrow()
    }

    /// Stops accepting connections, closes every live one, and waits up to
    /// `grace` for their cleanup paths to finish.
    pub async fn shutdown(&self, grace: Duration) {
        self.stopping.send_replace(true);
        let transport = self.engine.transport();
        transport.close_all();

        let drained = tokio::time::timeout(grace, async {
            while transport.connection_count() > 0 || self.engine.stats().connections > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = transport.connection_count(),
                "connections still open after shutdown grace period"
            );
        }
    }
}

/// Handles an upgraded WebSocket connection for its whole lifetime.
///
/// 1. Open an outbox (allocating the `ConnectionId`), register with the engine.
/// 2. Spawn a writer task draining the outbox onto the socket.
/// 3. Read frames and dispatch them to the engine.
/// 4. When either side stops or the connection is evicted, wait for both
///    tasks to finish, then detach and unregister.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let Outbox {
        id,
        frames: mut rx,
        evicted,
    } = state.engine.transport().open();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    state.engine.on_connect(id);
    if state.is_shutting_down() {
        state.engine.transport().close(id);
    }

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn = %id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => handle_inbound(id, text.as_bytes(), &reader_state),
                Message::Binary(data) => handle_inbound(id, &data, &reader_state),
                Message::Close(_) => {
                    tracing::info!(conn = %id, "received close frame");
                    break;
                }
                _ => {
                    // Ping/pong are answered by the WebSocket layer.
                }
            }
        }
    });

    // The reader may be inside a synchronous engine call; an aborted task
    // only stops at its next await, so wait for it before unregistering.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
            let _ = write_task.await;
        }
        _ = &mut write_task => {
            read_task.abort();
            let _ = read_task.await;
        }
        () = evicted.notified() => {
            read_task.abort();
            write_task.abort();
            let _ = tokio::join!(read_task, write_task);
        }
    }

    state.engine.transport().detach(id);
    state.engine.on_disconnect(id);
}

/// Decodes one inbound frame and hands it to the engine.
fn handle_inbound(id: ConnectionId, data: &[u8], state: &RelayState) {
    match codec::decode_limited(data, state.max_frame_size) {
        Ok(frame) => state.engine.on_frame(id, frame),
        Err(e) => tracing::warn!(conn = %id, error = %e, "dropping inbound frame"),
    }
}

/// Starts the relay server on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// The listener stops accepting once [`RelayState::shutdown`] is called.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the TCP listener cannot bind.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
    let bind_err = |source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    };

    let mut stopping = state.stopping.subscribe();
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(bind_err)?;
    let bound_addr = listener.local_addr().map_err(bind_err)?;

    let handle = tokio::spawn(async move {
        let stop = async move {
            let _ = stopping.wait_for(|stopped| *stopped).await;
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stop).await {
            tracing::error!(error = %e, "relay server error");
        }
        tracing::info!("relay listener stopped");
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing on an OS-assigned port.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> Response {
    if state.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}
