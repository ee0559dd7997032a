use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::LocalClient;
use crate::error::DgLabError;
use crate::hub::Hub;
use crate::message::{KIND_BIND, WireMessage};

// ---------------------------------------------------------------------------
// DgLabServer
// ---------------------------------------------------------------------------

/// Peers that connect but never finish the upgrade are dropped after this.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Websocket server the Coyote app connects to.
///
/// Every task the server spawns (accept loop, heartbeat, one per app
/// connection) is tracked and stops when the server is shut down or dropped.
pub struct DgLabServer {
    local_addr: SocketAddr,
    hub: Arc<Hub>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for DgLabServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DgLabServer")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.cancel.is_cancelled())
            .finish()
    }
}

impl DgLabServer {
    /// Bind `host:port` and start serving. Port 0 picks an ephemeral port.
    pub async fn start(host: &str, port: u16, heartbeat: Duration) -> Result<Self, DgLabError> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, heartbeat_secs = heartbeat.as_secs_f64(), "dglab server listening");

        let cancel = CancellationToken::new();
        let hub = Arc::new(Hub::new(cancel.child_token()));
        let tracker = TaskTracker::new();

        tracker.spawn(serve(
            listener,
            Arc::clone(&hub),
            cancel.clone(),
            tracker.clone(),
        ));
        if !heartbeat.is_zero() {
            tracker.spawn(heartbeat_loop(Arc::clone(&hub), heartbeat, cancel.clone()));
        }

        Ok(Self {
            local_addr,
            hub,
            cancel,
            tracker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register a new local control client on this server.
    pub fn local_client(&self) -> LocalClient {
        LocalClient::new(self.hub.register_local(), Arc::clone(&self.hub))
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Notify bound apps, stop every task and wait for them to finish.
    pub async fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(addr = %self.local_addr, "dglab server shutting down");
        }
        self.hub.close();
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Drop for DgLabServer {
    fn drop(&mut self) {
        self.hub.close();
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

async fn serve(listener: TcpListener, hub: Arc<Hub>, cancel: CancellationToken, tracker: TaskTracker) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "dglab: TCP connection accepted");
                        let hub = Arc::clone(&hub);
                        let cancel = cancel.clone();
                        tracker.spawn(async move {
                            if let Err(e) = handle_app(stream, hub, cancel).await {
                                tracing::debug!(peer = %peer, error = %e, "dglab app handler finished with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "dglab: TCP accept failed");
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!("dglab accept loop: cancellation requested");
                break;
            }
        }
    }
}

async fn heartbeat_loop(hub: Arc<Hub>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => hub.heartbeat(),
            _ = cancel.cancelled() => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-app handler
// ---------------------------------------------------------------------------

async fn handle_app(stream: TcpStream, hub: Arc<Hub>, cancel: CancellationToken) -> Result<(), DgLabError> {
    let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream));
    let ws_stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        result = handshake => match result {
            Ok(ws_stream) => ws_stream?,
            Err(_) => {
                tracing::debug!("dglab: websocket handshake timed out");
                return Ok(());
            }
        },
    };

    let app_id = uuid::Uuid::new_v4().to_string();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    hub.register_remote(&app_id, out_tx);
    tracing::debug!(app_id = %app_id, "dglab app connected");

    let result = relay(ws_stream, &app_id, &hub, out_rx, cancel).await;
    hub.remove_remote(&app_id);
    result
}

async fn relay(
    ws_stream: WebSocketStream<TcpStream>,
    app_id: &str,
    hub: &Hub,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) -> Result<(), DgLabError> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // The app learns its own id from the greeting and echoes it back as
    // `targetId` when binding.
    let greeting = WireMessage::new(KIND_BIND, app_id, "", "targetId");
    ws_tx.send(Message::Text(greeting.to_json())).await?;

    loop {
        tokio::select! {
            biased;

            // --- frames queued by the hub ---
            out = out_rx.recv() => {
                match out {
                    Some(frame) => ws_tx.send(frame).await?,
                    None => {
                        // Hub dropped the connection (server closing).
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }

            // --- cancellation ---
            _ = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }

            // --- incoming frame from the app ---
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        tracing::debug!(app_id = %app_id, "dglab app disconnected (stream ended)");
                        return Ok(());
                    }
                };
                match msg {
                    Message::Text(text) => {
                        if let Some(reply) = hub.handle_app_text(app_id, &text) {
                            ws_tx.send(Message::Text(reply.to_json())).await?;
                        }
                    }
                    Message::Ping(data) => ws_tx.send(Message::Pong(data)).await?,
                    Message::Close(_) => {
                        tracing::debug!(app_id = %app_id, "dglab app sent close frame");
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
