//! Hot channel server
//!
//! A WebSocket server that broadcasts [`HotPayload`] frames to every
//! connected application instance.
//!
//! ```text
//! CheckRunner ──send──▶ HotChannel ──broadcast──▶ ListenerRegistry
//!                                                   ├─ #1 ─▶ connection task ─▶ ws
//!                                                   ├─ #2 ─▶ connection task ─▶ ws
//!                                                   └─ ...
//! ```
//!
//! Membership is explicit: a connection task adds its outbound queue after
//! the handshake and removes it when the socket closes. A frame reaches the
//! listeners registered at the moment it is broadcast; there is no backlog
//! for clients that connect later.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use overlay_core::prelude::*;

use crate::protocol::{HotPayload, HotSink};

/// Identifier handed out to each connected listener
pub type ListenerId = u64;

// ─────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────

/// The set of currently connected listeners
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, mpsc::UnboundedSender<HotPayload>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outbound queue and return its id
    pub fn add(&self, tx: mpsc::UnboundedSender<HotPayload>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        id
    }

    /// Remove a listener; returns false if it was already gone
    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `payload` for every listener. Listeners whose queue is closed
    /// are pruned. Returns the number of listeners the frame was queued for.
    pub fn broadcast(&self, payload: &HotPayload) -> usize {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = 0;

        listeners.retain(|id, tx| {
            if tx.send(payload.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                debug!("Pruning closed listener #{}", id);
                false
            }
        });

        delivered
    }
}

impl HotSink for ListenerRegistry {
    fn send(&self, payload: HotPayload) {
        let delivered = self.broadcast(&payload);
        debug!(
            "Broadcast {} to {} listener(s)",
            payload.summary(),
            delivered
        );
    }
}

// ─────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────

/// A custom event sent by a client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEvent {
    pub listener: ListenerId,
    pub event: String,
    pub data: Value,
}

/// Running WebSocket server end of the hot channel
pub struct HotChannel {
    registry: Arc<ListenerRegistry>,
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl std::fmt::Debug for HotChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotChannel")
            .field("local_addr", &self.local_addr)
            .field("listeners", &self.registry.len())
            .finish()
    }
}

impl HotChannel {
    /// Bind to `addr` and start accepting connections.
    ///
    /// Returns the channel plus a receiver for custom events sent by clients.
    pub async fn bind(addr: &str) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::transport(format!("Failed to bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(ListenerRegistry::new());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&registry),
            inbound_tx,
            shutdown_rx,
        ));

        info!("Hot channel listening on ws://{}", local_addr);

        Ok((
            Self {
                registry,
                local_addr,
                shutdown_tx: Some(shutdown_tx),
            },
            inbound_rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL clients connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub fn registry(&self) -> Arc<ListenerRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop accepting new connections. Established connections close when
    /// their clients disconnect or the process exits.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            info!("Hot channel on {} shutting down", self.local_addr);
        }
    }
}

impl HotSink for HotChannel {
    fn send(&self, payload: HotPayload) {
        HotSink::send(self.registry.as_ref(), payload);
    }
}

impl Drop for HotChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before retrying after the `n`th accept failure in a row
fn accept_backoff(consecutive_errors: u32) -> Duration {
    let exponent = consecutive_errors.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<ListenerRegistry>,
    inbound_tx: mpsc::UnboundedSender<ClientEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut consecutive_errors = 0u32;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        consecutive_errors = 0;
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&registry),
                            inbound_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        let delay = accept_backoff(consecutive_errors);
                        warn!("Hot channel accept error: {} (retrying in {:?})", e, delay);
                        // EMFILE and friends persist until connections close
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = &mut shutdown_rx => {
                                debug!("Hot channel accept loop stopping");
                                break;
                            }
                        }
                    }
                }
            }
            _ = &mut shutdown_rx => {
                debug!("Hot channel accept loop stopping");
                break;
            }
        }
    }
}

/// Serve one client until either side closes.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ListenerRegistry>,
    inbound_tx: mpsc::UnboundedSender<ClientEvent>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<HotPayload>();
    // Queued before registration so the greeting is always the first frame
    let _ = tx.send(HotPayload::Connected);
    let id = registry.add(tx);
    info!("Client #{} connected from {}", id, peer);

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(payload) = outgoing else { break };
                let text = match payload.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {}: {}", payload.summary(), e);
                        continue;
                    }
                };
                if let Err(e) = ws_sink.send(WsMessage::Text(text.into())).await {
                    debug!("Client #{} write failed: {}", id, e);
                    break;
                }
            }
            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_client_text(id, text.as_str(), &inbound_tx);
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!("Client #{} closed the connection", id);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping, Pong and Binary frames are ignored
                    }
                    Some(Err(e)) => {
                        debug!("Client #{} read error: {}", id, e);
                        break;
                    }
                }
            }
        }
    }

    registry.remove(id);
    let _ = ws_sink.close().await;
    info!("Client #{} disconnected", id);
}

fn handle_client_text(id: ListenerId, text: &str, inbound_tx: &mpsc::UnboundedSender<ClientEvent>) {
    match HotPayload::parse(text) {
        Some(HotPayload::Custom { event, data }) => {
            let _ = inbound_tx.send(ClientEvent {
                listener: id,
                event,
                data,
            });
        }
        Some(other) => {
            debug!("Client #{} sent unexpected {}", id, other.summary());
        }
        None => {
            let preview: String = text.chars().take(120).collect();
            debug!("Client #{} sent unparseable frame: {}", id, preview);
        }
    }
}
