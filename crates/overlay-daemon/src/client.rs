//! Hot channel client
//!
//! The application side of the live-update capability. A [`HotClient`]
//! connects to the server's WebSocket, and its [`HotContext`] routes every
//! incoming frame to the handlers registered for that event name.
//!
//! Built-in frames are surfaced as local events so applications can react
//! to them the same way they react to custom ones:
//!
//! | frame         | local event             | data                    |
//! |---------------|-------------------------|-------------------------|
//! | `connected`   | [`CONNECTED_EVENT`]     | `null`                  |
//! | `error`       | [`ERROR_EVENT`]         | the `err` object        |
//! | `full-reload` | [`FULL_RELOAD_EVENT`]   | `null`                  |
//! | `custom`      | the frame's `event`     | the frame's `data`      |

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use url::Url;

use overlay_core::prelude::*;

use crate::protocol::HotPayload;

pub const CONNECTED_EVENT: &str = "overlay:connected";
pub const ERROR_EVENT: &str = "overlay:error";
pub const FULL_RELOAD_EVENT: &str = "overlay:full-reload";

/// Callback invoked with an event's data
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

// ─────────────────────────────────────────────────────────
// HotContext
// ─────────────────────────────────────────────────────────

/// Per-application handler registry plus the way back to the server
#[derive(Default)]
pub struct HotContext {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
    outbound: Option<mpsc::UnboundedSender<HotPayload>>,
}

impl std::fmt::Debug for HotContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut events: Vec<_> = handlers.keys().cloned().collect();
        events.sort();
        f.debug_struct("HotContext")
            .field("events", &events)
            .field("connected", &self.outbound.is_some())
            .finish()
    }
}

impl HotContext {
    /// A context with no server behind it; `send` is a logged no-op
    pub fn detached() -> Self {
        Self::default()
    }

    fn with_outbound(outbound: mpsc::UnboundedSender<HotPayload>) -> Self {
        Self {
            handlers: RwLock::default(),
            outbound: Some(outbound),
        }
    }

    /// Subscribe to `event`. Registering twice calls the handler twice.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
        trace!("Subscribed to {}", event);
    }

    /// Number of handlers registered for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Invoke every handler for `event`; returns how many ran.
    pub fn dispatch(&self, event: &str, data: &Value) -> usize {
        // Call outside the lock so handlers may subscribe further
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .cloned()
            .unwrap_or_default();

        for handler in &handlers {
            handler(data);
        }
        handlers.len()
    }

    /// Route one server frame to local handlers
    pub fn dispatch_payload(&self, payload: HotPayload) -> usize {
        match payload {
            HotPayload::Connected => self.dispatch(CONNECTED_EVENT, &Value::Null),
            HotPayload::Custom { event, data } => self.dispatch(&event, &data),
            HotPayload::Error { err } => match serde_json::to_value(&err) {
                Ok(data) => self.dispatch(ERROR_EVENT, &data),
                Err(e) => {
                    warn!("Failed to convert overlay error: {}", e);
                    0
                }
            },
            HotPayload::FullReload => self.dispatch(FULL_RELOAD_EVENT, &Value::Null),
        }
    }

    /// Send a custom event to the server
    pub fn send(&self, event: &str, data: Value) -> Result<()> {
        let Some(outbound) = &self.outbound else {
            debug!("Hot context is detached, dropping {}", event);
            return Ok(());
        };
        outbound
            .send(HotPayload::Custom {
                event: event.to_string(),
                data,
            })
            .map_err(|_| Error::ChannelClosed)
    }
}

// ─────────────────────────────────────────────────────────
// HotClient
// ─────────────────────────────────────────────────────────

/// A live connection to a hot channel server
pub struct HotClient {
    url: Url,
    context: Arc<HotContext>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for HotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotClient")
            .field("url", &self.url.as_str())
            .field("connected", &!self.task.is_finished())
            .finish()
    }
}

impl HotClient {
    /// Connect to `url` (`ws://` or `wss://`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the URL is not a WebSocket URL or the
    /// server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self> {
        let url = parse_ws_url(url)?;

        info!("Connecting to hot channel at {}", url);
        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::transport(format!("Failed to connect to {}: {}", url, e)))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let context = Arc::new(HotContext::with_outbound(outbound_tx));
        let task = tokio::spawn(run_client_task(ws_stream, Arc::clone(&context), outbound_rx));

        Ok(Self { url, context, task })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The live-update capability handed to listeners
    pub fn context(&self) -> &HotContext {
        &self.context
    }

    pub fn is_connected(&self) -> bool {
        !self.task.is_finished()
    }

    /// Wait until the server closes the connection
    pub async fn closed(&mut self) {
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                warn!("Hot client task failed: {}", e);
            }
        }
    }
}

impl Drop for HotClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Validate that `url` is a WebSocket URL
pub fn parse_ws_url(url: &str) -> Result<Url> {
    let parsed =
        Url::parse(url).map_err(|e| Error::transport(format!("Invalid URL {}: {}", url, e)))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(Error::transport(format!(
            "Unsupported scheme '{}' in {}, expected ws:// or wss://",
            other, url
        ))),
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_client_task(
    ws_stream: WsStream,
    context: Arc<HotContext>,
    mut outbound_rx: mpsc::UnboundedReceiver<HotPayload>,
) {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    loop {
        tokio::select! {
            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => match HotPayload::parse(text.as_str()) {
                        Some(payload) => {
                            trace!("Hot client received {}", payload.summary());
                            context.dispatch_payload(payload);
                        }
                        None => debug!("Ignoring unparseable frame"),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Hot channel closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Hot channel read error: {}", e);
                        break;
                    }
                }
            }
            outgoing = outbound_rx.recv() => {
                let Some(payload) = outgoing else { break };
                match payload.encode() {
                    Ok(text) => {
                        if let Err(e) = ws_sink.send(WsMessage::Text(text.into())).await {
                            warn!("Hot channel write error: {}", e);
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to encode {}: {}", payload.summary(), e),
                }
            }
        }
    }

    let _ = ws_sink.close().await;
    debug!("Hot client task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::HotChannel;
    use crate::protocol::HotSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_dispatch_calls_matching_handlers_only() {
        let ctx = HotContext::detached();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        ctx.on("a", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(ctx.dispatch("a", &Value::Null), 1);
        assert_eq!(ctx.dispatch("b", &Value::Null), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_subscriptions_are_not_guarded() {
        let ctx = HotContext::detached();
        ctx.on("a", |_| {});
        ctx.on("a", |_| {});
        assert_eq!(ctx.handler_count("a"), 2);
        assert_eq!(ctx.dispatch("a", &Value::Null), 2);
    }

    #[test]
    fn test_dispatch_payload_maps_builtins() {
        let ctx = HotContext::detached();
        let seen = Arc::new(RwLock::new(Vec::<(String, Value)>::new()));
        for event in [CONNECTED_EVENT, ERROR_EVENT, FULL_RELOAD_EVENT, "x:custom"] {
            let seen = Arc::clone(&seen);
            let name = event.to_string();
            ctx.on(event, move |data| {
                seen.write().unwrap().push((name.clone(), data.clone()));
            });
        }

        ctx.dispatch_payload(HotPayload::Connected);
        ctx.dispatch_payload(HotPayload::command_failed(&["lint".into()], "oops"));
        ctx.dispatch_payload(HotPayload::FullReload);
        ctx.dispatch_payload(HotPayload::Custom {
            event: "x:custom".into(),
            data: serde_json::json!(1),
        });

        let seen = seen.read().unwrap();
        assert_eq!(seen[0].0, CONNECTED_EVENT);
        assert_eq!(seen[1].0, ERROR_EVENT);
        assert_eq!(seen[1].1["plugin"], "command-overlay");
        assert_eq!(seen[2].0, FULL_RELOAD_EVENT);
        assert_eq!(seen[3], ("x:custom".to_string(), serde_json::json!(1)));
    }

    #[test]
    fn test_detached_send_is_noop() {
        let ctx = HotContext::detached();
        assert!(ctx.send("x", Value::Null).is_ok());
    }

    #[test]
    fn test_parse_ws_url() {
        assert!(parse_ws_url("ws://127.0.0.1:24678").is_ok());
        assert!(parse_ws_url("wss://dev.example.com/hmr").is_ok());
        assert!(matches!(
            parse_ws_url("http://localhost:8080"),
            Err(Error::Transport { .. })
        ));
        assert!(parse_ws_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = HotClient::connect(&format!("ws://127.0.0.1:{port}")).await;
        assert!(matches!(result, Err(Error::Transport { .. })));
    }

    #[tokio::test]
    async fn test_client_receives_broadcast_and_sends_back() {
        let (channel, mut inbound) = HotChannel::bind("127.0.0.1:0").await.unwrap();
        let client = HotClient::connect(&channel.url()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client.context().on("command-overlay:lint-started", move |data| {
            let _ = tx.send(data.clone());
        });

        for _ in 0..100 {
            if channel.listener_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        HotSink::send(
            &channel,
            HotPayload::Custom {
                event: "command-overlay:lint-started".into(),
                data: serde_json::json!({ "command": ["lint"], "timestamp": 1 }),
            },
        );

        let data = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data["command"][0], "lint");

        client
            .context()
            .send("command-overlay:console", serde_json::json!("mirrored"))
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.data, serde_json::json!("mirrored"));
        assert!(client.is_connected());
    }
}
