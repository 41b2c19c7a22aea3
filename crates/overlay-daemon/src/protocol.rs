//! Hot channel wire protocol
//!
//! Every frame is a JSON text message tagged by `type`:
//!
//! ```text
//! {"type":"connected"}
//! {"type":"custom","event":"command-overlay:lint-started","data":{...}}
//! {"type":"error","err":{"plugin":"...","message":"...","id":"...","stack":""}}
//! {"type":"full-reload"}
//! ```
//!
//! `custom` frames travel in both directions; the other three only flow from
//! the server to connected clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use overlay_core::events::{command_line, OverlayPayload, PLUGIN_NAME};
use overlay_core::prelude::*;

/// Fields of the generic error overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayError {
    pub plugin: String,
    pub message: String,
    pub id: String,
    #[serde(default)]
    pub stack: String,
}

/// A single hot channel frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HotPayload {
    /// Greeting sent to every client right after the handshake
    Connected,
    /// Named event with an opaque payload
    Custom {
        event: String,
        #[serde(default)]
        data: Value,
    },
    /// Build-tool-native error overlay
    Error { err: OverlayError },
    /// Ask connected applications to reload
    FullReload,
}

impl HotPayload {
    /// Wrap an overlay event as a custom frame
    pub fn custom(payload: &OverlayPayload) -> Self {
        HotPayload::Custom {
            event: payload.event_name().to_string(),
            data: payload.to_data(),
        }
    }

    /// Error overlay for a failed check run
    pub fn command_failed(command: &[String], clean: &str) -> Self {
        HotPayload::Error {
            err: OverlayError {
                plugin: PLUGIN_NAME.to_string(),
                message: format!("Command failed: {} \nlog: {}", command_line(command), clean),
                id: PLUGIN_NAME.to_string(),
                stack: String::new(),
            },
        }
    }

    /// Serialize into a text frame
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame. Returns `None` for anything that is not a
    /// well-formed frame; the payload inside `data` is not inspected.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Short description for log lines
    pub fn summary(&self) -> String {
        match self {
            HotPayload::Connected => "connected".to_string(),
            HotPayload::Custom { event, .. } => format!("custom {}", event),
            HotPayload::Error { err } => format!("error from {}", err.plugin),
            HotPayload::FullReload => "full-reload".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Sink
// ─────────────────────────────────────────────────────────

/// Destination for frames produced on the server side.
///
/// The hot channel broadcasts to every connected client; an unbounded mpsc
/// sender keeps frames in-process (the `check` command and tests).
pub trait HotSink: Send + Sync {
    fn send(&self, payload: HotPayload);
}

impl HotSink for mpsc::UnboundedSender<HotPayload> {
    fn send(&self, payload: HotPayload) {
        if mpsc::UnboundedSender::send(self, payload).is_err() {
            trace!("in-process hot sink closed, dropping frame");
        }
    }
}
