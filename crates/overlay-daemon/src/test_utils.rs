//! Test utilities for runner and channel tests
//!
//! Provides stand-in check commands and helpers for inspecting the frames a
//! runner pushed into an in-process sink.

use serde_json::Value;
use tokio::sync::mpsc;

use super::process::CheckCommand;
use super::protocol::HotPayload;

/// A check command that runs `script` through `sh -c`.
pub fn sh_command(script: &str) -> CheckCommand {
    CheckCommand::new("sh", vec!["-c".to_string(), script.to_string()])
}

/// Take every frame currently buffered in `rx` without waiting.
pub fn drain_frames(rx: &mut mpsc::UnboundedReceiver<HotPayload>) -> Vec<HotPayload> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

/// `(event, data)` pairs of the custom frames, in order.
pub fn custom_frames(frames: &[HotPayload]) -> Vec<(String, Value)> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            HotPayload::Custom { event, data } => Some((event.clone(), data.clone())),
            _ => None,
        })
        .collect()
}
