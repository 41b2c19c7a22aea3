//! Overlay listener
//!
//! Runs inside a connected application. Subscribes to the four overlay
//! events on the application's [`HotContext`], checks every payload's shape
//! before reading it, and renders grouped diagnostics to a [`Console`].
//! Payloads that fail their shape check are dropped without output.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde_json::{Number, Value};

use overlay_core::events::{OverlayEvent, OverlayEventKind, PLUGIN_NAME};
use overlay_core::prelude::*;
use overlay_daemon::{HotContext, ERROR_EVENT, FULL_RELOAD_EVENT};

pub const EMPTY_OUTPUT_PLACEHOLDER: &str = "Command completed with no output.";
const UNKNOWN_TIME: &str = "unknown time";

// ─────────────────────────────────────────────────────────
// Console
// ─────────────────────────────────────────────────────────

/// Where the listener writes its diagnostics
pub trait Console: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
    /// Open a group; `collapsed` groups are folded by consoles that can fold
    fn group(&self, title: &str, collapsed: bool);
    fn group_end(&self);
}

/// Writes to stderr, indenting the contents of open groups
#[derive(Debug, Default)]
pub struct TerminalConsole {
    depth: Mutex<usize>,
}

impl TerminalConsole {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_line(&self, marker: &str, message: &str) {
        let depth = *self.depth.lock().unwrap_or_else(|e| e.into_inner());
        let indent = "  ".repeat(depth);
        for line in message.lines() {
            eprintln!("{indent}{marker}{line}");
        }
        if message.is_empty() {
            eprintln!("{indent}{marker}");
        }
    }
}

impl Console for TerminalConsole {
    fn info(&self, message: &str) {
        self.write_line("", message);
    }

    fn error(&self, message: &str) {
        self.write_line("error: ", message);
    }

    fn group(&self, title: &str, collapsed: bool) {
        self.write_line(if collapsed { "▸ " } else { "▾ " }, title);
        *self.depth.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn group_end(&self) {
        let mut depth = self.depth.lock().unwrap_or_else(|e| e.into_inner());
        *depth = depth.saturating_sub(1);
    }
}

/// A single console call captured by [`RecordingConsole`]
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEntry {
    Info(String),
    Error(String),
    Group { title: String, collapsed: bool },
    GroupEnd,
}

/// Records every console call in order
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug, Default)]
pub struct RecordingConsole {
    entries: Mutex<Vec<ConsoleEntry>>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ConsoleEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn push(&self, entry: ConsoleEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Console for RecordingConsole {
    fn info(&self, message: &str) {
        self.push(ConsoleEntry::Info(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.push(ConsoleEntry::Error(message.to_string()));
    }

    fn group(&self, title: &str, collapsed: bool) {
        self.push(ConsoleEntry::Group {
            title: title.to_string(),
            collapsed,
        });
    }

    fn group_end(&self) {
        self.push(ConsoleEntry::GroupEnd);
    }
}

// ─────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────

/// `[command-overlay] <command joined by spaces>`
pub fn format_label(command: &[&str]) -> String {
    format!("[{}] {}", PLUGIN_NAME, command.join(" "))
}

/// Local `HH:MM:SS` for a millisecond timestamp
pub fn format_time(timestamp: &Number) -> Option<String> {
    let millis = match timestamp.as_i64() {
        Some(ms) => ms,
        None => {
            let ms = timestamp.as_f64()?;
            if !ms.is_finite() {
                return None;
            }
            ms.trunc() as i64
        }
    };
    let utc = DateTime::from_timestamp_millis(millis)?;
    Some(utc.with_timezone(&Local).format("%H:%M:%S").to_string())
}

fn time_or_unknown(timestamp: Option<&Number>) -> String {
    timestamp
        .and_then(format_time)
        .unwrap_or_else(|| UNKNOWN_TIME.to_string())
}

fn body_or_placeholder(clean: &str) -> &str {
    if clean.trim().is_empty() {
        EMPTY_OUTPUT_PLACEHOLDER
    } else {
        clean
    }
}

/// Projects recognized overlay events onto a console
#[derive(Clone)]
pub struct OverlayListener {
    console: Arc<dyn Console>,
}

impl std::fmt::Debug for OverlayListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayListener").finish_non_exhaustive()
    }
}

impl OverlayListener {
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self { console }
    }

    /// Render `data` if it is a well-formed payload for `kind`.
    ///
    /// Returns whether anything was rendered.
    pub fn handle(&self, kind: OverlayEventKind, data: &Value) -> bool {
        match OverlayEvent::recognize(kind, data) {
            Some(event) => {
                self.render(&event);
                true
            }
            None => {
                trace!("Dropping malformed {} payload", kind);
                false
            }
        }
    }

    pub fn render(&self, event: &OverlayEvent<'_>) {
        let console = self.console.as_ref();
        match event {
            OverlayEvent::PluginRegistered { timestamp } => {
                console.info(&format!(
                    "[{}] plugin registered at {}",
                    PLUGIN_NAME,
                    time_or_unknown(*timestamp)
                ));
            }
            OverlayEvent::LintStarted { command, timestamp } => {
                console.info(&format!(
                    "{} ▶ lint started at {}",
                    format_label(command),
                    time_or_unknown(Some(timestamp))
                ));
            }
            OverlayEvent::LintFinished {
                command,
                exit_code,
                success,
                clean,
                ..
            } => {
                let label = format_label(command);
                let body = body_or_placeholder(clean);
                if *success {
                    console.group(&format!("{} ✓", label), true);
                    console.info(body);
                } else {
                    let code = exit_code
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "unknown".to_string());
                    console.group(&format!("{} ✗ (exit code {})", label, code), false);
                    console.error(body);
                }
                console.group_end();
            }
            OverlayEvent::LintFailed {
                command,
                message,
                timestamp,
            } => {
                console.group(
                    &format!(
                        "{} ✖ spawn failure ({})",
                        format_label(command),
                        time_or_unknown(Some(timestamp))
                    ),
                    false,
                );
                console.error(message);
                console.group_end();
            }
        }
    }
}

/// Subscribe the overlay listener to all four overlay events.
///
/// Without a live-update capability this is a silent no-op. Calling it
/// twice subscribes twice.
pub fn register_command_overlay(hot: Option<&HotContext>, console: Arc<dyn Console>) {
    let Some(hot) = hot else {
        trace!("No live-update capability, command overlay not registered");
        return;
    };

    let listener = OverlayListener::new(console);
    for kind in OverlayEventKind::ALL {
        let listener = listener.clone();
        hot.on(kind.event_name(), move |data| {
            listener.handle(kind, data);
        });
    }
    debug!("Command overlay listener registered");
}

/// Report the channel's own overlay errors and reload requests.
///
/// Used by the terminal attach mode, which has no build-tool overlay or page
/// to reload.
pub fn register_channel_reporters(hot: &HotContext, console: Arc<dyn Console>) {
    let error_console = Arc::clone(&console);
    hot.on(ERROR_EVENT, move |err| {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("overlay error without message");
        error_console.error(message);
    });
    hot.on(FULL_RELOAD_EVENT, move |_| {
        console.info(&format!("[{}] full reload requested", PLUGIN_NAME));
    });
}
