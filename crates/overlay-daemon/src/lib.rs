//! # overlay-daemon - Check Runs and Hot Channel Transport
//!
//! Spawns the check command, turns each invocation into overlay events, and
//! moves those events between the dev server and connected applications over
//! a WebSocket hot channel.
//!
//! Depends on [`overlay_core`] for event payloads and error handling.
//!
//! ## Public API
//!
//! ### Process Management
//! - [`CheckCommand`] - The program and arguments to run
//! - [`CheckRunner`] - Runs the command and emits its lifecycle events
//! - [`Invocation`] - Per-run state machine enforcing one terminal event
//! - [`RunPolicy`] - Whether overlapping runs all report or only the latest
//!
//! ### Protocol
//! - [`HotPayload`] - Frames exchanged on the hot channel
//! - [`HotSink`] - Destination for server-produced frames
//!
//! ### Transport
//! - [`HotChannel`] - WebSocket server broadcasting frames to every listener
//! - [`HotClient`] / [`HotContext`] - Application-side connection and handler registry

pub mod channel;
pub mod client;
pub mod process;
pub mod protocol;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use channel::{ClientEvent, HotChannel, ListenerId, ListenerRegistry};
pub use client::{
    parse_ws_url, Handler, HotClient, HotContext, CONNECTED_EVENT, ERROR_EVENT, FULL_RELOAD_EVENT,
};
pub use process::{CheckCommand, CheckRunner, Invocation, OutputStream, RunPhase, RunPolicy};
pub use protocol::{HotPayload, HotSink, OverlayError};
