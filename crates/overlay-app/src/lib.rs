//! # overlay-app - Application Layer
//!
//! Ties the command overlay together: settings, the trigger controller that
//! turns file changes into check runs, the overlay listener that renders
//! events inside a connected application, and the [`Engine`] that wires them
//! to the hot channel.
//!
//! ## Public API
//!
//! ### Configuration (`config`)
//! - [`Settings`] - Contents of `.overlay/config.toml`
//! - [`load_settings()`], [`init_config_dir()`] - Load or create the config file
//!
//! ### Trigger Controller (`watcher`)
//! - [`FileWatcher`] - notify-backed watcher filtered by a glob
//! - [`spawn_trigger_loop()`] - Run once, then once per change
//!
//! ### Overlay Listener (`listener`)
//! - [`register_command_overlay()`] - Subscribe the listener to a hot context
//! - [`Console`], [`TerminalConsole`] - Rendering targets
//!
//! ### Engine (`engine`)
//! - [`Engine`] - The running server (`serve`)
//! - [`run_check_once()`] - Single in-process run (`check`)
//! - [`attach()`] - Terminal listener (`attach`)

pub mod config;
pub mod engine;
pub mod listener;
pub mod watcher;

pub use config::{init_config_dir, load_settings, validate_settings, Settings};
pub use engine::{attach, check_command, run_check_once, Engine};
pub use listener::{
    format_label, register_channel_reporters, register_command_overlay, Console, OverlayListener,
    TerminalConsole,
};
#[cfg(any(test, feature = "test-helpers"))]
pub use listener::{ConsoleEntry, RecordingConsole};
pub use watcher::{classify_event, spawn_trigger_loop, ChangeKind, FileWatcher, WatchEvent, WatchScope};
