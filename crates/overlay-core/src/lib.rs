//! # overlay-core - Core Domain Types
//!
//! Foundation crate for the command overlay. Provides error handling,
//! logging setup, output sanitizing, and the event payloads exchanged over
//! the hot channel.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, regex, tracing).
//!
//! ## Public API
//!
//! ### Events (`events`)
//! - [`OverlayEventKind`] - The four named events and their wire names
//! - [`OverlayPayload`] - Typed payloads built by the server
//! - [`OverlayEvent`] - Borrowed views of payloads that passed their shape check
//! - [`is_lint_started()`], [`is_lint_finished()`], [`is_lint_failed()`] - Shape predicates
//!
//! ### Sanitizing (`ansi`)
//! - [`strip_ansi_codes()`] - Remove terminal escape sequences
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `is_fatal` and `is_recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use overlay_core::prelude::*;
//! ```

pub mod ansi;
pub mod error;
pub mod events;
pub mod logging;

/// Prelude for common imports used throughout all overlay crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use ansi::{contains_ansi_codes, strip_ansi_codes};
pub use error::{Error, Result, ResultExt};
pub use events::{
    command_line, is_lint_failed, is_lint_finished, is_lint_started, is_string_array, now_millis,
    LintFailed, LintFinished, LintStarted, OverlayEvent, OverlayEventKind, OverlayPayload,
    PluginRegistered, PLUGIN_NAME,
};
