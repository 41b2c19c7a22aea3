//! File logging for the overlay server
//!
//! Stdout and stderr carry the mirrored check output, so tracing goes to a
//! daily rolling file instead.

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Environment variable that overrides the log filter
pub const LOG_ENV_VAR: &str = "OVERLAY_LOG";

/// Rolling files are named `overlay.YYYY-MM-DD.log`
pub const LOG_FILE_PREFIX: &str = "overlay";

const DEFAULT_FILTER: &str =
    "overlay_core=info,overlay_daemon=info,overlay_app=info,cmd_overlay=info,warn";
const KEEP_LOG_FILES: usize = 7;

/// Initialize the logging subsystem
///
/// Log level is controlled by the `OVERLAY_LOG` environment variable.
///
/// # Examples
/// ```bash
/// OVERLAY_LOG=debug cmd-overlay serve
/// OVERLAY_LOG=overlay_daemon=trace cmd-overlay serve
/// ```
pub fn init() -> Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(KEEP_LOG_FILES)
        .build(&log_dir)
        .map_err(|e| Error::config(format!("Failed to open log file: {}", e)))?;

    tracing_subscriber::registry()
        .with(env_filter(std::env::var(LOG_ENV_VAR).ok().as_deref()))
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("Command overlay v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Log directory: {}", log_dir.display());

    Ok(())
}

/// Directory the rolling log files are written to
///
/// Falls back to `./command-overlay/logs` when the platform has no local
/// data directory.
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("command-overlay")
        .join("logs")
}

/// An unparseable override falls back to the default filter
fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
