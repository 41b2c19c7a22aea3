//! Error types shared by every overlay crate

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Overlay error types organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Check Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to spawn check command `{command}`: {reason}")]
    ProcessSpawn { command: String, reason: String },

    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    // ─────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Hot channel error: {message}")]
    Transport { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // Watcher Errors
    // ─────────────────────────────────────────────────────────────
    #[error("File watcher error: {message}")]
    Watcher { message: String },

    #[error("Watch root does not exist: {path}")]
    WatchRootMissing { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn process_spawn(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn watcher(message: impl Into<String>) -> Self {
        Self::Watcher {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// The server can keep running without the part that failed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ProcessSpawn { .. }
                | Error::Transport { .. }
                | Error::Watcher { .. }
                | Error::WatchRootMissing { .. }
                | Error::Json(_)
        )
    }

    /// The settings themselves are unusable; retrying cannot help
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConfigInvalid { .. })
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions (for use with color-eyre)
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::transport("listener gone");
        assert_eq!(err.to_string(), "Hot channel error: listener gone");

        let err = Error::process_spawn("npm run lint", "No such file or directory");
        assert!(err.to_string().contains("npm run lint"));
        assert!(err.to_string().contains("No such file or directory"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = Error::InvalidTransition {
            from: "succeeded",
            to: "spawn-failed",
        };
        assert_eq!(
            err.to_string(),
            "Invalid run transition: succeeded -> spawn-failed"
        );
    }

    #[test]
    fn test_only_invalid_settings_are_fatal() {
        assert!(Error::config_invalid("empty program").is_fatal());
        assert!(!Error::WatchRootMissing {
            path: PathBuf::from("/missing/src")
        }
        .is_fatal());
        assert!(!Error::transport("test").is_fatal());
    }

    #[test]
    fn test_watcher_failures_are_recoverable() {
        assert!(Error::watcher("inotify limit").is_recoverable());
        assert!(Error::WatchRootMissing {
            path: PathBuf::from("/missing/src")
        }
        .is_recoverable());
        assert!(Error::process_spawn("eslint", "not found").is_recoverable());
        assert!(!Error::ChannelClosed.is_recoverable());
        assert!(!Error::config_invalid("bad glob").is_recoverable());
    }

    #[test]
    fn test_result_ext_preserves_error() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = res.context("reading config").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
