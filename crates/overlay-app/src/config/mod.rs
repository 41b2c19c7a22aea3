//! Configuration file parsing for the command overlay
//!
//! Supports `.overlay/config.toml` in the project root.

pub mod settings;
pub mod types;

pub use settings::{init_config_dir, load_settings, validate_settings, CONFIG_FILENAME, OVERLAY_DIR};
pub use types::*;
