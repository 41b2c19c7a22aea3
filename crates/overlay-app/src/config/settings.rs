//! Settings loader for .overlay/config.toml

use std::path::Path;

use overlay_core::prelude::*;

use super::types::Settings;

pub const CONFIG_FILENAME: &str = "config.toml";
pub const OVERLAY_DIR: &str = ".overlay";

const DEFAULT_CONFIG: &str = r#"# Command Overlay Configuration

[command]
program = "npm"
args = ["run", "lint"]
mirror_output = true    # Copy the check output to this terminal

[watcher]
root = "src"            # Watched recursively
pattern = "src/**/*"    # Paths that trigger a run

[server]
host = "127.0.0.1"
port = 24678

[runs]
policy = "overlap"      # "overlap" or "latest-wins"
"#;

/// Load settings from .overlay/config.toml
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(OVERLAY_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Reject settings that would make every run fail before it starts
pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.command.program.trim().is_empty() {
        return Err(Error::config_invalid("[command] program must not be empty"));
    }
    if let Err(e) = glob::Pattern::new(&settings.watcher.pattern) {
        return Err(Error::config_invalid(format!(
            "[watcher] pattern '{}' is not a valid glob: {}",
            settings.watcher.pattern, e
        )));
    }
    Ok(())
}

/// Create the default config file in .overlay/
///
/// Returns `true` if a file was written, `false` if one already existed.
pub fn init_config_dir(project_path: &Path) -> Result<bool> {
    let overlay_dir = project_path.join(OVERLAY_DIR);

    if !overlay_dir.exists() {
        std::fs::create_dir_all(&overlay_dir)
            .map_err(|e| Error::config(format!("Failed to create .overlay dir: {}", e)))?;
    }

    let config_path = overlay_dir.join(CONFIG_FILENAME);
    if config_path.exists() {
        return Ok(false);
    }

    std::fs::write(&config_path, DEFAULT_CONFIG)
        .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
    info!("Wrote default config to {:?}", config_path);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_daemon::RunPolicy;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(temp.path());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let overlay_dir = temp.path().join(".overlay");
        std::fs::create_dir_all(&overlay_dir).unwrap();

        let config = r#"
[command]
program = "cargo"
args = ["clippy"]
mirror_output = false

[server]
port = 9000
"#;
        std::fs::write(overlay_dir.join("config.toml"), config).unwrap();

        let settings = load_settings(temp.path());

        assert_eq!(settings.command.program, "cargo");
        assert_eq!(settings.command.args, vec!["clippy"]);
        assert!(!settings.command.mirror_output);
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.watcher.pattern, "src/**/*");
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let overlay_dir = temp.path().join(".overlay");
        std::fs::create_dir_all(&overlay_dir).unwrap();

        // Invalid TOML
        std::fs::write(overlay_dir.join("config.toml"), "not valid toml {{{{").unwrap();

        let settings = load_settings(temp.path());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_init_config_dir() {
        let temp = tempdir().unwrap();

        assert!(init_config_dir(temp.path()).unwrap());
        assert!(temp.path().join(".overlay/config.toml").exists());

        // Written file parses back to the defaults
        assert_eq!(load_settings(temp.path()), Settings::default());
    }

    #[test]
    fn test_init_config_dir_keeps_existing() {
        let temp = tempdir().unwrap();
        let overlay_dir = temp.path().join(".overlay");
        std::fs::create_dir_all(&overlay_dir).unwrap();
        std::fs::write(overlay_dir.join("config.toml"), "[runs]\npolicy = \"latest-wins\"\n")
            .unwrap();

        assert!(!init_config_dir(temp.path()).unwrap());
        assert_eq!(load_settings(temp.path()).runs.policy, RunPolicy::LatestWins);
    }

    #[test]
    fn test_validate_settings() {
        let mut settings = Settings::default();
        assert!(validate_settings(&settings).is_ok());

        settings.watcher.pattern = "src/[".to_string();
        assert!(matches!(
            validate_settings(&settings),
            Err(Error::ConfigInvalid { .. })
        ));

        settings = Settings::default();
        settings.command.program = "  ".to_string();
        assert!(validate_settings(&settings).is_err());
    }
}
