//! Configuration types for the command overlay
//!
//! Mirrors the tables of `.overlay/config.toml`:
//! - `[command]` - the check command and output mirroring
//! - `[watcher]` - watch root and trigger glob
//! - `[server]` - hot channel bind address
//! - `[runs]` - overlapping run policy

use serde::{Deserialize, Serialize};

use overlay_daemon::RunPolicy;

/// Global settings from `.overlay/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub command: CommandSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub runs: RunSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CommandSettings {
    /// Executable to run
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Copy the child's output to our own stdout/stderr
    #[serde(default = "default_true")]
    pub mirror_output: bool,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            mirror_output: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WatcherSettings {
    /// Directory watched recursively, relative to the project root
    #[serde(default = "default_watch_root")]
    pub root: String,

    /// Glob matched against paths relative to the project root
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            root: default_watch_root(),
            pattern: default_pattern(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    /// `host:port` for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL applications connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.bind_addr())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RunSettings {
    #[serde(default)]
    pub policy: RunPolicy,
}

fn default_program() -> String {
    "npm".to_string()
}

fn default_args() -> Vec<String> {
    vec!["run".to_string(), "lint".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_watch_root() -> String {
    "src".to_string()
}

fn default_pattern() -> String {
    "src/**/*".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    24678
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.command.program, "npm");
        assert_eq!(settings.command.args, vec!["run", "lint"]);
        assert!(settings.command.mirror_output);
        assert_eq!(settings.watcher.root, "src");
        assert_eq!(settings.watcher.pattern, "src/**/*");
        assert_eq!(settings.server.port, 24678);
        assert_eq!(settings.runs.policy, RunPolicy::Overlap);
    }

    #[test]
    fn test_partial_tables_fill_defaults() {
        let settings: Settings = toml::from_str(
            r#"
[command]
program = "eslint"

[runs]
policy = "latest-wins"
"#,
        )
        .unwrap();

        assert_eq!(settings.command.program, "eslint");
        assert_eq!(settings.command.args, vec!["run", "lint"]);
        assert_eq!(settings.runs.policy, RunPolicy::LatestWins);
        assert_eq!(settings.server, ServerSettings::default());
    }

    #[test]
    fn test_server_urls() {
        let server = ServerSettings {
            host: "0.0.0.0".into(),
            port: 5000,
        };
        assert_eq!(server.bind_addr(), "0.0.0.0:5000");
        assert_eq!(server.url(), "ws://0.0.0.0:5000");
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result: Result<Settings, _> = toml::from_str("[runs]\npolicy = \"queue\"\n");
        assert!(result.is_err());
    }
}
