//! Command Overlay - run a check command on every source change and push the
//! result to connected applications
//!
//! This is the binary entry point. All logic lives in the workspace crates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};

use overlay_app::config::{init_config_dir, load_settings, Settings, OVERLAY_DIR};
use overlay_app::{attach, run_check_once, Engine, TerminalConsole};
use overlay_core::logging;
use overlay_daemon::RunPolicy;

/// Command Overlay - lint results pushed to your running app
#[derive(Parser, Debug)]
#[command(name = "cmd-overlay")]
#[command(about = "Run a check command on source changes and broadcast the result", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the hot channel, run the check once and re-run on every change
    Serve {
        /// Project root (defaults to the current directory)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,

        /// Port for the hot channel
        #[arg(long)]
        port: Option<u16>,

        /// Host for the hot channel
        #[arg(long)]
        host: Option<String>,

        /// Only the most recently started run may raise the overlay or reload
        #[arg(long)]
        latest_wins: bool,
    },

    /// Connect to a running server and print the overlay to this terminal
    Attach {
        /// Hot channel URL (defaults to the configured server address)
        #[arg(long)]
        url: Option<String>,
    },

    /// Run the check command once and exit with its status
    Check {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },

    /// Write a default .overlay/config.toml
    Init {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

fn project_path(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn ensure_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(eyre!("Not a directory: {}", path.display()))
    }
}

/// Invalid settings exit with status 2 and a hint; anything else becomes a report
fn settings_error(err: overlay_core::Error) -> color_eyre::Report {
    if err.is_fatal() {
        eprintln!("❌ {}", err);
        eprintln!("   Fix {}/config.toml and try again", OVERLAY_DIR);
        std::process::exit(2);
    }
    err.into()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init()?;

    let args = Args::parse();

    match args.command {
        Command::Serve {
            path,
            port,
            host,
            latest_wins,
        } => {
            let project = project_path(path);
            ensure_dir(&project)?;

            let mut settings = load_settings(&project);
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(host) = host {
                settings.server.host = host;
            }
            if latest_wins {
                settings.runs.policy = RunPolicy::LatestWins;
            }

            let engine = Engine::start(&project, &settings)
                .await
                .map_err(settings_error)?;
            eprintln!("✅ Command overlay listening on {}", engine.url());
            eprintln!(
                "   Running `{} {}` on changes to {}",
                settings.command.program,
                settings.command.args.join(" "),
                settings.watcher.pattern
            );
            eprintln!("   Logs in {}", logging::log_directory().display());
            engine.run_until(shutdown_signal()).await;
            Ok(())
        }
        Command::Attach { url } => {
            let url = match url {
                Some(url) => url,
                None => load_settings(&project_path(None)).server.url(),
            };
            attach(&url, Arc::new(TerminalConsole::new()), shutdown_signal()).await?;
            Ok(())
        }
        Command::Check { path } => {
            let project = project_path(path);
            ensure_dir(&project)?;

            let settings: Settings = load_settings(&project);
            let ok = run_check_once(&project, &settings, Arc::new(TerminalConsole::new()))
                .await
                .map_err(settings_error)?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Init { path } => {
            let project = project_path(path);
            ensure_dir(&project)?;

            if init_config_dir(&project)? {
                eprintln!("✅ Wrote {}/config.toml", OVERLAY_DIR);
            } else {
                eprintln!("{}/config.toml already exists, leaving it unchanged", OVERLAY_DIR);
            }
            Ok(())
        }
    }
}
