//! Engine - wires settings, the hot channel, the runner and the watcher
//!
//! Three entry points back the CLI subcommands:
//! - [`Engine::start`] + [`Engine::run_until`] for `serve`
//! - [`run_check_once`] for `check`
//! - [`attach`] for `attach`

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use overlay_core::events::{now_millis, OverlayEventKind, OverlayPayload, PluginRegistered};
use overlay_core::prelude::*;
use overlay_daemon::{
    CheckCommand, CheckRunner, ClientEvent, HotChannel, HotClient, HotContext, HotPayload,
    HotSink, RunPhase,
};

use crate::config::{validate_settings, Settings};
use crate::listener::{register_channel_reporters, register_command_overlay, Console};
use crate::watcher::{spawn_trigger_loop, FileWatcher};

/// Build the check command for a project from its settings
pub fn check_command(project_path: &Path, settings: &Settings) -> CheckCommand {
    CheckCommand::new(
        settings.command.program.clone(),
        settings.command.args.clone(),
    )
    .with_cwd(project_path)
}

/// A running overlay server
pub struct Engine {
    project_path: PathBuf,
    channel: HotChannel,
    inbound: mpsc::UnboundedReceiver<ClientEvent>,
    runner: Arc<CheckRunner>,
    watcher: FileWatcher,
    trigger: JoinHandle<()>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("project_path", &self.project_path)
            .field("channel", &self.channel)
            .field("runner", &self.runner)
            .field("watcher", &self.watcher)
            .finish()
    }
}

impl Engine {
    /// Bind the hot channel, announce the plugin, run once and start watching.
    ///
    /// A missing watch root is logged and leaves the server running without
    /// file triggers.
    pub async fn start(project_path: &Path, settings: &Settings) -> Result<Self> {
        validate_settings(settings)?;

        info!("═══════════════════════════════════════════════════════");
        info!("Serving command overlay");
        info!("Project: {}", project_path.display());
        info!("═══════════════════════════════════════════════════════");

        let bind_addr = settings.server.bind_addr();
        let (channel, inbound) = HotChannel::bind(&bind_addr)
            .await
            .with_context(|| format!("Binding hot channel on {}", bind_addr))?;
        let sink: Arc<dyn HotSink> = channel.registry();

        let registration = OverlayPayload::PluginRegistered(PluginRegistered {
            timestamp: now_millis(),
        });
        sink.send(HotPayload::custom(&registration));

        let runner = Arc::new(
            CheckRunner::new(check_command(project_path, settings), sink)
                .with_mirror_output(settings.command.mirror_output)
                .with_policy(settings.runs.policy),
        );

        let mut watcher = FileWatcher::new(project_path, &settings.watcher)
            .context("Preparing file watcher")?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        match watcher.start(event_tx) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => warn!("File watching disabled: {}", e),
            Err(e) => return Err(e),
        }
        let trigger = spawn_trigger_loop(Arc::clone(&runner), event_rx);

        Ok(Self {
            project_path: project_path.to_path_buf(),
            channel,
            inbound,
            runner,
            watcher,
            trigger,
        })
    }

    /// URL applications should connect to
    pub fn url(&self) -> String {
        self.channel.url()
    }

    pub fn runner(&self) -> &Arc<CheckRunner> {
        &self.runner
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_running()
    }

    pub fn listener_count(&self) -> usize {
        self.channel.listener_count()
    }

    /// Serve until `shutdown` resolves, logging client messages meanwhile
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = self.inbound.recv() => {
                    match event {
                        Some(event) => log_client_event(&event),
                        None => {
                            warn!("Hot channel stopped accepting clients");
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown();
    }

    /// Stop watching and close the hot channel. In-flight runs are not
    /// cancelled.
    pub fn shutdown(&mut self) {
        self.watcher.stop();
        self.trigger.abort();
        self.channel.shutdown();
        info!("Command overlay stopped");
    }
}

fn log_client_event(event: &ClientEvent) {
    if let Some(kind) = OverlayEventKind::from_event_name(&event.event) {
        warn!(
            "[client {}] sent {}, which only the server emits; ignoring",
            event.listener,
            kind.event_name()
        );
        return;
    }
    match event.data.as_str() {
        Some(text) => info!("[client {}] {}: {}", event.listener, event.event, text),
        None => info!("[client {}] {}: {}", event.listener, event.event, event.data),
    }
}

/// Run the check command once, rendering its events through the overlay
/// listener. Returns `true` if the run succeeded.
pub async fn run_check_once(
    project_path: &Path,
    settings: &Settings,
    console: Arc<dyn Console>,
) -> Result<bool> {
    validate_settings(settings)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn HotSink> = Arc::new(tx);
    // The listener prints the clean output itself
    let runner = CheckRunner::new(check_command(project_path, settings), sink)
        .with_mirror_output(false);

    let phase = runner.run().await;

    let hot = HotContext::detached();
    register_command_overlay(Some(&hot), console);
    while let Ok(frame) = rx.try_recv() {
        hot.dispatch_payload(frame);
    }

    debug!("Check finished in phase {}", phase.name());
    Ok(phase == RunPhase::Succeeded)
}

/// Connect to a running server and render overlay events until it closes
/// or `shutdown` resolves.
pub async fn attach<F>(url: &str, console: Arc<dyn Console>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let mut client = HotClient::connect(url).await?;
    register_command_overlay(Some(client.context()), Arc::clone(&console));
    register_channel_reporters(client.context(), Arc::clone(&console));
    console.info(&format!("[command-overlay] attached to {}", client.url()));

    tokio::select! {
        _ = shutdown => info!("Detaching from {}", url),
        _ = client.closed() => {
            console.info("[command-overlay] server closed the connection");
        }
    }
    Ok(())
}
