//! Trigger controller
//!
//! Watches the configured subtree and starts a check run for every change or
//! removal whose path matches the watch glob. There is no debouncing: each
//! matching path in each notification starts its own run, and runs are never
//! awaited by the trigger loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use overlay_core::prelude::*;
use overlay_daemon::CheckRunner;

use crate::config::WatcherSettings;

/// What happened to a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Changed,
    Removed,
}

/// A matching file event, path relative to the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

/// Classify a raw notify event into `(kind, path)` pairs.
///
/// Creations, renames onto a path, access and metadata-only changes are
/// ignored.
pub fn classify_event(event: &Event) -> Vec<(ChangeKind, &Path)> {
    match &event.kind {
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| (ChangeKind::Removed, p.as_path()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event
                .paths
                .iter()
                .map(|p| (ChangeKind::Removed, p.as_path()))
                .collect(),
            // paths[0] is the old name
            RenameMode::Both => event
                .paths
                .first()
                .map(|p| vec![(ChangeKind::Removed, p.as_path())])
                .unwrap_or_default(),
            RenameMode::To => Vec::new(),
            // Backends that cannot tell the halves apart
            RenameMode::Any | RenameMode::Other => event
                .paths
                .iter()
                .filter(|p| !p.exists())
                .map(|p| (ChangeKind::Removed, p.as_path()))
                .collect(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| (ChangeKind::Changed, p.as_path()))
            .collect(),
        EventKind::Create(_) | EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            Vec::new()
        }
    }
}

// ─────────────────────────────────────────────────────────
// Scope
// ─────────────────────────────────────────────────────────

/// Decides which paths can trigger a run
#[derive(Debug, Clone)]
pub struct WatchScope {
    project_root: PathBuf,
    pattern: glob::Pattern,
}

impl WatchScope {
    pub fn new(project_root: impl Into<PathBuf>, pattern: &str) -> Result<Self> {
        let pattern = glob::Pattern::new(pattern).map_err(|e| {
            Error::config_invalid(format!("Invalid watch pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            project_root: project_root.into(),
            pattern,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Path relative to the project root if it matches the pattern
    pub fn relative_match(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.project_root).unwrap_or(path);
        self.pattern
            .matches_path(relative)
            .then(|| relative.to_path_buf())
    }
}

// ─────────────────────────────────────────────────────────
// FileWatcher
// ─────────────────────────────────────────────────────────

/// Manages file watching for a project
pub struct FileWatcher {
    project_root: PathBuf,
    watch_root: PathBuf,
    scope: WatchScope,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("project_root", &self.project_root)
            .field("watch_root", &self.watch_root)
            .field("pattern", &self.scope.pattern())
            .field("running", &self.is_running())
            .finish()
    }
}

impl FileWatcher {
    /// Create a watcher for `project_root` using the `[watcher]` settings.
    ///
    /// The project root is canonicalized so notify's absolute paths can be
    /// made relative again.
    pub fn new(project_root: &Path, settings: &WatcherSettings) -> Result<Self> {
        let project_root = dunce::canonicalize(project_root).map_err(|_| {
            Error::WatchRootMissing {
                path: project_root.to_path_buf(),
            }
        })?;
        let watch_root = project_root.join(&settings.root);
        let scope = WatchScope::new(project_root.clone(), &settings.pattern)?;

        Ok(Self {
            project_root,
            watch_root,
            scope,
            watcher: None,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn watch_root(&self) -> &Path {
        &self.watch_root
    }

    /// Start watching; matching events are sent to `event_tx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WatchRootMissing`] if the watch root does not exist
    /// and [`Error::Watcher`] if the OS watcher cannot be set up.
    pub fn start(&mut self, event_tx: mpsc::UnboundedSender<WatchEvent>) -> Result<()> {
        if self.is_running() {
            return Err(Error::watcher("Watcher is already running"));
        }
        if !self.watch_root.is_dir() {
            return Err(Error::WatchRootMissing {
                path: self.watch_root.clone(),
            });
        }

        let scope = self.scope.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for (kind, path) in classify_event(&event) {
                        if let Some(relative) = scope.relative_match(path) {
                            trace!("{:?} {}", kind, relative.display());
                            let _ = event_tx.send(WatchEvent {
                                kind,
                                path: relative,
                            });
                        }
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            }
        })
        .map_err(|e| Error::watcher(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(&self.watch_root, RecursiveMode::Recursive)
            .map_err(|e| {
                Error::watcher(format!(
                    "Failed to watch {}: {}",
                    self.watch_root.display(),
                    e
                ))
            })?;

        info!(
            "Watching {} for {}",
            self.watch_root.display(),
            self.scope.pattern()
        );
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Stop the file watcher
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            info!("File watcher stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─────────────────────────────────────────────────────────
// Trigger loop
// ─────────────────────────────────────────────────────────

/// Run once immediately, then once per watch event until the channel closes.
pub fn spawn_trigger_loop(
    runner: Arc<CheckRunner>,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Initial run of {}", runner.command().display());
        runner.spawn_run();

        while let Some(event) = events.recv().await {
            info!(
                "{} {}, running {}",
                match event.kind {
                    ChangeKind::Changed => "Changed",
                    ChangeKind::Removed => "Removed",
                },
                event.path.display(),
                runner.command().display()
            );
            runner.spawn_run();
        }

        debug!("Trigger loop exiting");
    })
}
