//! Check command process management
//!
//! A [`CheckRunner`] executes the configured check command once per call to
//! [`CheckRunner::run`]. Each call owns a private [`Invocation`], an explicit
//! state machine that makes "exactly one terminal event per run" a property
//! of the types instead of the control flow:
//!
//! ```text
//! Idle ──start──▶ Started ──complete(0)────▶ Succeeded
//!                    │    ──complete(≠0)───▶ Failed
//!                    └────fail_spawn───────▶ SpawnFailed
//! ```
//!
//! Terminal phases accept no further transitions. Dropping the invocation
//! returns the runner to idle; nothing is remembered between runs.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use overlay_core::events::{
    command_line, now_millis, LintFailed, LintFinished, LintStarted, OverlayPayload,
};
use overlay_core::prelude::*;
use overlay_core::strip_ansi_codes;

use crate::protocol::{HotPayload, HotSink};

/// Size of a single read from the child's pipes
const READ_CHUNK_SIZE: usize = 8 * 1024;

// ─────────────────────────────────────────────────────────
// Command
// ─────────────────────────────────────────────────────────

/// The statically configured check command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; inherits the server's when `None`
    pub cwd: Option<PathBuf>,
}

impl CheckCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn display(&self) -> String {
        command_line(&self.argv())
    }
}

// ─────────────────────────────────────────────────────────
// Invocation state machine
// ─────────────────────────────────────────────────────────

/// Lifecycle phase of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Started,
    Succeeded,
    Failed,
    SpawnFailed,
}

impl RunPhase {
    pub fn name(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Started => "started",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Failed => "failed",
            RunPhase::SpawnFailed => "spawn-failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Succeeded | RunPhase::Failed | RunPhase::SpawnFailed
        )
    }

    fn can_transition_to(&self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (RunPhase::Idle, RunPhase::Started)
                | (RunPhase::Started, RunPhase::Succeeded)
                | (RunPhase::Started, RunPhase::Failed)
                | (RunPhase::Started, RunPhase::SpawnFailed)
        )
    }
}

/// One execution attempt of the check command
#[derive(Debug)]
pub struct Invocation {
    command: Vec<String>,
    phase: RunPhase,
    output: Vec<u8>,
}

impl Invocation {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            phase: RunPhase::Idle,
            output: Vec::new(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    fn transition(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.phase.name(),
                to: next.name(),
            });
        }
        trace!("invocation {} -> {}", self.phase.name(), next.name());
        self.phase = next;
        Ok(())
    }

    /// `Idle -> Started`
    pub fn start(&mut self, timestamp: i64) -> Result<LintStarted> {
        self.transition(RunPhase::Started)?;
        Ok(LintStarted {
            command: self.command.clone(),
            timestamp,
        })
    }

    /// Append captured bytes; ignored outside `Started`
    pub fn append(&mut self, chunk: &[u8]) {
        if self.phase == RunPhase::Started {
            self.output.extend_from_slice(chunk);
        }
    }

    /// `Started -> Succeeded | Failed`. Only an exit code of exactly zero
    /// counts as success; a missing code (killed by a signal) is a failure.
    pub fn complete(&mut self, exit_code: Option<i32>) -> Result<LintFinished> {
        let success = exit_code == Some(0);
        self.transition(if success {
            RunPhase::Succeeded
        } else {
            RunPhase::Failed
        })?;

        let output = String::from_utf8_lossy(&std::mem::take(&mut self.output)).into_owned();
        let clean = strip_ansi_codes(&output);

        Ok(LintFinished {
            command: self.command.clone(),
            exit_code,
            success,
            output,
            clean,
        })
    }

    /// `Started -> SpawnFailed`
    pub fn fail_spawn(&mut self, message: impl Into<String>, timestamp: i64) -> Result<LintFailed> {
        self.transition(RunPhase::SpawnFailed)?;
        Ok(LintFailed {
            command: self.command.clone(),
            message: message.into(),
            timestamp,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────────────────

/// What to do when a newer run starts before an older one finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPolicy {
    /// Every run applies its own outcome, in completion order
    #[default]
    Overlap,
    /// Only the most recently triggered run may reload or raise the error
    /// overlay; older runs still report their terminal event
    LatestWins,
}

/// Which pipe a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputChunk {
    bytes: Vec<u8>,
}

/// Runs the check command and reports every run through a [`HotSink`]
pub struct CheckRunner {
    command: CheckCommand,
    sink: Arc<dyn HotSink>,
    mirror_output: bool,
    policy: RunPolicy,
    /// Bumped on every run; compared at completion under `LatestWins`
    generation: AtomicU64,
}

impl std::fmt::Debug for CheckRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckRunner")
            .field("command", &self.command)
            .field("mirror_output", &self.mirror_output)
            .field("policy", &self.policy)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

impl CheckRunner {
    pub fn new(command: CheckCommand, sink: Arc<dyn HotSink>) -> Self {
        Self {
            command,
            sink,
            mirror_output: true,
            policy: RunPolicy::Overlap,
            generation: AtomicU64::new(0),
        }
    }

    /// Copy the child's output to our own stdout/stderr as it arrives
    pub fn with_mirror_output(mut self, enabled: bool) -> Self {
        self.mirror_output = enabled;
        self
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn command(&self) -> &CheckCommand {
        &self.command
    }

    pub fn policy(&self) -> RunPolicy {
        self.policy
    }

    /// Start a run on its own task without waiting for it
    pub fn spawn_run(self: &Arc<Self>) -> JoinHandle<RunPhase> {
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.run().await })
    }

    /// Execute the check command once.
    ///
    /// Emits `lint-started` before spawning, then exactly one of
    /// `lint-finished` or `lint-failed`. A failed run also raises the error
    /// overlay; a successful one requests a full reload. Nothing is
    /// propagated to the caller; the returned phase is informational.
    pub async fn run(&self) -> RunPhase {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let argv = self.command.argv();
        let mut invocation = Invocation::new(argv.clone());

        match invocation.start(now_millis()) {
            Ok(started) => self.emit(OverlayPayload::LintStarted(started)),
            Err(e) => {
                error!("Could not start invocation: {}", e);
                return invocation.phase();
            }
        }

        info!("Running check: {}", self.command.display());

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.command.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = Error::process_spawn(self.command.display(), e.to_string());
                error!("{}", err);
                match invocation.fail_spawn(e.to_string(), now_millis()) {
                    Ok(failed) => self.emit(OverlayPayload::LintFailed(failed)),
                    Err(e) => error!("Could not record spawn failure: {}", e),
                }
                return invocation.phase();
            }
        };

        debug!("Check process started with PID: {:?}", child.id());

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<OutputChunk>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_stream(
                stdout,
                OutputStream::Stdout,
                self.mirror_output,
                chunk_tx.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_stream(
                stderr,
                OutputStream::Stderr,
                self.mirror_output,
                chunk_tx.clone(),
            ));
        }
        drop(chunk_tx);

        // Both readers hold a sender; the loop ends once both pipes hit EOF
        while let Some(chunk) = chunk_rx.recv().await {
            invocation.append(&chunk.bytes);
        }

        let exit_code = match child.wait().await {
            Ok(status) => {
                debug!("Check process exited with status: {:?}", status);
                status.code()
            }
            Err(e) => {
                error!("Error waiting for check process: {}", e);
                None
            }
        };

        let finished = match invocation.complete(exit_code) {
            Ok(finished) => finished,
            Err(e) => {
                error!("Could not complete invocation: {}", e);
                return invocation.phase();
            }
        };

        let success = finished.success;
        let clean = finished.clean.clone();
        self.emit(OverlayPayload::LintFinished(finished));

        if !self.is_current(generation) {
            debug!(
                "Run #{} superseded by a newer run, skipping reload/overlay",
                generation
            );
            return invocation.phase();
        }

        if success {
            info!("Check passed: {}", self.command.display());
            self.sink.send(HotPayload::FullReload);
        } else {
            error!("{}", clean);
            self.sink
                .send(HotPayload::command_failed(invocation.command(), &clean));
        }

        invocation.phase()
    }

    fn is_current(&self, generation: u64) -> bool {
        match self.policy {
            RunPolicy::Overlap => true,
            RunPolicy::LatestWins => self.generation.load(Ordering::SeqCst) == generation,
        }
    }

    fn emit(&self, payload: OverlayPayload) {
        trace!("emitting {}", payload.event_name());
        self.sink.send(HotPayload::custom(&payload));
    }
}

/// Read raw bytes from one pipe, mirroring and forwarding each chunk.
async fn read_stream<R>(
    mut reader: R,
    stream: OutputStream,
    mirror: bool,
    tx: mpsc::UnboundedSender<OutputChunk>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to read check {:?}: {}", stream, e);
                break;
            }
        };

        if mirror {
            mirror_chunk(stream, &buf[..n]).await;
        }

        if tx
            .send(OutputChunk {
                bytes: buf[..n].to_vec(),
            })
            .is_err()
        {
            debug!("{:?} accumulator closed", stream);
            break;
        }
    }

    trace!("{:?} reader finished", stream);
}

async fn mirror_chunk(stream: OutputStream, bytes: &[u8]) {
    let result = match stream {
        OutputStream::Stdout => {
            let mut out = tokio::io::stdout();
            match out.write_all(bytes).await {
                Ok(()) => out.flush().await,
                Err(e) => Err(e),
            }
        }
        OutputStream::Stderr => {
            let mut err = tokio::io::stderr();
            match err.write_all(bytes).await {
                Ok(()) => err.flush().await,
                Err(e) => Err(e),
            }
        }
    };

    if let Err(e) = result {
        debug!("Failed to mirror {:?}: {}", stream, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{custom_frames, drain_frames, sh_command};
    use std::time::Duration;

    fn runner_with(command: CheckCommand) -> (Arc<CheckRunner>, mpsc::UnboundedReceiver<HotPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = CheckRunner::new(command, Arc::new(tx)).with_mirror_output(false);
        (Arc::new(runner), rx)
    }

    // ── Invocation ────────────────────────────────────────

    #[test]
    fn test_invocation_happy_path() {
        let mut inv = Invocation::new(vec!["check".into()]);
        assert_eq!(inv.phase(), RunPhase::Idle);

        let started = inv.start(7).unwrap();
        assert_eq!(started.timestamp, 7);
        assert_eq!(inv.phase(), RunPhase::Started);

        inv.append(b"\x1b[32mOK\x1b[0m\n");
        let finished = inv.complete(Some(0)).unwrap();
        assert!(finished.success);
        assert_eq!(finished.output, "\x1b[32mOK\x1b[0m\n");
        assert_eq!(finished.clean, "OK\n");
        assert_eq!(inv.phase(), RunPhase::Succeeded);
        assert!(inv.phase().is_terminal());
    }

    #[test]
    fn test_invocation_rejects_second_terminal_event() {
        let mut inv = Invocation::new(vec!["check".into()]);
        inv.start(0).unwrap();
        inv.complete(Some(1)).unwrap();

        assert!(matches!(
            inv.complete(Some(0)),
            Err(Error::InvalidTransition { from: "failed", .. })
        ));
        assert!(matches!(
            inv.fail_spawn("late", 0),
            Err(Error::InvalidTransition {
                from: "failed",
                to: "spawn-failed"
            })
        ));
        assert_eq!(inv.phase(), RunPhase::Failed);
    }

    #[test]
    fn test_invocation_requires_start() {
        let mut inv = Invocation::new(vec!["check".into()]);
        assert!(inv.complete(Some(0)).is_err());
        assert!(inv.fail_spawn("nope", 0).is_err());

        inv.start(0).unwrap();
        assert!(inv.start(1).is_err());
    }

    #[test]
    fn test_invocation_missing_exit_code_is_failure() {
        let mut inv = Invocation::new(vec!["check".into()]);
        inv.start(0).unwrap();
        let finished = inv.complete(None).unwrap();
        assert!(!finished.success);
        assert_eq!(finished.exit_code, None);
        assert_eq!(inv.phase(), RunPhase::Failed);
    }

    #[test]
    fn test_invocation_append_ignored_after_terminal() {
        let mut inv = Invocation::new(vec!["check".into()]);
        inv.append(b"before start");
        inv.start(0).unwrap();
        inv.append(b"during");
        let finished = inv.complete(Some(0)).unwrap();
        inv.append(b"after");
        assert_eq!(finished.output, "during");
    }

    #[test]
    fn test_invocation_lossy_utf8() {
        let mut inv = Invocation::new(vec!["check".into()]);
        inv.start(0).unwrap();
        inv.append(&[b'o', b'k', 0xff]);
        let finished = inv.complete(Some(0)).unwrap();
        assert!(finished.output.starts_with("ok"));
    }

    #[test]
    fn test_check_command_argv() {
        let cmd = CheckCommand::new("npm", vec!["run".into(), "lint".into()]);
        assert_eq!(cmd.argv(), vec!["npm", "run", "lint"]);
        assert_eq!(cmd.display(), "npm run lint");
    }

    // ── Runner ────────────────────────────────────────────

    #[tokio::test]
    async fn test_run_success_emits_started_finished_reload() {
        let (runner, mut rx) = runner_with(sh_command("printf 'OK\\n'"));

        assert_eq!(runner.run().await, RunPhase::Succeeded);

        let frames = drain_frames(&mut rx);
        let events = custom_frames(&frames);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "command-overlay:lint-started");
        assert_eq!(events[1].0, "command-overlay:lint-finished");

        let finished = &events[1].1;
        assert_eq!(finished["success"], true);
        assert_eq!(finished["exitCode"], 0);
        assert_eq!(finished["output"], "OK\n");
        assert_eq!(finished["clean"], "OK\n");

        assert_eq!(frames.last(), Some(&HotPayload::FullReload));
        assert!(!frames
            .iter()
            .any(|f| matches!(f, HotPayload::Error { .. })));
    }

    #[tokio::test]
    async fn test_run_failure_raises_overlay_without_reload() {
        let (runner, mut rx) =
            runner_with(sh_command("printf '\\033[31merror\\033[0m bad thing\\n' >&2; exit 1"));

        assert_eq!(runner.run().await, RunPhase::Failed);

        let frames = drain_frames(&mut rx);
        let events = custom_frames(&frames);
        let finished = &events[1].1;
        assert_eq!(finished["success"], false);
        assert_eq!(finished["exitCode"], 1);
        assert_eq!(finished["clean"], "error bad thing\n");
        assert!(finished["output"].as_str().unwrap().contains('\x1b'));

        assert!(!frames.contains(&HotPayload::FullReload));
        match frames.last() {
            Some(HotPayload::Error { err }) => {
                assert_eq!(err.plugin, "command-overlay");
                assert!(err.message.starts_with("Command failed: sh -c"));
                assert!(err.message.contains("error bad thing"));
                assert!(!err.message.contains('\x1b'));
            }
            other => panic!("expected error overlay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_spawn_failure_emits_only_lint_failed() {
        let (runner, mut rx) = runner_with(CheckCommand::new(
            "definitely-not-a-real-linter-binary",
            vec!["src/".into()],
        ));

        assert_eq!(runner.run().await, RunPhase::SpawnFailed);

        let frames = drain_frames(&mut rx);
        let events = custom_frames(&frames);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "command-overlay:lint-started");
        assert_eq!(events[1].0, "command-overlay:lint-failed");
        assert!(!events[1].1["message"].as_str().unwrap().is_empty());
        assert_eq!(
            events[1].1["command"],
            serde_json::json!(["definitely-not-a-real-linter-binary", "src/"])
        );

        // Spawn failures never reload or raise the overlay
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test]
    async fn test_run_stdin_is_closed() {
        // `cat` would block forever on an inherited or piped stdin
        let (runner, mut rx) = runner_with(sh_command("cat; echo done"));

        let phase = tokio::time::timeout(Duration::from_secs(5), runner.run())
            .await
            .expect("check command must not wait on stdin");
        assert_eq!(phase, RunPhase::Succeeded);

        let frames = drain_frames(&mut rx);
        let events = custom_frames(&frames);
        assert_eq!(events[1].1["clean"], "done\n");
    }

    #[tokio::test]
    async fn test_run_captures_both_streams() {
        let (runner, mut rx) = runner_with(sh_command("echo out; echo err >&2"));
        runner.run().await;

        let frames = drain_frames(&mut rx);
        let events = custom_frames(&frames);
        let clean = events[1].1["clean"].as_str().unwrap();
        assert!(clean.contains("out\n"));
        assert!(clean.contains("err\n"));
    }

    #[tokio::test]
    async fn test_run_killed_process_has_no_exit_code() {
        let (runner, mut rx) = runner_with(sh_command("kill -9 $$"));
        assert_eq!(runner.run().await, RunPhase::Failed);

        let frames = drain_frames(&mut rx);
        let events = custom_frames(&frames);
        assert!(events[1].1["exitCode"].is_null());
        assert_eq!(events[1].1["success"], false);
    }

    #[tokio::test]
    async fn test_overlapping_runs_stay_independent() {
        let (runner, mut rx) = runner_with(sh_command("echo run; sleep 0.2"));

        let first = runner.spawn_run();
        let second = runner.spawn_run();
        assert_eq!(first.await.unwrap(), RunPhase::Succeeded);
        assert_eq!(second.await.unwrap(), RunPhase::Succeeded);

        let frames = drain_frames(&mut rx);
        let events = custom_frames(&frames);
        let started = events
            .iter()
            .filter(|(name, _)| name == "command-overlay:lint-started")
            .count();
        let finished: Vec<_> = events
            .iter()
            .filter(|(name, _)| name == "command-overlay:lint-finished")
            .collect();
        assert_eq!(started, 2);
        assert_eq!(finished.len(), 2);
        for (_, data) in finished {
            // Each run only sees its own output
            assert_eq!(data["clean"], "run\n");
        }

        let reloads = frames
            .iter()
            .filter(|f| **f == HotPayload::FullReload)
            .count();
        assert_eq!(reloads, 2);
    }

    #[tokio::test]
    async fn test_latest_wins_suppresses_stale_side_effects() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = Arc::new(
            CheckRunner::new(sh_command("sleep 0.2"), Arc::new(tx))
                .with_mirror_output(false)
                .with_policy(RunPolicy::LatestWins),
        );

        let first = runner.spawn_run();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = runner.spawn_run();
        first.await.unwrap();
        second.await.unwrap();

        let frames = drain_frames(&mut rx);
        let finished = custom_frames(&frames)
            .into_iter()
            .filter(|(name, _)| name == "command-overlay:lint-finished")
            .count();
        let reloads = frames
            .iter()
            .filter(|f| **f == HotPayload::FullReload)
            .count();

        // Both runs end with a terminal event, only the newest reloads
        assert_eq!(finished, 2);
        assert_eq!(reloads, 1);
    }
}
