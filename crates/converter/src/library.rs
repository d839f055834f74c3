//! Ownership of the external converter process.
//!
//! At most one converter runs per [`ConversionLib`]. Output from the process
//! is buffered and announced on an ordered event channel; consumers pull the
//! buffered text with [`ConversionLib::read_converter_output`] and parse it
//! through the library's [`OutputReader`].

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ConverterConfig;
use crate::error::ConverterError;
use crate::prober::Prober;
use crate::reader::OutputReader;

pub const CONVERTER_NAME: &str = "ffmpeg";
pub const PROBER_NAME: &str = "ffprobe";

/// Lifecycle of the converter process as seen by the library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConverterState {
    #[default]
    Idle,
    Starting,
    Running,
    /// Terminated on request
    Stopped,
    /// Exited on its own with a success status
    Finished,
    /// Failed exit status, spawn failure, or a fatal phrase in the output
    ErrorOccurred,
}

impl ConverterState {
    pub fn is_active(&self) -> bool {
        matches!(self, ConverterState::Starting | ConverterState::Running)
    }
}

/// Identifies one converter invocation; events carry it so that late events
/// from an earlier run can be told apart.
pub type RunId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryEvent {
    StateChanged { run: RunId, state: ConverterState },
    OutputArrived { run: RunId },
}

/// Converter version from `-version`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl LibraryVersion {
    /// Parse the first line of `-version` output.
    /// Example: "ffmpeg version 6.1.1-3ubuntu5 Copyright ..." -> 6.1.1
    pub fn parse(version_str: &str) -> Result<Self, ConverterError> {
        let invalid = || ConverterError::Version(version_str.to_string());

        let mut words = version_str.split_whitespace();
        words.find(|w| *w == "version").ok_or_else(invalid)?;
        let token = words.next().ok_or_else(invalid)?;
        let token = token.trim_start_matches('n');

        let mut parts = token.split('.').map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        });

        let major = parts.next().flatten().ok_or_else(invalid)?;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);

        Ok(LibraryVersion { major, minor, patch })
    }
}

/// Find a binary: the explicit path if configured, otherwise the first hit
/// in `install_dirs`, otherwise a PATH search.
pub fn locate_binary(name: &str, explicit: Option<&Path>, install_dirs: &[PathBuf]) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!("Configured {} binary does not exist: {}", name, path.display());
        return None;
    }

    let file_name = format!("{}{}", name, std::env::consts::EXE_SUFFIX);
    for dir in install_dirs {
        let candidate = dir.join(&file_name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    which::which(name).ok()
}

#[derive(Debug, Default)]
struct Shared {
    state: ConverterState,
    output: String,
    exit_code: Option<i32>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_state(
    shared: &Mutex<Shared>,
    events: &mpsc::UnboundedSender<LibraryEvent>,
    run: RunId,
    state: ConverterState,
) {
    lock(shared).state = state;
    let _ = events.send(LibraryEvent::StateChanged { run, state });
}

struct ActiveRun {
    id: RunId,
    stop_tx: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

/// Owner of the converter subprocess
pub struct ConversionLib {
    converter_bin: Option<PathBuf>,
    prober_bin: Option<PathBuf>,
    install_dirs: Vec<PathBuf>,
    stop_grace: Duration,
    shared: Arc<Mutex<Shared>>,
    events_tx: mpsc::UnboundedSender<LibraryEvent>,
    events_rx: mpsc::UnboundedReceiver<LibraryEvent>,
    active: Option<ActiveRun>,
    next_run: RunId,
    pub reader: OutputReader,
}

impl ConversionLib {
    pub fn new(cfg: &ConverterConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            converter_bin: cfg.converter_bin.clone(),
            prober_bin: cfg.prober_bin.clone(),
            install_dirs: cfg.install_dirs.clone(),
            stop_grace: Duration::from_millis(cfg.stop_grace_ms),
            shared: Arc::new(Mutex::new(Shared::default())),
            events_tx,
            events_rx,
            active: None,
            next_run: 1,
            reader: OutputReader::new(),
        }
    }

    /// Resolved converter binary
    pub fn library_path(&self) -> Result<PathBuf, ConverterError> {
        locate_binary(CONVERTER_NAME, self.converter_bin.as_deref(), &self.install_dirs)
            .ok_or_else(|| ConverterError::NotFound(CONVERTER_NAME.to_string()))
    }

    /// Resolved prober binary
    pub fn prober_path(&self) -> Result<PathBuf, ConverterError> {
        locate_binary(PROBER_NAME, self.prober_bin.as_deref(), &self.install_dirs)
            .ok_or_else(|| ConverterError::NotFound(PROBER_NAME.to_string()))
    }

    pub fn prober(&self) -> Result<Prober, ConverterError> {
        Ok(Prober::new(self.prober_path()?))
    }

    /// Run the converter with `-version` and parse the result
    pub async fn library_version(&self) -> Result<LibraryVersion, ConverterError> {
        let path = self.library_path()?;
        let output = Command::new(&path)
            .arg("-version")
            .output()
            .await
            .map_err(|source| ConverterError::Spawn { path: path.clone(), source })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().next().unwrap_or_default();
        LibraryVersion::parse(first_line)
    }

    /// Spawn the converter with `args`.
    ///
    /// The state is `Starting` when this returns; the transition to `Running`
    /// is made by the supervising task once the event loop gets to it.
    pub fn start_converter(&mut self, args: &[String]) -> Result<RunId, ConverterError> {
        if self.converter_is_running() {
            return Err(ConverterError::AlreadyRunning);
        }
        self.active = None;

        let path = self.library_path()?;
        let run = self.next_run;
        self.next_run += 1;

        {
            let mut shared = lock(&self.shared);
            shared.output.clear();
            shared.exit_code = None;
        }
        set_state(&self.shared, &self.events_tx, run, ConverterState::Starting);
        debug!("Executing converter: {} {}", path.display(), args.join(" "));

        let mut cmd = Command::new(&path);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!("Failed to spawn converter {}: {}", path.display(), source);
                set_state(&self.shared, &self.events_tx, run, ConverterState::ErrorOccurred);
                return Err(ConverterError::Spawn { path, source });
            }
        };

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, self.shared.clone(), self.events_tx.clone(), run)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, self.shared.clone(), self.events_tx.clone(), run)));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(
            child,
            stop_rx,
            readers,
            self.shared.clone(),
            self.events_tx.clone(),
            run,
            self.stop_grace,
        ));

        self.active = Some(ActiveRun {
            id: run,
            stop_tx: Some(stop_tx),
            supervisor,
        });
        info!("Converter started (run {})", run);
        Ok(run)
    }

    /// Current lifecycle state; never blocks on the process
    pub fn converter_state(&self) -> ConverterState {
        lock(&self.shared).state
    }

    /// Whether a converter process is still alive
    pub fn converter_is_running(&self) -> bool {
        self.active
            .as_ref()
            .map_or(false, |run| !run.supervisor.is_finished())
    }

    /// Run id of the most recent invocation
    pub fn current_run(&self) -> Option<RunId> {
        self.active.as_ref().map(|run| run.id)
    }

    /// Exit code of the last finished process, if it exited normally
    pub fn last_exit_code(&self) -> Option<i32> {
        lock(&self.shared).exit_code
    }

    /// Output buffered since the previous call; empty if nothing new
    pub fn read_converter_output(&self) -> String {
        std::mem::take(&mut lock(&self.shared).output)
    }

    /// Check the reader's chunk for a fatal phrase. A match moves the library
    /// into `ErrorOccurred` while the process may still be alive; callers are
    /// expected to stop it.
    pub fn check_library_error(&self) -> Option<&'static str> {
        let phrase = self.reader.catch_library_error()?;
        let run = self.current_run().unwrap_or_default();
        warn!("Converter reported {:?} (run {})", phrase, run);
        set_state(&self.shared, &self.events_tx, run, ConverterState::ErrorOccurred);
        Some(phrase)
    }

    /// Ask the converter to quit, then kill it if it is still alive after the
    /// grace period. Returns once the process is gone. No-op when idle.
    pub async fn stop_converter(&mut self) -> ConverterState {
        if let Some(mut run) = self.active.take() {
            if let Some(stop_tx) = run.stop_tx.take() {
                let _ = stop_tx.send(());
            }
            if let Err(e) = run.supervisor.await {
                error!("Converter supervisor for run {} failed: {}", run.id, e);
            }
        }
        self.converter_state()
    }

    /// Next event, in emission order
    pub async fn next_event(&mut self) -> Option<LibraryEvent> {
        self.events_rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_next_event(&mut self) -> Option<LibraryEvent> {
        self.events_rx.try_recv().ok()
    }
}

async fn pump<R: AsyncRead + Unpin>(
    mut stream: R,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<LibraryEvent>,
    run: RunId,
) {
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                lock(&shared).output.push_str(&text);
                let _ = events.send(LibraryEvent::OutputArrived { run });
            }
            Err(e) => {
                debug!("Converter output stream closed (run {}): {}", run, e);
                break;
            }
        }
    }
}

async fn supervise(
    mut child: Child,
    stop_rx: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<LibraryEvent>,
    run: RunId,
    grace: Duration,
) {
    set_state(&shared, &events, run, ConverterState::Running);
    let stdin = child.stdin.take();

    let (status, stopped) = tokio::select! {
        status = child.wait() => (status, false),
        _ = stop_rx => (graceful_stop(&mut child, stdin, grace).await, true),
    };

    // Let buffered output reach the channel before the terminal state does.
    // A grandchild may still hold the pipes; its readers must not outlive
    // the run, or their text would land in the next run's buffer.
    let deadline = tokio::time::Instant::now() + grace;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            debug!("Abandoning converter output stream (run {})", run);
            reader.abort();
        }
    }

    let already_failed = {
        let mut shared = lock(&shared);
        shared.exit_code = status.as_ref().ok().and_then(ExitStatus::code);
        shared.state == ConverterState::ErrorOccurred
    };

    let state = match &status {
        _ if already_failed => ConverterState::ErrorOccurred,
        _ if stopped => ConverterState::Stopped,
        Ok(s) if s.success() => ConverterState::Finished,
        Ok(s) => {
            warn!("Converter exited with {} (run {})", s, run);
            ConverterState::ErrorOccurred
        }
        Err(e) => {
            error!("Failed to wait for converter (run {}): {}", run, e);
            ConverterState::ErrorOccurred
        }
    };
    info!("Converter run {} ended: {:?}", run, state);
    set_state(&shared, &events, run, state);
}

async fn graceful_stop(
    child: &mut Child,
    stdin: Option<ChildStdin>,
    grace: Duration,
) -> std::io::Result<ExitStatus> {
    // The converter quits cleanly when it reads 'q' on stdin.
    if let Some(mut stdin) = stdin {
        let _ = stdin.write_all(b"q").await;
        let _ = stdin.flush().await;
    }

    // Half the grace period for 'q', the rest for SIGTERM.
    let half = grace / 2;
    if let Ok(status) = tokio::time::timeout(half, child.wait()).await {
        return status;
    }
    terminate(child);

    match tokio::time::timeout(grace - half, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("Converter did not exit within {:?}, killing it", grace);
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    debug!("Converter ignored 'q', sending SIGTERM to {}", pid);
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!("Failed to send SIGTERM to converter {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}
