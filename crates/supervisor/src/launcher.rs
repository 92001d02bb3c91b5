// Process launcher
//
// Starts the engine as a child process with an environment overlay, pipes its
// output into tracing, and watches for exit. A background task owns the OS
// handle; callers hold a ChildProcess that can observe the exit and request
// termination. A stop sends SIGTERM, waits out the grace period, then kills.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use coldstart_core::telemetry::ENGINE_LOG_TARGET;
use coldstart_core::workflow::WORKFLOWS_DIR;
use coldstart_core::{EngineConfig, SupervisorError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Upper bound on waiting for a killed process to be reaped
const KILL_WAIT: Duration = Duration::from_secs(5);

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Layered over the ambient environment, never replacing it
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Launch settings for the engine server described by `config`
    pub fn for_engine(config: &EngineConfig) -> Self {
        Self {
            program: config.command.clone(),
            args: config.args.clone(),
            env: config.environment_overlay(),
        }
    }
}

/// How a child terminated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// True when the exit followed a stop request
    pub requested: bool,
}

impl ExitInfo {
    fn from_status(status: ExitStatus, requested: bool) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            requested,
        }
    }

    fn unknown(requested: bool) -> Self {
        Self {
            code: None,
            signal: None,
            requested,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Handle to one engine generation
///
/// Dropping the handle terminates the process.
pub struct ChildProcess {
    pid: Option<u32>,
    generation: u32,
    started_at: Instant,
    stop_tx: Option<oneshot::Sender<Duration>>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

impl fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildProcess")
            .field("pid", &self.pid)
            .field("generation", &self.generation)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl ChildProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Exit details, once the process has terminated
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit_rx.borrow().clone()
    }

    /// Resolves when the process has exited
    pub async fn exited(&self) -> ExitInfo {
        let mut rx = self.exit_rx.clone();
        let info = match rx.wait_for(Option::is_some).await {
            Ok(info) => info.clone().unwrap_or_else(|| ExitInfo::unknown(false)),
            Err(_) => ExitInfo::unknown(false),
        };
        info
    }

    /// Ask the exit watcher to terminate the process, allowing `grace` before a kill
    fn request_stop(&mut self, grace: Duration) -> bool {
        match self.stop_tx.take() {
            Some(tx) => tx.send(grace).is_ok(),
            None => false,
        }
    }
}

/// Starts and stops engine processes
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    data_dir: PathBuf,
    stop_grace: Duration,
}

impl ProcessLauncher {
    pub fn new(data_dir: impl Into<PathBuf>, stop_grace: Duration) -> Self {
        Self {
            data_dir: data_dir.into(),
            stop_grace,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.data_dir.clone(), config.stop_grace)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Wipe residual engine state and recreate an empty data directory
    ///
    /// Destructive. The caller runs this once per cold boot, never on a warm
    /// reuse path.
    pub async fn reset_data_dir(&self) -> Result<(), SupervisorError> {
        match tokio::fs::remove_dir_all(&self.data_dir).await {
            Ok(()) => info!(path = %self.data_dir.display(), "Removed stale engine data directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SupervisorError::startup(
                    0,
                    format!("failed to clear {}: {e}", self.data_dir.display()),
                ))
            }
        }

        let workflows = self.data_dir.join(WORKFLOWS_DIR);
        tokio::fs::create_dir_all(&workflows).await.map_err(|e| {
            SupervisorError::startup(
                0,
                format!("failed to create {}: {e}", workflows.display()),
            )
        })?;

        debug!(path = %self.data_dir.display(), "Engine data directory initialized");
        Ok(())
    }

    /// Spawn a child for `generation`
    ///
    /// Stdin is detached; stdout and stderr are forwarded line by line to
    /// tracing under the `engine` target.
    pub fn start(&self, spec: &LaunchSpec, generation: u32) -> Result<ChildProcess, SupervisorError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            SupervisorError::startup(generation, format!("failed to spawn {}: {e}", spec.program))
        })?;

        let pid = child.id();
        info!(
            program = %spec.program,
            args = ?spec.args,
            pid = ?pid,
            generation,
            "Engine process started"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout", generation));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr", generation));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(watch_exit(child, generation, stop_rx, exit_tx));

        Ok(ChildProcess {
            pid,
            generation,
            started_at: Instant::now(),
            stop_tx: Some(stop_tx),
            exit_rx,
        })
    }

    /// Terminate the child held in `slot`, if any
    ///
    /// Safe on an empty slot or an already-dead process. The engine gets
    /// SIGTERM and the configured grace period to exit on its own before it
    /// is killed; this returns once the exit has been observed.
    pub async fn stop(&self, slot: &mut Option<ChildProcess>) {
        let Some(mut child) = slot.take() else {
            return;
        };

        if let Some(exit) = child.exit_info() {
            debug!(generation = child.generation, %exit, "Engine process already exited");
            return;
        }

        if !child.request_stop(self.stop_grace) {
            debug!(generation = child.generation, "Engine exit watcher already finished");
            return;
        }

        match tokio::time::timeout(self.stop_grace + KILL_WAIT, child.exited()).await {
            Ok(exit) => info!(
                generation = child.generation,
                uptime_ms = child.uptime().as_millis() as u64,
                %exit,
                "Engine process stopped"
            ),
            Err(_) => warn!(
                generation = child.generation,
                grace = ?self.stop_grace,
                "Engine process did not exit after kill"
            ),
        }
    }
}

async fn watch_exit(
    mut child: Child,
    generation: u32,
    stop_rx: oneshot::Receiver<Duration>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    // A dropped handle closes the stop channel, which kills the child outright
    let (status, requested) = tokio::select! {
        status = child.wait() => (status, false),
        request = stop_rx => match request {
            Ok(grace) => (terminate(&mut child, generation, grace).await, true),
            Err(_) => (kill(&mut child, generation).await, true),
        },
    };

    let info = match status {
        Ok(status) => ExitInfo::from_status(status, requested),
        Err(e) => {
            warn!(generation, error = %e, "Failed to wait for engine process");
            ExitInfo::unknown(requested)
        }
    };

    if !requested {
        warn!(generation, exit = %info, "Engine process exited unexpectedly");
    }

    let _ = exit_tx.send(Some(info));
}

async fn terminate(
    child: &mut Child,
    generation: u32,
    grace: Duration,
) -> std::io::Result<ExitStatus> {
    if send_sigterm(child, generation) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => return status,
            Err(_) => warn!(
                generation,
                grace = ?grace,
                "Engine process ignored SIGTERM within grace period, killing"
            ),
        }
    }
    kill(child, generation).await
}

async fn kill(child: &mut Child, generation: u32) -> std::io::Result<ExitStatus> {
    if let Err(e) = child.start_kill() {
        debug!(generation, error = %e, "Kill request failed");
    }
    child.wait().await
}

#[cfg(unix)]
fn send_sigterm(child: &Child, generation: u32) -> bool {
    let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return false;
    };
    // SAFETY: kill(2) only takes integers. The pid is our own child and has not
    // been reaped yet, because reaping happens in this task.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        debug!(generation, error = %std::io::Error::last_os_error(), "SIGTERM failed");
        return false;
    }
    debug!(generation, pid, "Sent SIGTERM to engine process");
    true
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child, _generation: u32) -> bool {
    false
}

async fn forward_output<R>(reader: R, stream: &'static str, generation: u32)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                info!(target: ENGINE_LOG_TARGET, generation, stream, "{}", line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(generation, stream, error = %e, "Stopped reading engine output");
                break;
            }
        }
    }
}
