//! Command Runner: child processes with timeouts and bounded, fully buffered output.
//!
//! [`CommandRunner`] decouples steps and probes from real subprocesses. Tests use
//! a scripted runner that returns canned output without spawning anything.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::StepFailure;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Lines of stderr quoted in a failure reason.
const STDERR_TAIL_LINES: usize = 3;

/// How long output is still collected after a timed-out child was killed.
/// Descendants may keep the pipes open; their output is abandoned after this.
const KILLED_OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// A command invocation: program, arguments and execution options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory override; inherits the provisioner's when `None`.
    pub cwd: Option<PathBuf>,
    /// Variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Indices into `args` that must never be logged.
    secret_args: Vec<usize>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            secret_args: Vec::new(),
        }
    }

    /// Build from an argv slice (`["ddev", "start"]`). Errors on an empty slice.
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Result<Self> {
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| anyhow!("command must not be empty"))?;
        Ok(Self::new(program.as_ref()).args(rest))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<S: AsRef<str>>(mut self, args: &[S]) -> Self {
        self.args
            .extend(args.iter().map(|arg| arg.as_ref().to_string()));
        self
    }

    /// Append an argument that is masked in [`CommandSpec::display`].
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    /// Program followed by arguments, secrets included. Used for matching, never logged.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Shell-like rendering with secret arguments masked.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for (idx, arg) in self.args.iter().enumerate() {
            if self.secret_args.contains(&idx) {
                parts.push("***".to_string());
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    Exited(i32),
    /// Terminated by a signal (no exit code).
    Signalled,
    /// Killed after exceeding its `CommandSpec` timeout.
    TimedOut,
    /// Never started (program missing, permissions, ...).
    SpawnFailed(String),
}

/// Captured child process result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: ExitState,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl CommandOutput {
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: ExitState::Exited(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            stdout_truncated: 0,
            stderr_truncated: 0,
        }
    }

    pub fn with_status(status: ExitState) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.status == ExitState::Exited(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ExitState::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// Whether the command ran to completion (any exit code).
    pub fn completed(&self) -> bool {
        matches!(self.status, ExitState::Exited(_))
    }

    /// Failure description for a non-successful run, `None` on exit 0.
    pub fn failure(&self, spec: &CommandSpec) -> Option<StepFailure> {
        let shown = spec.display();
        match &self.status {
            ExitState::Exited(0) => None,
            ExitState::Exited(code) => Some(StepFailure::command(with_stderr_tail(
                format!("`{shown}` exited with status {code}"),
                &self.stderr,
            ))),
            ExitState::Signalled => Some(StepFailure::command(with_stderr_tail(
                format!("`{shown}` was terminated by a signal"),
                &self.stderr,
            ))),
            ExitState::TimedOut => Some(StepFailure::timeout(format!(
                "timeout: `{shown}` did not finish within {}s",
                spec.timeout.as_secs()
            ))),
            ExitState::SpawnFailed(err) => Some(StepFailure::command(format!(
                "`{shown}` could not be started: {err}"
            ))),
        }
    }
}

fn with_stderr_tail(message: String, stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return message;
    }
    let tail = &lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..];
    format!("{message}: {}", tail.join(" | "))
}

/// Abstraction over subprocess execution.
pub trait CommandRunner {
    /// Run to completion. Never fails: spawn problems and timeouts are part of the output.
    fn run(&self, spec: &CommandSpec) -> CommandOutput;

    /// Resolve `program` on `PATH`.
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Run `spec` and convert anything but exit 0 into a [`StepFailure`].
pub fn must_succeed(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<CommandOutput, StepFailure> {
    let output = runner.run(spec);
    match output.failure(spec) {
        None => Ok(output),
        Some(failure) => {
            warn!(command = %spec.display(), reason = %failure.reason, "command failed");
            Err(failure)
        }
    }
}

/// Runner backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    #[instrument(skip_all, fields(command = %spec.display()))]
    fn run(&self, spec: &CommandSpec) -> CommandOutput {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        match run_command_with_timeout(cmd, spec.timeout, spec.output_limit_bytes) {
            Ok(raw) => {
                let status = if raw.timed_out {
                    ExitState::TimedOut
                } else {
                    match raw.status.code() {
                        Some(code) => ExitState::Exited(code),
                        None => ExitState::Signalled,
                    }
                };
                CommandOutput {
                    status,
                    stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
                    stdout_truncated: raw.stdout_truncated,
                    stderr_truncated: raw.stderr_truncated,
                }
            }
            Err(err) => CommandOutput::with_status(ExitState::SpawnFailed(format!("{err:#}"))),
        }
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Raw child process output.
#[derive(Debug)]
struct RawOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdout_truncated: usize,
    stderr_truncated: usize,
    timed_out: bool,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<RawOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let deadline = timed_out.then(|| Instant::now() + KILLED_OUTPUT_GRACE);
    let (stdout, stdout_truncated) = collect_output(&stdout_rx, deadline).context("read stdout")?;
    let (stderr, stderr_truncated) = collect_output(&stderr_rx, deadline).context("read stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(RawOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

type StreamOutput = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<StreamOutput> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone once the output was abandoned.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

/// Wait for a reader; with a `deadline`, give up on pipes still held open then.
fn collect_output(rx: &Receiver<StreamOutput>, deadline: Option<Instant>) -> StreamOutput {
    let Some(deadline) = deadline else {
        return rx
            .recv()
            .map_err(|_| anyhow!("output reader thread panicked"))?;
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("output pipe still held open by a descendant process, abandoning it");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
