//! External command execution with timeouts, bounded output, and durable logging.
//!
//! [`CommandRunner`] is the raw executor seam (scripted in tests).
//! [`run_logged`] wraps every invocation: it writes the command, its output
//! and its exit status to the [`LogSink`] before returning, and applies the
//! caller's [`ExitPolicy`].

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::template::display_command;
use crate::error::CommandFailedError;
use crate::io::log_sink::{LogSink, append_block};

/// A fully rendered command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    /// Overrides the runner's default timeout.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            cwd: cwd.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn display(&self) -> String {
        display_command(&self.argv)
    }
}

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Whether a non-zero exit aborts the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Non-zero exit (or timeout) is returned as [`CommandFailedError`].
    Fatal,
    /// Non-zero exit is a valid outcome; the result is returned as-is.
    Tolerate,
}

/// Raw command executor.
///
/// Implementations only fail when the command cannot be run at all (spawn
/// failure, broken pipes); exit status is reported in [`ProcessResult`].
pub trait CommandRunner {
    fn execute(&self, spec: &CommandSpec) -> Result<ProcessResult>;
}

/// Executor that spawns real processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    pub default_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl SystemRunner {
    pub fn new(default_timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            default_timeout,
            output_limit_bytes,
        }
    }
}

impl CommandRunner for SystemRunner {
    fn execute(&self, spec: &CommandSpec) -> Result<ProcessResult> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("empty command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&spec.cwd);
        run_command_with_timeout(
            cmd,
            spec.timeout.unwrap_or(self.default_timeout),
            self.output_limit_bytes,
        )
        .with_context(|| format!("run {}", spec.display()))
    }
}

/// Run `spec` through `runner`, logging everything to `log` before returning.
///
/// Spawn failures are logged and always propagated. A non-successful exit is
/// propagated only under [`ExitPolicy::Fatal`].
pub fn run_logged<R: CommandRunner + ?Sized>(
    runner: &R,
    log: &dyn LogSink,
    spec: &CommandSpec,
    policy: ExitPolicy,
) -> Result<ProcessResult> {
    let shown = spec.display();
    log.append(&format!("exec: {shown} (cwd {})", spec.cwd.display()))?;

    let result = match runner.execute(spec) {
        Ok(result) => result,
        Err(err) => {
            log.append(&format!("error: {shown}: {err:#}"))?;
            return Err(err);
        }
    };

    append_block(log, "stdout", &result.stdout)?;
    if result.stdout_truncated > 0 {
        log.append(&format!("stdout truncated {} bytes", result.stdout_truncated))?;
    }
    append_block(log, "stderr", &result.stderr)?;
    if result.stderr_truncated > 0 {
        log.append(&format!("stderr truncated {} bytes", result.stderr_truncated))?;
    }
    let code = match result.exit_code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    };
    if result.timed_out {
        log.append(&format!("exit: {code} (timed out) {shown}"))?;
    } else {
        log.append(&format!("exit: {code} {shown}"))?;
    }

    if policy == ExitPolicy::Fatal && !result.success() {
        return Err(CommandFailedError {
            command: shown,
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            stderr: result.stderr.clone(),
        }
        .into());
    }
    Ok(result)
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessResult> {
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

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

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

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessResult {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: if timed_out { None } else { status.code() },
        timed_out,
        stdout_truncated,
        stderr_truncated,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
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

/// Convenience for tests and callers with a plain `&str` argv.
pub fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// Spec for `sh -c <script>` in `cwd`.
pub fn shell(script: &str, cwd: &Path) -> CommandSpec {
    CommandSpec::new(argv(&["sh", "-c", script]), cwd)
}
