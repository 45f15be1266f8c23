//! Subprocess execution for attach helpers.
//!
//! Every external program the attach path needs (the base-address locator,
//! the ptrace helper, the debugger driver, the client runtime) goes through
//! [`ProcessRunner`], so strategies can be exercised with a fake runner.
//!
//! [`SystemRunner`] provides:
//! - Optional per-command timeout with SIGTERM → SIGKILL escalation
//! - Output size caps
//! - Non-blocking pipe draining so lingering grandchildren cannot hang a run

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Default maximum captured output per stream (1MB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Grace period between SIGTERM and SIGKILL in milliseconds.
const SIGTERM_GRACE_MS: u64 = 500;

/// Errors that can occur while running a helper.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("cannot start {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ToolError> for fp_common::Error {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Timeout { command, timeout } => fp_common::Error::Timeout {
                what: command,
                elapsed: timeout,
            },
            ToolError::SpawnFailed { command, source } => fp_common::Error::AttachMechanismFailed {
                mechanism: command,
                cause: source.to_string(),
            },
            ToolError::Io(e) => fp_common::Error::Io(e),
        }
    }
}

/// Where a child's stdout and stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Collected into [`CommandOutput`].
    #[default]
    Capture,
    /// Shared with the client's terminal; nothing is collected.
    Inherit,
}

/// How a child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(i32),
}

impl Termination {
    pub fn success(&self) -> bool {
        matches!(self, Termination::Exited(0))
    }

    /// Exit code, if the child exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            Termination::Exited(code) => Some(*code),
            Termination::Signaled(_) => None,
        }
    }
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Termination::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Termination::Signaled(signal);
            }
        }
        Termination::Exited(-1)
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exit code {}", code),
            Termination::Signaled(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// Specification for a command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,

    /// Arguments to pass.
    pub args: Vec<String>,

    /// Kill the child after this long (None = wait indefinitely).
    pub timeout: Option<Duration>,

    /// Output routing.
    pub output: OutputMode,

    /// Working directory (None = inherit).
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Create a new command specification.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: None,
            output: OutputMode::Capture,
            cwd: None,
        }
    }

    /// Set a timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the output mode.
    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Shell-like rendering for logs and diagnostics.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output from a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// How the child terminated.
    pub termination: Termination,

    /// Standard output (empty when inherited, may be truncated).
    pub stdout: Vec<u8>,

    /// Standard error (empty when inherited, may be truncated).
    pub stderr: Vec<u8>,

    /// Whether captured output hit the size cap.
    pub truncated: bool,

    /// Execution duration.
    pub duration: Duration,
}

impl CommandOutput {
    /// Build an output for a normal exit, used by fakes.
    pub fn exited(code: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            termination: Termination::Exited(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            truncated: false,
            duration: Duration::ZERO,
        }
    }

    /// Get stdout as string (lossy UTF-8 conversion).
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as string (lossy UTF-8 conversion).
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.termination.success()
    }
}

/// Runs external programs on behalf of the attach path.
pub trait ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
        (**self).run(spec)
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    max_output: usize,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            max_output: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl SystemRunner {
    pub fn new(max_output: usize) -> Self {
        Self { max_output }
    }

    /// Execute a child process with optional timeout and output capture.
    #[allow(clippy::type_complexity)]
    fn supervise(
        &self,
        child: &mut Child,
        timeout: Option<Duration>,
    ) -> Result<(Vec<u8>, Vec<u8>, Termination, bool, bool), ToolError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut truncated = false;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut chunk = vec![0u8; 8192];

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("command timed out, sending SIGTERM");
                kill_with_grace(child);
                let status = child.wait()?;
                return Ok((stdout_buf, stderr_buf, status.into(), truncated, true));
            }

            let mut did_read = false;
            if let Some(ref mut out) = stdout {
                did_read |= read_available(out, &mut chunk, &mut stdout_buf, self.max_output, &mut truncated);
            }
            if let Some(ref mut err) = stderr {
                did_read |= read_available(err, &mut chunk, &mut stderr_buf, self.max_output, &mut truncated);
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    // Drain what is immediately available; a grandchild may
                    // still hold the pipe open.
                    if let Some(ref mut out) = stdout {
                        while !truncated
                            && read_available(out, &mut chunk, &mut stdout_buf, self.max_output, &mut truncated)
                        {}
                    }
                    if let Some(ref mut err) = stderr {
                        while !truncated
                            && read_available(err, &mut chunk, &mut stderr_buf, self.max_output, &mut truncated)
                        {}
                    }
                    trace!(status = %Termination::from(status), "process exited");
                    return Ok((stdout_buf, stderr_buf, status.into(), truncated, false));
                }
                Ok(None) => {
                    if !did_read {
                        thread::sleep(Duration::from_millis(10));
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to wait for child");
                    return Err(ToolError::Io(e));
                }
            }
        }
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
        debug!(command = %spec.display(), timeout = ?spec.timeout, "running helper");
        let start = Instant::now();

        let mut command = Command::new(&spec.program);
        command.args(&spec.args).stdin(Stdio::null());
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        match spec.output {
            OutputMode::Capture => command.stdout(Stdio::piped()).stderr(Stdio::piped()),
            OutputMode::Inherit => command.stdout(Stdio::inherit()).stderr(Stdio::inherit()),
        };

        let mut child = command.spawn().map_err(|source| ToolError::SpawnFailed {
            command: spec.program.clone(),
            source,
        })?;

        let (stdout, stderr, termination, truncated, timed_out) =
            self.supervise(&mut child, spec.timeout)?;
        let duration = start.elapsed();

        if timed_out {
            return Err(ToolError::Timeout {
                command: spec.display(),
                timeout: spec.timeout.unwrap_or(duration),
            });
        }

        debug!(
            command = %spec.program,
            duration_ms = duration.as_millis() as u64,
            status = %termination,
            "helper finished"
        );

        Ok(CommandOutput {
            termination,
            stdout,
            stderr,
            truncated,
            duration,
        })
    }
}

/// Read whatever is available without blocking. Returns true if bytes were read.
fn read_available<R: Read + AsRawFdCompat>(
    stream: &mut R,
    chunk: &mut [u8],
    buf: &mut Vec<u8>,
    max: usize,
    truncated: &mut bool,
) -> bool {
    match try_read_nonblocking(stream, chunk) {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            let space = max.saturating_sub(buf.len());
            if space > 0 {
                buf.extend_from_slice(&chunk[..n.min(space)]);
            }
            if n > space {
                *truncated = true;
            }
            true
        }
    }
}

#[cfg(unix)]
use std::os::unix::io::AsRawFd as AsRawFdCompat;

#[cfg(not(unix))]
trait AsRawFdCompat {}
#[cfg(not(unix))]
impl<T> AsRawFdCompat for T {}

/// Kill a process with SIGTERM, then SIGKILL after grace period.
#[cfg(unix)]
fn kill_with_grace(child: &mut Child) {
    let pid = child.id() as i32;

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    debug!(pid, "sent SIGTERM");

    thread::sleep(Duration::from_millis(SIGTERM_GRACE_MS));

    match child.try_wait() {
        Ok(Some(_)) => {
            trace!(pid, "process exited after SIGTERM");
        }
        Ok(None) => {
            warn!(pid, "process did not exit after SIGTERM, sending SIGKILL");
            unsafe {
                libc::kill(pid, libc::SIGKILL);
            }
        }
        Err(e) => {
            error!(pid, error = %e, "failed to check process status");
        }
    }
}

#[cfg(not(unix))]
fn kill_with_grace(child: &mut Child) {
    let _ = child.kill();
}

/// Try to read from a stream without blocking.
///
/// Sets O_NONBLOCK for the duration of the read and restores the original
/// flags. Returns Ok(0) if no data is available (EAGAIN/EWOULDBLOCK).
#[cfg(unix)]
fn try_read_nonblocking<R: Read + AsRawFdCompat>(
    stream: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let fd = stream.as_raw_fd();

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let was_nonblocking = (flags & libc::O_NONBLOCK) != 0;
    if !was_nonblocking {
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    let result = stream.read(buf);

    if !was_nonblocking {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, flags);
        }
    }

    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

/// Blocking fallback for non-Unix platforms.
#[cfg(not(unix))]
fn try_read_nonblocking<R: Read>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    stream.read(buf)
}
