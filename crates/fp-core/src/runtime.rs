//! Host and runtime detection.
//!
//! Answers the questions strategy selection and preflight ask: which
//! platform is this, which runtime executable is the client paired with and
//! what version is it, which executable is the target running, and which
//! UIDs do both processes hold.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use crate::runner::{CommandSpec, ProcessRunner, ToolError};

/// Bound on auxiliary probes (`python -c`, `ps`).
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Script printing `major.minor` of the running interpreter.
const VERSION_SCRIPT: &str = "import sys; print(\"%d.%d\" % sys.version_info[:2])";

/// Errors raised while inspecting the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no client runtime found; set PYFLIGHT_PYTHON or put python3 on PATH")]
    NoClientRuntime,

    #[error("cannot determine version of {program}: {reason}")]
    VersionProbe { program: String, reason: String },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl From<RuntimeError> for fp_common::Error {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NoClientRuntime => fp_common::Error::Config(err.to_string()),
            RuntimeError::VersionProbe { program, reason } => {
                fp_common::Error::AttachMechanismFailed {
                    mechanism: format!("{program} version probe"),
                    cause: reason,
                }
            }
            RuntimeError::Tool(e) => e.into(),
        }
    }
}

/// Operating system family of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPlatform {
    Linux,
    MacOs,
    Other(String),
}

impl HostPlatform {
    /// Platform this binary runs on.
    pub fn current() -> Self {
        #[cfg(target_os = "linux")]
        {
            HostPlatform::Linux
        }
        #[cfg(target_os = "macos")]
        {
            HostPlatform::MacOs
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            HostPlatform::Other(std::env::consts::OS.to_string())
        }
    }

    /// Directory name under `shell/` holding this platform's scripts.
    pub fn script_dir(&self) -> &str {
        match self {
            HostPlatform::Linux => "linux",
            HostPlatform::MacOs => "mac",
            HostPlatform::Other(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, HostPlatform::Other(_))
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPlatform::Linux => write!(f, "Linux"),
            HostPlatform::MacOs => write!(f, "Darwin"),
            HostPlatform::Other(name) => write!(f, "{name}"),
        }
    }
}

/// CPU architecture of the host.
pub fn host_arch() -> &'static str {
    std::env::consts::ARCH
}

/// `major.minor` version of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
}

impl RuntimeVersion {
    /// First version able to execute code in another process on request.
    pub const REMOTE_EXEC: RuntimeVersion = RuntimeVersion {
        major: 3,
        minor: 14,
    };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse `3.12` or `3.12.4`; anything after the minor part is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some(Self { major, minor })
    }

    pub fn supports_remote_exec(&self) -> bool {
        *self >= Self::REMOTE_EXEC
    }

    /// Ask `program` for its version.
    pub fn probe<R: ProcessRunner>(runner: &R, program: &Path) -> Result<Self, RuntimeError> {
        let program_name = program.display().to_string();
        let spec = CommandSpec::new(program_name.clone(), ["-c", VERSION_SCRIPT])
            .with_timeout(PROBE_TIMEOUT);
        let output = runner.run(&spec)?;
        if !output.success() {
            return Err(RuntimeError::VersionProbe {
                program: program_name,
                reason: format!("exited with {}", output.termination),
            });
        }
        let stdout = output.stdout_str();
        let version = Self::parse(&stdout).ok_or_else(|| RuntimeError::VersionProbe {
            program: program_name.clone(),
            reason: format!("unexpected output {:?}", stdout.trim()),
        })?;
        debug!(program = %program_name, %version, "client runtime version");
        Ok(version)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Pick the client runtime: explicit configuration, then the target's own
/// executable, then `python3` on `PATH`.
///
/// The base-address locator and strategy selection both assume the client
/// runtime is the target's, so a `PATH` interpreter is only a last resort.
pub fn resolve_client_runtime(
    configured: Option<&Path>,
    target_executable: Option<&Path>,
) -> Result<PathBuf, RuntimeError> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = target_executable.filter(|p| p.is_file()) {
        trace!(path = %path.display(), "using the target's executable");
        return Ok(path.to_path_buf());
    }
    which::which("python3")
        .map(|path| {
            trace!(path = %path.display(), "python3 found on PATH");
            path
        })
        .map_err(|_| RuntimeError::NoClientRuntime)
}

/// Executable the target process is running, when the OS will tell us.
pub fn target_executable<R: ProcessRunner>(
    runner: &R,
    platform: &HostPlatform,
    pid: u32,
) -> Option<PathBuf> {
    match platform {
        HostPlatform::Linux => std::fs::read_link(format!("/proc/{pid}/exe")).ok(),
        HostPlatform::MacOs => {
            let pid_arg = pid.to_string();
            let spec = CommandSpec::new("ps", ["-o", "comm=", "-p", pid_arg.as_str()])
                .with_timeout(PROBE_TIMEOUT);
            let output = runner.run(&spec).ok()?;
            let comm = output.stdout_str().trim().to_string();
            if !output.success() || comm.is_empty() {
                return None;
            }
            Some(PathBuf::from(comm))
        }
        HostPlatform::Other(_) => None,
    }
}

/// The four UIDs the kernel tracks for a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessUids {
    pub real: u32,
    pub effective: u32,
    pub saved: u32,
    pub filesystem: u32,
}

impl ProcessUids {
    /// Parse the `Uid:` line of a `/proc/<pid>/status` document.
    pub fn parse_status(content: &str) -> Option<Self> {
        let line = content.lines().find(|l| l.starts_with("Uid:"))?;
        let ids: Vec<u32> = line
            .trim_start_matches("Uid:")
            .split_whitespace()
            .filter_map(|v| v.parse().ok())
            .collect();
        match ids.as_slice() {
            [real, effective, saved, filesystem, ..] => Some(Self {
                real: *real,
                effective: *effective,
                saved: *saved,
                filesystem: *filesystem,
            }),
            _ => None,
        }
    }

    /// UIDs of another process; only available where procfs exists.
    pub fn of_pid(pid: u32) -> Option<Self> {
        let content = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
        Self::parse_status(&content)
    }

    /// UIDs of the invoking process.
    pub fn current() -> Option<Self> {
        if let Some(uids) = std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|c| Self::parse_status(&c))
        {
            return Some(uids);
        }
        #[cfg(unix)]
        {
            let real = unsafe { libc::getuid() };
            let effective = unsafe { libc::geteuid() };
            Some(Self {
                real,
                effective,
                saved: effective,
                filesystem: effective,
            })
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    pub fn is_root(&self) -> bool {
        self.effective == 0
    }
}
