//! Exit codes for the flight-profiler CLI.
//!
//! Exit codes communicate how the session ended without requiring output
//! parsing. `AgentUnresponsive` deliberately shares its number with the
//! attach helper's "agent installed but unresponsive" code.

/// Exit codes for flight-profiler runs.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Normal termination, including a user-requested quit.
    Clean = 0,

    /// Fatal error: bad arguments, configuration, permissions, base-address
    /// resolution, unsupported platform or a failed injection.
    Fatal = 1,

    /// Input reached end-of-file at the prompt.
    InputClosed = 3,

    /// The operator suspended the session (Ctrl-Z).
    Suspended = 4,

    /// Injection mechanics succeeded but the agent never answered.
    AgentUnresponsive = 16,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean)
    }

    /// Check if the session ended because of operator input rather than a
    /// failure.
    pub fn is_operator_initiated(self) -> bool {
        matches!(
            self,
            ExitCode::Clean | ExitCode::InputClosed | ExitCode::Suspended
        )
    }

    /// Check if this exit code indicates a failure requiring attention.
    pub fn is_error(self) -> bool {
        matches!(self, ExitCode::Fatal | ExitCode::AgentUnresponsive)
    }

    /// Get the exit code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::Fatal => "ERR_FATAL",
            ExitCode::InputClosed => "OK_INPUT_CLOSED",
            ExitCode::Suspended => "OK_SUSPENDED",
            ExitCode::AgentUnresponsive => "ERR_AGENT_UNRESPONSIVE",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&fp_common::Error> for ExitCode {
    fn from(err: &fp_common::Error) -> Self {
        match err {
            fp_common::Error::AgentUnresponsive { .. } => ExitCode::AgentUnresponsive,
            _ => ExitCode::Fatal,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
