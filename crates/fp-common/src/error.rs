//! Error types for the flight profiler attach client.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints separating attach-phase from dispatch-phase failures
//! - Remediation suggestions for humans
//! - Suggested actions for automation
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Permission Denied
//!   Reason: permission denied attaching to process 4242: ptrace: Operation not permitted
//!   Fix: Run flight-profiler as root, or as the user that owns the target process.
//! ```
//!
//! # Propagation policy
//!
//! Transport and subprocess errors raised while attaching are fatal to the
//! attach attempt. Command resolution and handler errors are recoverable: the
//! interactive loop reports them and prompts again.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for flight profiler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Socket-level discovery and handshake errors.
    Transport,
    /// Injection strategy and verification errors.
    Attach,
    /// Interactive command resolution and execution errors.
    Dispatch,
    /// Configuration errors.
    Config,
    /// File I/O and serialization errors.
    Io,
    /// Platform compatibility errors.
    Platform,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Attach => write!(f, "attach"),
            ErrorCategory::Dispatch => write!(f, "dispatch"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Platform => write!(f, "platform"),
        }
    }
}

/// Suggested actions for automation to take in response to errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation (possibly with backoff).
    Retry,
    /// Continue scanning the next candidate.
    Continue,
    /// Fix configuration values.
    FixConfig,
    /// Request elevated privileges.
    Elevate,
    /// Rerun with debug output for diagnosis.
    RerunWithDebug,
    /// Abort the operation.
    Abort,
    /// No action needed (informational).
    None,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::Continue => write!(f, "continue"),
            SuggestedAction::FixConfig => write!(f, "fix_config"),
            SuggestedAction::Elevate => write!(f, "elevate"),
            SuggestedAction::RerunWithDebug => write!(f, "rerun_with_debug"),
            SuggestedAction::Abort => write!(f, "abort"),
            SuggestedAction::None => write!(f, "none"),
        }
    }
}

/// Unified error type for the attach client.
#[derive(Error, Debug)]
pub enum Error {
    // Transport errors (10-19)
    #[error("no agent reachable on port {port}: {reason}")]
    Unreachable { port: u16, reason: String },

    #[error("port {port} answered but not as a flight profiler agent: {reason}")]
    ProtocolMismatch { port: u16, reason: String },

    // Attach errors (20-29)
    #[error("{what} timed out after {}s", elapsed.as_secs_f64())]
    Timeout { what: String, elapsed: Duration },

    #[error("permission denied attaching to process {pid}: {detail}")]
    PermissionDenied { pid: u32, detail: String },

    #[error("attach mechanism failed ({mechanism}): {cause}")]
    AttachMechanismFailed { mechanism: String, cause: String },

    #[error("agent in process {pid} did not respond after injection")]
    AgentUnresponsive { pid: u32 },

    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },

    // Dispatch errors (30-39)
    #[error("unsupported command {name}")]
    CommandResolutionFailed { name: String },

    #[error("command {command} failed: {message}")]
    HandlerRuntime { command: String, message: String },

    // Configuration errors (40-49)
    #[error("configuration error: {0}")]
    Config(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Platform errors (70-79)
    #[error("flight profiler is not enabled on platform: {0}")]
    UnsupportedPlatform(String),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Transport errors
    /// - 20-29: Attach errors
    /// - 30-39: Dispatch errors
    /// - 40-49: Configuration errors
    /// - 60-69: I/O errors
    /// - 70-79: Platform errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Unreachable { .. } => 10,
            Error::ProtocolMismatch { .. } => 11,
            Error::Timeout { .. } => 20,
            Error::PermissionDenied { .. } => 21,
            Error::AttachMechanismFailed { .. } => 22,
            Error::AgentUnresponsive { .. } => 23,
            Error::ProcessNotFound { .. } => 24,
            Error::CommandResolutionFailed { .. } => 30,
            Error::HandlerRuntime { .. } => 31,
            Error::Config(_) => 40,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::UnsupportedPlatform(_) => 70,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unreachable { .. } | Error::ProtocolMismatch { .. } => ErrorCategory::Transport,

            Error::Timeout { .. }
            | Error::PermissionDenied { .. }
            | Error::AttachMechanismFailed { .. }
            | Error::AgentUnresponsive { .. }
            | Error::ProcessNotFound { .. } => ErrorCategory::Attach,

            Error::CommandResolutionFailed { .. } | Error::HandlerRuntime { .. } => {
                ErrorCategory::Dispatch
            }

            Error::Config(_) => ErrorCategory::Config,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,

            Error::UnsupportedPlatform(_) => ErrorCategory::Platform,
        }
    }

    /// Returns whether the interactive session survives this error.
    ///
    /// Transport errors are "expected" while scanning but are still fatal
    /// once they escape to the attach boundary; only dispatch-layer errors
    /// keep the session alive.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CommandResolutionFailed { .. } | Error::HandlerRuntime { .. }
        )
    }

    /// Returns the suggested action for automation.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::Unreachable { .. } => SuggestedAction::Continue,
            Error::ProtocolMismatch { .. } => SuggestedAction::Continue,

            Error::Timeout { .. } => SuggestedAction::Retry,
            Error::PermissionDenied { .. } => SuggestedAction::Elevate,
            Error::AttachMechanismFailed { .. } => SuggestedAction::RerunWithDebug,
            Error::AgentUnresponsive { .. } => SuggestedAction::RerunWithDebug,
            Error::ProcessNotFound { .. } => SuggestedAction::Abort,

            Error::CommandResolutionFailed { .. } => SuggestedAction::None,
            Error::HandlerRuntime { .. } => SuggestedAction::Retry,

            Error::Config(_) => SuggestedAction::FixConfig,

            Error::Io(_) => SuggestedAction::Retry,
            Error::Json(_) => SuggestedAction::Abort,

            Error::UnsupportedPlatform(_) => SuggestedAction::Abort,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Unreachable { .. } => {
                "Make sure the target process is alive and that the agent port range is not firewalled."
            }
            Error::ProtocolMismatch { .. } => {
                "Another service occupies this port. Choose a different range with PYFLIGHT_INJECT_START_PORT/PYFLIGHT_INJECT_END_PORT."
            }

            Error::Timeout { .. } => {
                "Increase PYFLIGHT_INJECT_TIMEOUT, then retry. A busy target may need longer to start its agent."
            }
            Error::PermissionDenied { .. } => {
                "Run flight-profiler as root, or as the user that owns the target process."
            }
            Error::AttachMechanismFailed { .. } => {
                "Rerun with --debug to see the helper output. Client and target must use the same runtime build."
            }
            Error::AgentUnresponsive { .. } => {
                "The agent was injected but never answered. Check the target's logs and rerun with --debug."
            }
            Error::ProcessNotFound { .. } => {
                "The target process does not exist. Check the pid and try again."
            }

            Error::CommandResolutionFailed { .. } => {
                "Use 'help' to find available commands."
            }
            Error::HandlerRuntime { .. } => {
                "Retry the command. Rerun the client with -vv for full diagnostics."
            }

            Error::Config(_) => {
                "Check the PYFLIGHT_* environment variables for invalid values."
            }

            Error::Io(_) => {
                "Check disk space and permissions on the installation and history directories."
            }
            Error::Json(_) => {
                "The agent sent malformed data. Restart the target process and attach again."
            }

            Error::UnsupportedPlatform(_) => {
                "Attach is supported on Linux and macOS only."
            }
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Unreachable { .. } => "Agent Unreachable",
            Error::ProtocolMismatch { .. } => "Protocol Mismatch",
            Error::Timeout { .. } => "Attach Timeout",
            Error::PermissionDenied { .. } => "Permission Denied",
            Error::AttachMechanismFailed { .. } => "Attach Failed",
            Error::AgentUnresponsive { .. } => "Agent Unresponsive",
            Error::ProcessNotFound { .. } => "Process Not Found",
            Error::CommandResolutionFailed { .. } => "Unsupported Command",
            Error::HandlerRuntime { .. } => "Command Failed",
            Error::Config(_) => "Configuration Error",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
            Error::UnsupportedPlatform(_) => "Unsupported Platform",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the interactive session survives the error.
    pub recoverable: bool,

    /// Suggested action for automation.
    pub suggested_action: SuggestedAction,

    /// Additional structured context (e.g., pid, port).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::Unreachable { port, .. } | Error::ProtocolMismatch { port, .. } => {
                context.insert("port".to_string(), serde_json::json!(port));
            }
            Error::PermissionDenied { pid, .. }
            | Error::AgentUnresponsive { pid }
            | Error::ProcessNotFound { pid } => {
                context.insert("pid".to_string(), serde_json::json!(pid));
            }
            Error::Timeout { elapsed, .. } => {
                context.insert(
                    "elapsed_ms".to_string(),
                    serde_json::json!(elapsed.as_millis() as u64),
                );
            }
            Error::CommandResolutionFailed { name } => {
                context.insert("command".to_string(), serde_json::json!(name));
            }
            Error::HandlerRuntime { command, .. } => {
                context.insert("command".to_string(), serde_json::json!(command));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for human-readable stderr output.
///
/// Output format:
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        red = red,
        cyan = cyan,
        reset = reset,
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}
