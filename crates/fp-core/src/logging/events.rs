//! Structured event definitions for logging.
//!
//! Events follow a consistent schema for machine-parseable JSONL output.
//! All events carry the run id, the stage and, once known, the target pid.

use serde::{Deserialize, Serialize};

/// Log levels for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of one attach session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Read-only checks before injection.
    Preflight,
    /// Port scan for an existing agent.
    Discover,
    /// Strategy selection and execution.
    Inject,
    /// Polling the chosen port for the agent.
    Verify,
    /// Interactive command loop.
    Dispatch,
    /// History persistence and exit.
    Teardown,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Preflight => "preflight",
            Stage::Discover => "discover",
            Stage::Inject => "inject",
            Stage::Verify => "verify",
            Stage::Dispatch => "dispatch",
            Stage::Teardown => "teardown",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Discover stage
    pub const DISCOVER_STARTED: &str = "discover.started";
    pub const DISCOVER_FOUND: &str = "discover.found";
    pub const DISCOVER_ABORTED: &str = "discover.aborted";

    // Inject stage
    pub const INJECT_STRATEGY_SELECTED: &str = "inject.strategy_selected";
    pub const INJECT_HELPER_EXITED: &str = "inject.helper_exited";
    pub const INJECT_FAILED: &str = "inject.failed";

    // Verify stage
    pub const VERIFY_CONFIRMED: &str = "verify.confirmed";
    pub const VERIFY_PID_MISMATCH: &str = "verify.pid_mismatch";
    pub const VERIFY_TIMED_OUT: &str = "verify.timed_out";

    // Dispatch stage
    pub const DISPATCH_COMMAND: &str = "dispatch.command";
    pub const DISPATCH_UNSUPPORTED: &str = "dispatch.unsupported";
    pub const DISPATCH_HANDLER_FAILED: &str = "dispatch.handler_failed";
    pub const DISPATCH_INTERRUPT_FAILED: &str = "dispatch.interrupt_failed";

    // Teardown
    pub const HISTORY_SAVED: &str = "teardown.history_saved";
    pub const HISTORY_SAVE_FAILED: &str = "teardown.history_save_failed";

    // Config/init events
    pub const CONFIG_LOADED: &str = "config.loaded";
}

/// Context for generating log events with a consistent run id and target.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Unique ID for this invocation.
    pub run_id: String,
    /// Target process id.
    pub pid: u32,
}

impl LogContext {
    /// Create a new log context.
    pub fn new(run_id: impl Into<String>, pid: u32) -> Self {
        LogContext {
            run_id: run_id.into(),
            pid,
        }
    }
}
