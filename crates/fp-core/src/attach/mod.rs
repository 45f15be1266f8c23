//! Attach orchestration.
//!
//! Gets a confirmed agent into a target process:
//! - [`ports`]: scan for an agent already serving the target, or a free port
//! - [`strategy`]: pick ptrace, debugger-attach or remote-exec for this host
//! - [`ptrace`], [`debugger`], [`remote_exec`]: the strategies themselves
//! - [`verifier`]: poll the chosen port until the agent answers
//! - [`orchestrator`]: the state machine tying them together

pub mod base_addr;
pub mod debugger;
pub mod exit_status;
pub mod orchestrator;
pub mod ports;
pub mod ptrace;
pub mod remote_exec;
pub mod strategy;
pub mod verifier;

pub use exit_status::{HelperCause, EXIT_TABLE};
pub use orchestrator::{AttachKind, AttachSettings, Attached, Attacher};
pub use ports::{find_attached_port, find_free_port, ScanMiss, ScanOptions};
pub use strategy::{select_strategy, InjectContext, InjectionPlan, Strategy};
pub use verifier::{confirm, VerifyError, VerifyOptions};

use std::path::PathBuf;
use std::time::Duration;

use fp_config::PortRange;
use thiserror::Error;

use crate::runner::ToolError;

/// Reasons an attach attempt fails. Every variant is fatal to the attempt.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("no available debug port between range: {range}")]
    NoFreePort { range: PortRange },

    #[error("flight profiler is not enabled on platform: {0}")]
    UnsupportedPlatform(String),

    #[error("can't locate python bin base addr, please make sure target python process and flight_profiler is in the same python environment")]
    BaseAddressMissing,

    #[error("base address locator printed {output:?}")]
    BaseAddressUnparsable { output: String },

    #[error("{strategy} helper failed: {cause}")]
    Helper {
        strategy: Strategy,
        cause: HelperCause,
    },

    #[error("PyFlightProfiler attach failed: {detail}")]
    AttachFailed { detail: String },

    #[error("higher permission required to attach to {pid}: {detail}")]
    PermissionDenied { pid: u32, detail: String },

    #[error("attach via remote exec failed: {detail}")]
    RemoteExecFailed { detail: String },

    #[error("agent for process {pid} never answered on port {port} within {}s", elapsed.as_secs_f64())]
    Unresponsive {
        pid: u32,
        port: u16,
        elapsed: Duration,
    },

    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<AttachError> for fp_common::Error {
    fn from(err: AttachError) -> Self {
        use fp_common::Error as E;
        match err {
            AttachError::UnsupportedPlatform(name) => E::UnsupportedPlatform(name),
            AttachError::PermissionDenied { pid, detail } => E::PermissionDenied { pid, detail },
            AttachError::Unresponsive { pid, .. } => E::AgentUnresponsive { pid },
            AttachError::Helper { strategy, cause } => match cause {
                HelperCause::AgentUnresponsive => E::AgentUnresponsive { pid: 0 },
                HelperCause::ProcessNotFound => E::ProcessNotFound { pid: 0 },
                HelperCause::PermissionDenied => E::PermissionDenied {
                    pid: 0,
                    detail: cause.to_string(),
                },
                _ => E::AttachMechanismFailed {
                    mechanism: strategy.name().to_string(),
                    cause: format!("{cause}. {}", cause.remediation()),
                },
            },
            AttachError::Tool(e) => e.into(),
            AttachError::Io(e) => E::Io(e),
            other => E::AttachMechanismFailed {
                mechanism: "attach".to_string(),
                cause: other.to_string(),
            },
        }
    }
}

impl AttachError {
    /// Convert with the target pid filled into pid-bearing variants.
    pub fn into_common(self, pid: u32) -> fp_common::Error {
        match fp_common::Error::from(self) {
            fp_common::Error::AgentUnresponsive { .. } => fp_common::Error::AgentUnresponsive { pid },
            fp_common::Error::ProcessNotFound { .. } => fp_common::Error::ProcessNotFound { pid },
            fp_common::Error::PermissionDenied { detail, .. } => {
                fp_common::Error::PermissionDenied { pid, detail }
            }
            other => other,
        }
    }
}
