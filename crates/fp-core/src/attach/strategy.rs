//! Injection strategy selection and the plan handed to a strategy.

use std::fmt;
use std::path::PathBuf;

use crate::layout::InstallLayout;
use crate::runner::ProcessRunner;
use crate::runtime::{HostPlatform, RuntimeVersion};

use super::{debugger, ptrace, remote_exec, AttachError};

/// The three ways an agent gets into a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Native helper using ptrace (Linux).
    Ptrace,
    /// Debugger driver script (macOS).
    DebuggerAttach,
    /// The runtime's own remote-exec facility.
    RemoteExec,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Ptrace => "ptrace",
            Strategy::DebuggerAttach => "debugger-attach",
            Strategy::RemoteExec => "remote-exec",
        }
    }

    /// Whether the strategy needs the target's base address.
    pub fn needs_base_address(&self) -> bool {
        matches!(self, Strategy::Ptrace | Strategy::RemoteExec)
    }

    /// Run the strategy, returning the port the agent was asked to bind.
    pub fn execute<R: ProcessRunner>(
        &self,
        ctx: &InjectContext<'_, R>,
        plan: &InjectionPlan,
    ) -> Result<u16, AttachError> {
        match self {
            Strategy::Ptrace => ptrace::execute(ctx, plan),
            Strategy::DebuggerAttach => debugger::execute(ctx, plan),
            Strategy::RemoteExec => remote_exec::execute(ctx, plan),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick the strategy for this host and client runtime.
///
/// Remote exec wins whenever the runtime offers it, but only on platforms it
/// has been verified on. Otherwise the platform decides.
pub fn select_strategy(
    platform: &HostPlatform,
    version: RuntimeVersion,
) -> Result<Strategy, AttachError> {
    match platform {
        HostPlatform::Other(name) => Err(AttachError::UnsupportedPlatform(name.clone())),
        _ if version.supports_remote_exec() => Ok(Strategy::RemoteExec),
        HostPlatform::Linux => Ok(Strategy::Ptrace),
        HostPlatform::MacOs => Ok(Strategy::DebuggerAttach),
    }
}

/// Everything one attach attempt needs; fixed once chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionPlan {
    pub strategy: Strategy,
    pub pid: u32,
    /// Port the agent is asked to listen on.
    pub port: u16,
    /// Runtime base address, for the strategies that need it.
    pub base_address: Option<u64>,
    pub debug: bool,
}

/// Collaborators shared by every strategy.
pub struct InjectContext<'a, R: ProcessRunner> {
    pub runner: &'a R,
    pub layout: &'a InstallLayout,
    /// Runtime executable the client is paired with.
    pub client_runtime: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn older_runtimes_follow_platform() {
        let v = RuntimeVersion::new(3, 11);
        assert_eq!(select_strategy(&HostPlatform::Linux, v).unwrap(), Strategy::Ptrace);
        assert_eq!(
            select_strategy(&HostPlatform::MacOs, v).unwrap(),
            Strategy::DebuggerAttach
        );
    }

    #[test]
    fn remote_exec_capable_runtime_wins_on_both_platforms() {
        let v = RuntimeVersion::new(3, 14);
        assert_eq!(select_strategy(&HostPlatform::Linux, v).unwrap(), Strategy::RemoteExec);
        assert_eq!(select_strategy(&HostPlatform::MacOs, v).unwrap(), Strategy::RemoteExec);
    }

    #[test]
    fn other_platforms_are_rejected_for_any_version() {
        for v in [RuntimeVersion::new(3, 9), RuntimeVersion::new(3, 14)] {
            let err = select_strategy(&HostPlatform::Other("windows".into()), v).unwrap_err();
            assert!(matches!(err, AttachError::UnsupportedPlatform(ref p) if p == "windows"));
        }
    }

    #[test]
    fn base_address_requirements() {
        assert!(Strategy::Ptrace.needs_base_address());
        assert!(Strategy::RemoteExec.needs_base_address());
        assert!(!Strategy::DebuggerAttach.needs_base_address());
    }
}
