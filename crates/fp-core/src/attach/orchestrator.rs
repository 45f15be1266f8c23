//! One attach attempt, from discovery to confirmation.
//!
//! ```text
//! discover ──found──────────────────────────────▶ confirm ─▶ Attached
//!    │                                                │
//!    └─missing─▶ free port ─▶ select ─▶ execute ──────┘
//!                                         │
//!                                         └─failed─▶ AttachError
//! ```
//!
//! Strategies are never retried or swapped after a failure.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use fp_config::{AttachConfig, PortRange};

use crate::discovery::Prober;
use crate::layout::InstallLayout;
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::runner::ProcessRunner;
use crate::runtime::{HostPlatform, RuntimeVersion};

use super::ports::{find_attached_port, find_free_port, ScanMiss, ScanOptions};
use super::strategy::{select_strategy, InjectContext, InjectionPlan, Strategy};
use super::verifier::{confirm, VerifyError, VerifyOptions};
use super::AttachError;

/// Host facts and knobs for one attempt.
#[derive(Debug, Clone)]
pub struct AttachSettings {
    pub platform: HostPlatform,
    pub client_runtime: PathBuf,
    pub runtime_version: RuntimeVersion,
    pub port_range: PortRange,
    pub scan: ScanOptions,
    pub verify: VerifyOptions,
    pub inject_timeout: Duration,
    pub debug: bool,
}

impl AttachSettings {
    pub fn from_config(
        config: &AttachConfig,
        platform: HostPlatform,
        client_runtime: PathBuf,
        runtime_version: RuntimeVersion,
        debug: bool,
    ) -> Self {
        Self {
            platform,
            client_runtime,
            runtime_version,
            port_range: config.port_range,
            scan: ScanOptions {
                fault_limit: config.scan_fault_limit,
            },
            verify: VerifyOptions::default(),
            inject_timeout: config.inject_timeout,
            debug,
        }
    }
}

/// How the agent came to be there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachKind {
    /// An agent for the target was already listening.
    Reused,
    /// Installed during this attempt.
    Injected(Strategy),
}

/// A confirmed agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attached {
    pub port: u16,
    /// Pid reported by the agent's handshake.
    pub agent_pid: u32,
    pub kind: AttachKind,
}

/// Drives one attach attempt against a target.
pub struct Attacher<'a, P: Prober, R: ProcessRunner> {
    prober: &'a P,
    runner: &'a R,
    layout: &'a InstallLayout,
    settings: AttachSettings,
    log: LogContext,
}

impl<'a, P: Prober, R: ProcessRunner> Attacher<'a, P, R> {
    pub fn new(
        prober: &'a P,
        runner: &'a R,
        layout: &'a InstallLayout,
        settings: AttachSettings,
        log: LogContext,
    ) -> Self {
        Self {
            prober,
            runner,
            layout,
            settings,
            log,
        }
    }

    pub fn settings(&self) -> &AttachSettings {
        &self.settings
    }

    /// Port of an agent already serving `pid`, if discovery finds one.
    pub fn discover(&self, pid: u32) -> Option<u16> {
        let ctx = &self.log;
        log_event!(
            ctx,
            DEBUG,
            event_names::DISCOVER_STARTED,
            Stage::Discover,
            "scanning for an existing agent",
            range = %self.settings.port_range
        );
        match find_attached_port(self.prober, pid, self.settings.port_range, self.settings.scan) {
            Ok(port) => {
                log_event!(
                    ctx,
                    INFO,
                    event_names::DISCOVER_FOUND,
                    Stage::Discover,
                    "existing agent found",
                    port = port
                );
                Some(port)
            }
            Err(ScanMiss::Aborted { at_port }) => {
                log_event!(
                    ctx,
                    DEBUG,
                    event_names::DISCOVER_ABORTED,
                    Stage::Discover,
                    "scan stopped after consecutive unreachable ports",
                    at_port = at_port
                );
                None
            }
            Err(ScanMiss::Exhausted) => None,
        }
    }

    /// Install an agent into `pid`, returning the port it was told to use.
    pub fn inject(&self, pid: u32) -> Result<(Strategy, u16), AttachError> {
        let ctx = &self.log;
        let range = self.settings.port_range;
        let port = find_free_port(range).ok_or(AttachError::NoFreePort { range })?;
        let strategy = select_strategy(&self.settings.platform, self.settings.runtime_version)?;
        log_event!(
            ctx,
            INFO,
            event_names::INJECT_STRATEGY_SELECTED,
            Stage::Inject,
            "injection strategy selected",
            strategy = strategy.name(),
            port = port,
            runtime = %self.settings.runtime_version
        );

        let inject_ctx = InjectContext {
            runner: self.runner,
            layout: self.layout,
            client_runtime: self.settings.client_runtime.clone(),
        };
        let plan = InjectionPlan {
            strategy,
            pid,
            port,
            base_address: None,
            debug: self.settings.debug,
        };

        match strategy.execute(&inject_ctx, &plan) {
            Ok(bound) => {
                log_event!(
                    ctx,
                    INFO,
                    event_names::INJECT_HELPER_EXITED,
                    Stage::Inject,
                    "injection finished",
                    strategy = strategy.name(),
                    port = bound
                );
                Ok((strategy, bound))
            }
            Err(err) => {
                log_event!(
                    ctx,
                    WARN,
                    event_names::INJECT_FAILED,
                    Stage::Inject,
                    "injection failed",
                    strategy = strategy.name(),
                    error = %err
                );
                Err(err)
            }
        }
    }

    /// Poll `port` until an agent answers.
    pub fn verify(&self, pid: u32, port: u16) -> Result<u32, AttachError> {
        let ctx = &self.log;
        let start = Instant::now();
        match confirm(self.prober, port, self.settings.inject_timeout, self.settings.verify) {
            Ok(agent_pid) => {
                if agent_pid != pid {
                    log_event!(
                        ctx,
                        WARN,
                        event_names::VERIFY_PID_MISMATCH,
                        Stage::Verify,
                        "agent reports a different pid",
                        port = port,
                        agent_pid = agent_pid
                    );
                }
                log_event!(
                    ctx,
                    INFO,
                    event_names::VERIFY_CONFIRMED,
                    Stage::Verify,
                    "agent confirmed",
                    port = port,
                    elapsed_ms = start.elapsed().as_millis() as u64
                );
                Ok(agent_pid)
            }
            Err(VerifyError::TimedOut { elapsed, .. }) => {
                log_event!(
                    ctx,
                    WARN,
                    event_names::VERIFY_TIMED_OUT,
                    Stage::Verify,
                    "agent did not answer in time",
                    port = port,
                    elapsed_ms = elapsed.as_millis() as u64
                );
                Err(AttachError::Unresponsive { pid, port, elapsed })
            }
        }
    }

    /// Reuse an existing agent or inject a new one, then confirm it.
    pub fn attach(&self, pid: u32) -> Result<Attached, AttachError> {
        let (kind, port) = match self.discover(pid) {
            Some(port) => (AttachKind::Reused, port),
            None => {
                let (strategy, port) = self.inject(pid)?;
                (AttachKind::Injected(strategy), port)
            }
        };
        let agent_pid = self.verify(pid, port)?;
        Ok(Attached {
            port,
            agent_pid,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{HandshakeResponse, ProbeError};
    use crate::runner::{CommandOutput, CommandSpec, ToolError};
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    /// Agents keyed by port; a port whose agent appears once the helper ran
    /// is listed in `after_inject`.
    #[derive(Default)]
    struct Agents {
        live: RefCell<HashMap<u16, u32>>,
        after_inject: RefCell<HashMap<u16, u32>>,
    }

    impl Prober for Agents {
        fn probe(&self, port: u16) -> Result<HandshakeResponse, ProbeError> {
            match self.live.borrow().get(&port) {
                Some(pid) => Ok(HandshakeResponse {
                    app_type: crate::discovery::AGENT_APP_TYPE.into(),
                    pid: *pid,
                }),
                None => Err(ProbeError::Unreachable {
                    port,
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                }),
            }
        }
    }

    /// Runner standing in for the ptrace helper: exits with `code` and
    /// brings every pending agent to life.
    struct Helper<'a> {
        agents: &'a Agents,
        code: i32,
        calls: Cell<usize>,
    }

    impl ProcessRunner for Helper<'_> {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
            self.calls.set(self.calls.get() + 1);
            if spec.program == "bash" {
                return Ok(CommandOutput::exited(0, "7f0000000000\n", ""));
            }
            let pending: Vec<_> = self.agents.after_inject.borrow_mut().drain().collect();
            self.agents.live.borrow_mut().extend(pending);
            Ok(CommandOutput::exited(self.code, "", ""))
        }
    }

    fn settings(range: PortRange) -> AttachSettings {
        AttachSettings {
            platform: HostPlatform::Linux,
            client_runtime: PathBuf::from("python3"),
            runtime_version: RuntimeVersion::new(3, 11),
            port_range: range,
            scan: ScanOptions::default(),
            verify: VerifyOptions {
                poll_interval: Duration::from_millis(5),
                mismatch_backoff: Duration::from_millis(5),
            },
            inject_timeout: Duration::from_millis(200),
            debug: false,
        }
    }

    fn free_range() -> PortRange {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        PortRange::new(port, port).unwrap()
    }

    fn install_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        dir
    }

    #[test]
    fn existing_agent_is_reused_without_running_anything() {
        let agents = Agents::default();
        agents.live.borrow_mut().insert(16001, 4242);
        let runner = Helper {
            agents: &agents,
            code: 0,
            calls: Cell::new(0),
        };
        let layout = InstallLayout::new("/nonexistent", HostPlatform::Linux);
        let attacher = Attacher::new(
            &agents,
            &runner,
            &layout,
            settings(PortRange::new(16000, 16002).unwrap()),
            LogContext::new("run-test", 4242),
        );

        let first = attacher.attach(4242).unwrap();
        let second = attacher.attach(4242).unwrap();
        assert_eq!(first.kind, AttachKind::Reused);
        assert_eq!(first.port, 16001);
        assert_eq!(second.port, first.port);
        assert_eq!(runner.calls.get(), 0);
    }

    #[test]
    fn injects_then_confirms() {
        let dir = install_dir();
        let range = free_range();
        let agents = Agents::default();
        agents.after_inject.borrow_mut().insert(range.start(), 4242);
        let runner = Helper {
            agents: &agents,
            code: 0,
            calls: Cell::new(0),
        };
        let layout = InstallLayout::new(dir.path(), HostPlatform::Linux);
        let attacher = Attacher::new(
            &agents,
            &runner,
            &layout,
            settings(range),
            LogContext::new("run-test", 4242),
        );

        let attached = attacher.attach(4242).unwrap();
        assert_eq!(attached.kind, AttachKind::Injected(Strategy::Ptrace));
        assert_eq!(attached.port, range.start());
        assert_eq!(attached.agent_pid, 4242);
        // locator + helper
        assert_eq!(runner.calls.get(), 2);

        // A second attach finds the agent and runs nothing further.
        let again = attacher.attach(4242).unwrap();
        assert_eq!(again.kind, AttachKind::Reused);
        assert_eq!(again.port, attached.port);
        assert_eq!(runner.calls.get(), 2);
    }

    #[test]
    fn silent_agent_is_unresponsive() {
        let dir = install_dir();
        let agents = Agents::default();
        let runner = Helper {
            agents: &agents,
            code: 0,
            calls: Cell::new(0),
        };
        let layout = InstallLayout::new(dir.path(), HostPlatform::Linux);
        let attacher = Attacher::new(
            &agents,
            &runner,
            &layout,
            settings(free_range()),
            LogContext::new("run-test", 4242),
        );
        let err = attacher.attach(4242).unwrap_err();
        assert!(matches!(err, AttachError::Unresponsive { pid: 4242, .. }));
        assert_eq!(
            crate::exit_codes::ExitCode::from(&err.into_common(4242)),
            crate::exit_codes::ExitCode::AgentUnresponsive
        );
    }

    #[test]
    fn helper_failure_is_not_retried() {
        let dir = install_dir();
        let agents = Agents::default();
        let runner = Helper {
            agents: &agents,
            code: 3,
            calls: Cell::new(0),
        };
        let layout = InstallLayout::new(dir.path(), HostPlatform::Linux);
        let attacher = Attacher::new(
            &agents,
            &runner,
            &layout,
            settings(free_range()),
            LogContext::new("run-test", 4242),
        );
        let err = attacher.attach(4242).unwrap_err();
        assert!(matches!(
            err,
            AttachError::Helper {
                strategy: Strategy::Ptrace,
                cause: crate::attach::HelperCause::PermissionDenied
            }
        ));
        assert_eq!(runner.calls.get(), 2);
    }

    #[test]
    fn unsupported_platform_fails_before_running_anything() {
        let agents = Agents::default();
        let runner = Helper {
            agents: &agents,
            code: 0,
            calls: Cell::new(0),
        };
        let layout = InstallLayout::new("/nonexistent", HostPlatform::Other("windows".into()));
        let mut s = settings(free_range());
        s.platform = HostPlatform::Other("windows".into());
        let attacher = Attacher::new(&agents, &runner, &layout, s, LogContext::new("run-test", 1));
        assert!(matches!(
            attacher.attach(1),
            Err(AttachError::UnsupportedPlatform(_))
        ));
        assert_eq!(runner.calls.get(), 0);
    }
}
