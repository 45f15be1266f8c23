//! Client-side state of one attach.
//!
//! Created once the agent is confirmed and passed by reference to every
//! command handler. No connection is held: each command opens its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::attach::Attached;
use crate::discovery::AgentEndpoint;
use crate::signals::SignalState;

#[derive(Debug, Clone)]
pub struct Session {
    endpoint: AgentEndpoint,
    target_pid: u32,
    target_executable: Option<PathBuf>,
    history_file: PathBuf,
    signals: SignalState,
    confirmed_at: DateTime<Utc>,
    last_ok: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        endpoint: AgentEndpoint,
        target_pid: u32,
        target_executable: Option<PathBuf>,
        history_file: PathBuf,
        signals: SignalState,
    ) -> Self {
        Self {
            endpoint,
            target_pid,
            target_executable,
            history_file,
            signals,
            confirmed_at: Utc::now(),
            last_ok: None,
        }
    }

    /// Session for a confirmed agent. The pid is the one the agent reported.
    pub fn attached(
        attached: &Attached,
        timeout: Duration,
        target_executable: Option<PathBuf>,
        history_file: PathBuf,
        signals: SignalState,
    ) -> Self {
        Self::new(
            AgentEndpoint::local(attached.port, timeout),
            attached.agent_pid,
            target_executable,
            history_file,
            signals,
        )
    }

    pub fn endpoint(&self) -> &AgentEndpoint {
        &self.endpoint
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    pub fn target_pid(&self) -> u32 {
        self.target_pid
    }

    pub fn target_executable(&self) -> Option<&Path> {
        self.target_executable.as_deref()
    }

    pub fn history_file(&self) -> &Path {
        &self.history_file
    }

    pub fn signals(&self) -> &SignalState {
        &self.signals
    }

    pub fn confirmed_at(&self) -> DateTime<Utc> {
        self.confirmed_at
    }

    /// Time of the last command the agent completed.
    pub fn last_ok(&self) -> Option<DateTime<Utc>> {
        self.last_ok
    }

    pub fn mark_ok(&mut self) {
        self.last_ok = Some(Utc::now());
    }

    pub fn prompt(&self) -> String {
        format!("[cmd@{}]$ ", self.target_pid)
    }
}
