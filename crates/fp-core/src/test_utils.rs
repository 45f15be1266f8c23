//! Test doubles for fp-core.
//!
//! Enabled for unit tests and, through the `test-utils` feature, for the
//! integration tests under `tests/`.
//!
//! - [`FakeAgent`]: loopback TCP server speaking the agent wire format
//! - [`FakeRunner`]: [`ProcessRunner`] with scripted outputs
//! - [`ScriptedInput`]: [`LineSource`] replaying queued outcomes
//! - [`InMemoryProber`]: [`Prober`] backed by a port map

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::discovery::{AgentRequest, HandshakeResponse, ProbeError, Prober, AGENT_APP_TYPE};
use crate::dispatch::{LineSource, ReadOutcome};
use crate::runner::{CommandOutput, CommandSpec, ProcessRunner, ToolError};

// ============================================================================
// FakeAgent
// ============================================================================

/// A loopback agent. Answers the handshake with its configured pid and
/// plugin calls with the reply registered for the target.
pub struct FakeAgent {
    port: u16,
    requests: Arc<Mutex<Vec<AgentRequest>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Builder for [`FakeAgent`].
#[derive(Debug, Clone)]
pub struct FakeAgentBuilder {
    pid: u32,
    app_type: String,
    replies: HashMap<String, Vec<u8>>,
    held: HashSet<String>,
}

/// Longest a held reply stays open.
const HOLD_LIMIT: Duration = Duration::from_secs(5);

impl FakeAgentBuilder {
    /// Report a different `app_type` in the handshake.
    pub fn app_type(mut self, app_type: &str) -> Self {
        self.app_type = app_type.to_string();
        self
    }

    /// Reply sent for plugin calls to `target`.
    pub fn reply(mut self, target: &str, body: impl Into<Vec<u8>>) -> Self {
        self.replies.insert(target.to_string(), body.into());
        self
    }

    /// Keep the connection open after replying to `target`, the way a
    /// streaming command does, until a cancel arrives or [`HOLD_LIMIT`].
    pub fn hold(mut self, target: &str) -> Self {
        self.held.insert(target.to_string());
        self
    }

    /// Bind an ephemeral loopback port and start serving.
    pub fn spawn(self) -> io::Result<FakeAgent> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        self.serve(listener)
    }

    /// Start serving on `port`.
    pub fn spawn_on(self, port: u16) -> io::Result<FakeAgent> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        self.serve(listener)
    }

    fn serve(self, listener: TcpListener) -> io::Result<FakeAgent> {
        let port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let requests = Arc::clone(&requests);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((conn, _)) => self.answer(conn, &requests, &stop),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Ok(FakeAgent {
            port,
            requests,
            stop,
            handle: Some(handle),
        })
    }

    fn answer(
        &self,
        mut conn: TcpStream,
        requests: &Arc<Mutex<Vec<AgentRequest>>>,
        stop: &Arc<AtomicBool>,
    ) {
        let _ = conn.set_nonblocking(false);
        let _ = conn.set_read_timeout(Some(Duration::from_secs(2)));
        let mut raw = Vec::new();
        if conn.read_to_end(&mut raw).is_err() {
            return;
        }
        let Ok(request) = serde_json::from_slice::<AgentRequest>(&raw) else {
            return;
        };

        let body = if request.is_plugin_calling {
            if request.cancel {
                Vec::new()
            } else {
                self.replies.get(&request.target).cloned().unwrap_or_default()
            }
        } else {
            let handshake = HandshakeResponse {
                app_type: self.app_type.clone(),
                pid: self.pid,
            };
            serde_json::to_vec(&handshake).unwrap_or_default()
        };

        let hold = request.is_plugin_calling
            && !request.cancel
            && self.held.contains(&request.target);
        let target = request.target.clone();
        let seen_before = match requests.lock() {
            Ok(mut seen) => {
                seen.push(request);
                seen.len()
            }
            Err(_) => return,
        };
        let _ = conn.write_all(&body);
        if !hold {
            let _ = conn.shutdown(Shutdown::Both);
            return;
        }

        let requests = Arc::clone(requests);
        let stop = Arc::clone(stop);
        let started = Instant::now();
        thread::spawn(move || {
            let cancelled = || {
                requests.lock().is_ok_and(|seen| {
                    seen[seen_before..]
                        .iter()
                        .any(|r| r.cancel && r.target == target)
                })
            };
            while !stop.load(Ordering::SeqCst) && started.elapsed() < HOLD_LIMIT && !cancelled() {
                thread::sleep(Duration::from_millis(10));
            }
            let _ = conn.shutdown(Shutdown::Both);
        });
    }
}

impl FakeAgent {
    pub fn builder(pid: u32) -> FakeAgentBuilder {
        FakeAgentBuilder {
            pid,
            app_type: AGENT_APP_TYPE.to_string(),
            replies: HashMap::new(),
            held: HashSet::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Requests received so far, handshakes included.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Plugin requests only.
    pub fn plugin_requests(&self) -> Vec<AgentRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.is_plugin_calling)
            .collect()
    }
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A loopback port nothing is listening on.
pub fn closed_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .unwrap_or(1)
}

// ============================================================================
// FakeRunner
// ============================================================================

/// Scripted [`ProcessRunner`]. Outputs are matched on the program's file
/// name; unmatched programs exit 0 with no output.
#[derive(Default)]
pub struct FakeRunner {
    outputs: RefCell<HashMap<String, VecDeque<CommandOutput>>>,
    calls: RefCell<Vec<CommandSpec>>,
    on_run: RefCell<Option<Box<dyn Fn(&CommandSpec)>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output for the next run of `program`.
    pub fn push(&self, program: &str, output: CommandOutput) {
        self.outputs
            .borrow_mut()
            .entry(program.to_string())
            .or_default()
            .push_back(output);
    }

    /// Call `hook` before every run.
    pub fn on_run(&self, hook: impl Fn(&CommandSpec) + 'static) {
        *self.on_run.borrow_mut() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
        self.calls.borrow_mut().push(spec.clone());
        if let Some(hook) = self.on_run.borrow().as_ref() {
            hook(spec);
        }
        let key = Path::new(&spec.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| spec.program.clone());
        let scripted = self
            .outputs
            .borrow_mut()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or_else(|| CommandOutput::exited(0, "", "")))
    }
}

// ============================================================================
// ScriptedInput
// ============================================================================

/// [`LineSource`] replaying queued outcomes, then end of input.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    queue: VecDeque<ReadOutcome>,
    history: Vec<String>,
    prompts: Vec<String>,
    saves: Cell<usize>,
    editing: bool,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: lines.into_iter().map(|l| ReadOutcome::Line(l.into())).collect(),
            editing: true,
            ..Self::default()
        }
    }

    /// Queue a non-line outcome.
    pub fn then(mut self, outcome: ReadOutcome) -> Self {
        self.queue.push_back(outcome);
        self
    }

    pub fn without_editing(mut self) -> Self {
        self.editing = false;
        self
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    pub fn save_count(&self) -> usize {
        self.saves.get()
    }
}

impl LineSource for ScriptedInput {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome> {
        self.prompts.push(prompt.to_string());
        Ok(self.queue.pop_front().unwrap_or(ReadOutcome::Eof))
    }

    fn add_history(&mut self, line: &str) {
        self.history.push(line.to_string());
    }

    fn load_history(&mut self, path: &Path) -> io::Result<()> {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            self.history.extend(text.lines().map(str::to_string));
        }
        Ok(())
    }

    fn save_history(&mut self, path: &Path) -> io::Result<()> {
        self.saves.set(self.saves.get() + 1);
        let mut file = std::fs::File::create(path)?;
        for entry in &self.history {
            writeln!(file, "{entry}")?;
        }
        Ok(())
    }

    fn history(&self) -> Vec<String> {
        self.history.clone()
    }

    fn supports_editing(&self) -> bool {
        self.editing
    }
}

// ============================================================================
// InMemoryProber
// ============================================================================

/// [`Prober`] answering from a port map. Unlisted ports are unreachable.
#[derive(Debug, Default)]
pub struct InMemoryProber {
    agents: RefCell<HashMap<u16, HandshakeResponse>>,
    probes: RefCell<Vec<u16>>,
}

impl InMemoryProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Our agent serving `pid` on `port`.
    pub fn with_agent(self, port: u16, pid: u32) -> Self {
        self.insert(port, pid);
        self
    }

    pub fn insert(&self, port: u16, pid: u32) {
        self.agents.borrow_mut().insert(
            port,
            HandshakeResponse {
                app_type: AGENT_APP_TYPE.to_string(),
                pid,
            },
        );
    }

    /// Ports probed so far, in order.
    pub fn probes(&self) -> Vec<u16> {
        self.probes.borrow().clone()
    }
}

impl Prober for InMemoryProber {
    fn probe(&self, port: u16) -> Result<HandshakeResponse, ProbeError> {
        self.probes.borrow_mut().push(port);
        match self.agents.borrow().get(&port) {
            Some(response) if response.is_ours() => Ok(response.clone()),
            Some(response) => Err(ProbeError::ForeignAgent {
                port,
                app_type: response.app_type.clone(),
            }),
            None => Err(ProbeError::Unreachable {
                port,
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::AgentEndpoint;

    #[test]
    fn fake_agent_answers_handshake_and_plugins() {
        let agent = FakeAgent::builder(4242).reply("stack", "Thread main\n").spawn().unwrap();
        let endpoint = AgentEndpoint::local(agent.port(), Duration::from_secs(2));

        assert_eq!(endpoint.probe().unwrap().pid, 4242);

        let mut out = Vec::new();
        endpoint
            .stream(&AgentRequest::plugin("stack", ""), &mut out, || false)
            .unwrap();
        assert_eq!(out, b"Thread main\n");
        assert_eq!(agent.plugin_requests().len(), 1);
    }

    #[test]
    fn fake_runner_replays_by_file_name() {
        let runner = FakeRunner::new();
        runner.push("inject", CommandOutput::exited(3, "", ""));
        let out = runner.run(&CommandSpec::new("/opt/fp/lib/inject", ["1"])).unwrap();
        assert!(!out.success());
        assert!(runner.run(&CommandSpec::new("/opt/fp/lib/inject", ["1"])).unwrap().success());
        assert_eq!(runner.call_count(), 2);
    }

    #[test]
    fn in_memory_prober_reports_foreign_agents() {
        let prober = InMemoryProber::new().with_agent(16000, 7);
        prober.agents.borrow_mut().insert(
            16001,
            HandshakeResponse {
                app_type: "other".into(),
                pid: 7,
            },
        );
        assert!(prober.probe(16000).is_ok());
        assert!(matches!(prober.probe(16001), Err(ProbeError::ForeignAgent { .. })));
        assert!(matches!(prober.probe(16002), Err(ProbeError::Unreachable { .. })));
        assert_eq!(prober.probes(), vec![16000, 16001, 16002]);
    }
}
