//! Interactive command dispatch.
//!
//! One line in, one handler out. Resolution failures and handler errors are
//! printed and the loop goes on; only quit, end of input, suspend or a broken
//! input stream end the session.

pub mod commands;
pub mod input;
pub mod line;
pub mod registry;

pub use commands::{
    AgentCommand, CommandContext, CommandError, CommandHandler, Flow, HelpCommand, HistoryCommand,
    QuitCommand,
};
pub use input::{complete_command, LineSource, PlainSource, ReadOutcome, RustylineSource};
pub use line::{is_quit, parse_line, wants_help, ParsedLine};
pub use registry::{CommandRegistry, RegistryOptions, ResolveError, REMOTE_EXEC_DENYLIST};

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use crate::exit_codes::ExitCode;
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::session::Session;

/// Drives the read-eval loop for one session.
pub struct Dispatcher<L: LineSource> {
    registry: CommandRegistry,
    input: L,
    session: Session,
    log: LogContext,
    history_saved: bool,
}

impl<L: LineSource> Dispatcher<L> {
    pub fn new(registry: CommandRegistry, input: L, session: Session, log: LogContext) -> Self {
        Self {
            registry,
            input,
            session,
            log,
            history_saved: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn input(&self) -> &L {
        &self.input
    }

    /// Load the persisted history, if any.
    pub fn load_history(&mut self) {
        let path = self.session.history_file().to_path_buf();
        if let Err(e) = self.input.load_history(&path) {
            tracing::debug!(path = %path.display(), error = %e, "history not loaded");
        }
    }

    /// Persist history. Later calls in the same session do nothing.
    pub fn save_history(&mut self) {
        if self.history_saved {
            return;
        }
        self.history_saved = true;
        let ctx = &self.log;
        let path = self.session.history_file();
        match self.input.save_history(path) {
            Ok(()) => log_event!(
                ctx,
                DEBUG,
                event_names::HISTORY_SAVED,
                Stage::Teardown,
                "history saved",
                path = %path.display()
            ),
            Err(e) => log_event!(
                ctx,
                WARN,
                event_names::HISTORY_SAVE_FAILED,
                Stage::Teardown,
                "history not saved",
                path = %path.display(),
                error = %e
            ),
        }
    }

    /// Run the loop until the session ends.
    pub fn run(&mut self, out: &mut dyn Write) -> ExitCode {
        loop {
            if self.session.signals().take_suspend() {
                self.save_history();
                return ExitCode::Suspended;
            }

            let prompt = self.session.prompt();
            match self.input.read_line(&prompt) {
                Ok(ReadOutcome::Line(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    self.input.add_history(line);
                    if self.dispatch_line(line, out) == Flow::Quit {
                        return ExitCode::Clean;
                    }
                    if self.session.signals().take_suspend() {
                        self.save_history();
                        return ExitCode::Suspended;
                    }
                }
                Ok(ReadOutcome::Interrupted) => {
                    self.session.signals().take_interrupt();
                    let _ = writeln!(out);
                }
                Ok(ReadOutcome::Eof) => {
                    self.save_history();
                    return ExitCode::InputClosed;
                }
                Ok(ReadOutcome::Suspended) => {
                    self.save_history();
                    return ExitCode::Suspended;
                }
                Err(e) => {
                    tracing::error!(error = %e, "cannot read input");
                    self.save_history();
                    return ExitCode::Fatal;
                }
            }
        }
    }

    /// One-shot mode: record, dispatch and persist a single line.
    pub fn run_once(&mut self, line: &str, out: &mut dyn Write) -> ExitCode {
        let line = line.trim();
        if !line.is_empty() {
            self.input.add_history(line);
            self.dispatch_line(line, out);
        }
        self.save_history();
        ExitCode::Clean
    }

    /// Dispatch one command line.
    pub fn dispatch_line(&mut self, line: &str, out: &mut dyn Write) -> Flow {
        let Some(parsed) = parse_line(line) else {
            return Flow::Continue;
        };
        if is_quit(parsed.name) {
            self.save_history();
        }

        let ctx = &self.log;
        let handler = match self.registry.resolve(parsed.name) {
            Ok(handler) => handler,
            Err(err) => {
                log_event!(
                    ctx,
                    DEBUG,
                    event_names::DISPATCH_UNSUPPORTED,
                    Stage::Dispatch,
                    "unsupported command",
                    command = parsed.name
                );
                let _ = writeln!(out, "{err}");
                return Flow::Continue;
            }
        };
        log_event!(
            ctx,
            DEBUG,
            event_names::DISPATCH_COMMAND,
            Stage::Dispatch,
            "dispatching command",
            command = parsed.name
        );

        if wants_help(line) {
            if let Some(text) = handler.help() {
                let _ = writeln!(out, "{text}");
                return Flow::Continue;
            }
        }

        // A Ctrl-C delivered at a cooked-mode prompt only concerns that prompt.
        self.session.signals().take_interrupt();
        let history = self.input.history();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut command_ctx = CommandContext {
                session: &mut self.session,
                history: &history,
                out: &mut *out,
            };
            handler.act(parsed.remainder, &mut command_ctx)
        }));

        let interrupted = self.session.signals().take_interrupt();
        if interrupted || self.session.signals().is_suspended() {
            match handler.on_interrupt(&self.session) {
                None => {}
                Some(Ok(())) => {
                    let _ = writeln!(out);
                }
                Some(Err(err)) => log_event!(
                    ctx,
                    WARN,
                    event_names::DISPATCH_INTERRUPT_FAILED,
                    Stage::Dispatch,
                    "interrupt hook failed",
                    command = parsed.name,
                    error = %err
                ),
            }
        }

        match result {
            Ok(Ok(flow)) => flow,
            Ok(Err(err)) => {
                let err = err.into_common(parsed.name);
                log_event!(
                    ctx,
                    DEBUG,
                    event_names::DISPATCH_HANDLER_FAILED,
                    Stage::Dispatch,
                    "command failed",
                    command = parsed.name,
                    error = ?err
                );
                let _ = writeln!(out, "{err}");
                Flow::Continue
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                let err = fp_common::Error::HandlerRuntime {
                    command: parsed.name.to_string(),
                    message,
                };
                log_event!(
                    ctx,
                    WARN,
                    event_names::DISPATCH_HANDLER_FAILED,
                    Stage::Dispatch,
                    "command panicked",
                    command = parsed.name
                );
                let _ = writeln!(out, "{err}");
                Flow::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::AgentEndpoint;
    use crate::signals::SignalState;
    use std::collections::VecDeque;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Default)]
    struct Script {
        lines: VecDeque<ReadOutcome>,
        history: Vec<String>,
        saves: Rc<RefCell<u32>>,
    }

    impl LineSource for Script {
        fn read_line(&mut self, _prompt: &str) -> io::Result<ReadOutcome> {
            Ok(self.lines.pop_front().unwrap_or(ReadOutcome::Eof))
        }
        fn add_history(&mut self, line: &str) {
            self.history.push(line.to_string());
        }
        fn load_history(&mut self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
        fn save_history(&mut self, _path: &Path) -> io::Result<()> {
            *self.saves.borrow_mut() += 1;
            Ok(())
        }
        fn history(&self) -> Vec<String> {
            self.history.clone()
        }
        fn supports_editing(&self) -> bool {
            true
        }
    }

    /// Handler that records its invocations.
    struct Recorder {
        name: &'static str,
        calls: Rc<RefCell<Vec<String>>>,
        flow: Flow,
        help: Option<&'static str>,
    }

    impl CommandHandler for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn summary(&self) -> &str {
            "records"
        }
        fn help(&self) -> Option<&str> {
            self.help
        }
        fn act(&mut self, remainder: &str, _ctx: &mut CommandContext<'_>) -> Result<Flow, CommandError> {
            self.calls.borrow_mut().push(remainder.to_string());
            Ok(self.flow)
        }
    }

    fn dispatcher(lines: Vec<ReadOutcome>) -> (Dispatcher<Script>, Rc<RefCell<u32>>) {
        let saves = Rc::new(RefCell::new(0));
        let script = Script {
            lines: lines.into(),
            history: Vec::new(),
            saves: Rc::clone(&saves),
        };
        let session = Session::new(
            AgentEndpoint::local(1, Duration::from_millis(100)),
            4242,
            None,
            PathBuf::from("/tmp/fp-history"),
            SignalState::new(),
        );
        let d = Dispatcher::new(
            CommandRegistry::new(),
            script,
            session,
            LogContext::new("run-test", 4242),
        );
        (d, saves)
    }

    fn line(s: &str) -> ReadOutcome {
        ReadOutcome::Line(s.to_string())
    }

    #[test]
    fn quit_gets_remainder_and_saves_once() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let (mut d, saves) = dispatcher(vec![line("quit now")]);
        d.registry.register(Box::new(Recorder {
            name: "quit",
            calls: Rc::clone(&calls),
            flow: Flow::Quit,
            help: None,
        }));
        let mut out = Vec::new();
        assert_eq!(d.run(&mut out), ExitCode::Clean);
        assert_eq!(*calls.borrow(), vec![" now".to_string()]);
        assert_eq!(*saves.borrow(), 1);
        d.save_history();
        assert_eq!(*saves.borrow(), 1);
    }

    #[test]
    fn unknown_command_is_reported_and_loop_continues() {
        let (mut d, saves) = dispatcher(vec![line("bogus --flag"), line("  ")]);
        let mut out = Vec::new();
        assert_eq!(d.run(&mut out), ExitCode::InputClosed);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Unsupported command bogus, use help to find available commands!\n"
        );
        assert_eq!(*saves.borrow(), 1);
    }

    #[test]
    fn help_text_short_circuits_action() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let (mut d, _) = dispatcher(vec![line("trace -h")]);
        d.registry.register(Box::new(Recorder {
            name: "trace",
            calls: Rc::clone(&calls),
            flow: Flow::Continue,
            help: Some("USAGE: trace"),
        }));
        let mut out = Vec::new();
        d.run(&mut out);
        assert!(calls.borrow().is_empty());
        assert_eq!(String::from_utf8(out).unwrap(), "USAGE: trace\n");
    }

    #[test]
    fn handler_without_help_sees_flag() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let (mut d, _) = dispatcher(vec![line("console -h")]);
        d.registry.register(Box::new(Recorder {
            name: "console",
            calls: Rc::clone(&calls),
            flow: Flow::Continue,
            help: None,
        }));
        let mut out = Vec::new();
        d.run(&mut out);
        assert_eq!(*calls.borrow(), vec![" -h".to_string()]);
    }

    /// Handler that reports the signal flags it sees and can raise a suspend.
    struct SignalWitness {
        seen_interrupt: Rc<RefCell<Vec<bool>>>,
        suspend: bool,
    }

    impl CommandHandler for SignalWitness {
        fn name(&self) -> &str {
            "watch"
        }
        fn summary(&self) -> &str {
            "witness"
        }
        fn help(&self) -> Option<&str> {
            None
        }
        fn act(&mut self, _remainder: &str, ctx: &mut CommandContext<'_>) -> Result<Flow, CommandError> {
            let signals = ctx.session.signals();
            self.seen_interrupt.borrow_mut().push(signals.is_interrupted());
            if self.suspend {
                signals.request_suspend();
            }
            Ok(Flow::Continue)
        }
    }

    #[test]
    fn stale_interrupt_is_cleared_before_dispatch() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (mut d, _) = dispatcher(vec![line("watch")]);
        d.registry.register(Box::new(SignalWitness {
            seen_interrupt: Rc::clone(&seen),
            suspend: false,
        }));
        d.session().signals().request_interrupt();

        let mut out = Vec::new();
        assert_eq!(d.run(&mut out), ExitCode::InputClosed);
        assert_eq!(*seen.borrow(), vec![false]);
        assert!(out.is_empty());
    }

    #[test]
    fn suspend_during_command_ends_session() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (mut d, saves) = dispatcher(vec![line("watch"), line("watch")]);
        d.registry.register(Box::new(SignalWitness {
            seen_interrupt: Rc::clone(&seen),
            suspend: true,
        }));

        assert_eq!(d.run(&mut Vec::new()), ExitCode::Suspended);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(*saves.borrow(), 1);
        assert!(!d.session().signals().is_suspended());
    }

    #[test]
    fn interrupt_at_prompt_prints_newline_and_continues() {
        let (mut d, _) = dispatcher(vec![ReadOutcome::Interrupted]);
        let mut out = Vec::new();
        assert_eq!(d.run(&mut out), ExitCode::InputClosed);
        assert_eq!(out, b"\n");
    }

    #[test]
    fn suspend_saves_history() {
        let (mut d, saves) = dispatcher(vec![ReadOutcome::Suspended]);
        let mut out = Vec::new();
        assert_eq!(d.run(&mut out), ExitCode::Suspended);
        assert_eq!(*saves.borrow(), 1);
    }

    #[test]
    fn history_records_trimmed_lines() {
        let (mut d, _) = dispatcher(vec![line("  stack  "), line("")]);
        let mut out = Vec::new();
        d.run(&mut out);
        assert_eq!(d.input().history(), vec!["stack".to_string()]);
    }
}
