//! Command handlers.
//!
//! Local commands (`help`, `history`, `quit`) run in the client. Everything
//! else is an [`AgentCommand`] that forwards the remainder to the agent and
//! streams its reply.

use std::io::{self, Write};

use thiserror::Error;
use tracing::debug;

use crate::discovery::{AgentRequest, StreamOutcome, TransportError};
use crate::session::Session;

/// What the dispatcher does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Failed(String),
}

impl CommandError {
    pub fn into_common(self, command: &str) -> fp_common::Error {
        fp_common::Error::HandlerRuntime {
            command: command.to_string(),
            message: self.to_string(),
        }
    }
}

/// What a handler gets to work with.
pub struct CommandContext<'a> {
    pub session: &'a mut Session,
    /// History entries, oldest first.
    pub history: &'a [String],
    pub out: &'a mut dyn Write,
}

/// A command the dispatcher can route to.
pub trait CommandHandler {
    fn name(&self) -> &str;

    /// One-line description for `help`.
    fn summary(&self) -> &str;

    /// Full help text. `None` lets `-h`/`--help` reach [`act`](Self::act).
    fn help(&self) -> Option<&str>;

    fn act(&mut self, remainder: &str, ctx: &mut CommandContext<'_>) -> Result<Flow, CommandError>;

    /// Called when the operator interrupts this command. `None` means the
    /// command has no interrupt hook.
    fn on_interrupt(&mut self, _session: &Session) -> Option<Result<(), CommandError>> {
        None
    }
}

/// A command implemented by the agent.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    name: &'static str,
    summary: &'static str,
    help: Option<&'static str>,
    streaming: bool,
}

impl AgentCommand {
    pub fn new(name: &'static str, summary: &'static str, help: Option<&'static str>) -> Self {
        Self {
            name,
            summary,
            help,
            streaming: false,
        }
    }

    /// Long-running command the agent can be asked to cancel.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }
}

impl CommandHandler for AgentCommand {
    fn name(&self) -> &str {
        self.name
    }

    fn summary(&self) -> &str {
        self.summary
    }

    fn help(&self) -> Option<&str> {
        self.help
    }

    fn act(&mut self, remainder: &str, ctx: &mut CommandContext<'_>) -> Result<Flow, CommandError> {
        let request = AgentRequest::plugin(self.name, remainder);
        let signals = ctx.session.signals().clone();
        let endpoint = *ctx.session.endpoint();
        let outcome = endpoint.stream(&request, &mut *ctx.out, || {
            signals.is_interrupted() || signals.is_suspended()
        })?;
        match outcome {
            StreamOutcome::Completed { bytes } => {
                debug!(command = self.name, bytes, "agent command finished");
                ctx.session.mark_ok();
            }
            StreamOutcome::Interrupted { bytes } => {
                debug!(command = self.name, bytes, "agent command interrupted");
            }
        }
        Ok(Flow::Continue)
    }

    fn on_interrupt(&mut self, session: &Session) -> Option<Result<(), CommandError>> {
        if !self.streaming {
            return None;
        }
        let result = session
            .endpoint()
            .send(&AgentRequest::cancel(self.name))
            .map_err(CommandError::from);
        Some(result)
    }
}

/// `quit`, `exit` and `stop`.
#[derive(Debug, Clone)]
pub struct QuitCommand {
    name: &'static str,
}

impl QuitCommand {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl CommandHandler for QuitCommand {
    fn name(&self) -> &str {
        self.name
    }

    fn summary(&self) -> &str {
        "Detach from the target and exit the profiler."
    }

    fn help(&self) -> Option<&str> {
        Some("USAGE: quit | exit | stop\n  Ask the agent to shut down and leave the session.")
    }

    fn act(&mut self, _remainder: &str, ctx: &mut CommandContext<'_>) -> Result<Flow, CommandError> {
        // Best effort: a dead agent must not keep the operator in the session.
        if let Err(err) = ctx.session.endpoint().send(&AgentRequest::quit()) {
            debug!(error = %err, "agent did not take the quit request");
        }
        Ok(Flow::Quit)
    }
}

/// `history`: print the entries recorded so far.
#[derive(Debug, Clone, Default)]
pub struct HistoryCommand;

impl CommandHandler for HistoryCommand {
    fn name(&self) -> &str {
        "history"
    }

    fn summary(&self) -> &str {
        "Show previously entered commands."
    }

    fn help(&self) -> Option<&str> {
        Some("USAGE: history [N]\n  Show the last N commands (all when omitted).")
    }

    fn act(&mut self, remainder: &str, ctx: &mut CommandContext<'_>) -> Result<Flow, CommandError> {
        let remainder = remainder.trim();
        let limit = if remainder.is_empty() {
            ctx.history.len()
        } else {
            remainder
                .parse::<usize>()
                .map_err(|_| CommandError::Failed(format!("history: {remainder:?} is not a count")))?
        };
        let skip = ctx.history.len().saturating_sub(limit);
        for (index, entry) in ctx.history.iter().enumerate().skip(skip) {
            writeln!(ctx.out, "{:>5}  {}", index + 1, entry)?;
        }
        Ok(Flow::Continue)
    }
}

/// One row of the `help` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpEntry {
    pub name: String,
    pub summary: String,
    pub help: Option<String>,
}

/// `help`: list commands, or show one command's help text.
#[derive(Debug, Clone, Default)]
pub struct HelpCommand {
    entries: Vec<HelpEntry>,
}

impl HelpCommand {
    pub fn new(entries: Vec<HelpEntry>) -> Self {
        Self { entries }
    }
}

impl CommandHandler for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn summary(&self) -> &str {
        "Show available commands."
    }

    fn help(&self) -> Option<&str> {
        Some("USAGE: help [command]\n  List commands, or show the help of one command.")
    }

    fn act(&mut self, remainder: &str, ctx: &mut CommandContext<'_>) -> Result<Flow, CommandError> {
        let wanted = remainder.trim();
        if !wanted.is_empty() {
            return match self.entries.iter().find(|e| e.name == wanted) {
                Some(entry) => {
                    writeln!(ctx.out, "{}", entry.help.as_deref().unwrap_or(&entry.summary))?;
                    Ok(Flow::Continue)
                }
                None => Err(CommandError::Failed(format!("no such command: {wanted}"))),
            };
        }

        let width = self.entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
        writeln!(ctx.out, "Available commands:")?;
        for entry in &self.entries {
            writeln!(ctx.out, "  {:<width$}  {}", entry.name, entry.summary, width = width)?;
        }
        writeln!(ctx.out, "\nUse <command> -h for details.")?;
        Ok(Flow::Continue)
    }
}
