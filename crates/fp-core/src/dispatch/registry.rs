//! Static command registry.
//!
//! Resolution looks only at the command name. A name can be unknown or
//! known but disallowed for this session; both read the same to the
//! operator.

use std::collections::BTreeSet;

use thiserror::Error;

use super::commands::{
    AgentCommand, CommandHandler, HelpCommand, HelpEntry, HistoryCommand, QuitCommand,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Unsupported command {name}, use help to find available commands!")]
    NotRegistered { name: String },

    #[error("Unsupported command {name}, use help to find available commands!")]
    Disallowed { name: String },
}

impl ResolveError {
    pub fn name(&self) -> &str {
        match self {
            ResolveError::NotRegistered { name } | ResolveError::Disallowed { name } => name,
        }
    }
}

impl From<ResolveError> for fp_common::Error {
    fn from(err: ResolveError) -> Self {
        fp_common::Error::CommandResolutionFailed {
            name: err.name().to_string(),
        }
    }
}

/// Commands unavailable when the client runtime has remote exec.
pub const REMOTE_EXEC_DENYLIST: &[&str] = &["gilstat"];

/// What the session can support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    pub remote_exec_capable: bool,
    pub line_editing: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            remote_exec_capable: false,
            line_editing: true,
        }
    }
}

/// Name to handler mapping plus the session's denylist.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: Vec<Box<dyn CommandHandler>>,
    denied: BTreeSet<String>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full command set, with `help` describing whatever is allowed.
    pub fn standard(options: RegistryOptions) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(HistoryCommand));
        for name in super::line::QUIT_NAMES {
            registry.register(Box::new(QuitCommand::new(*name)));
        }
        for command in agent_commands() {
            registry.register(Box::new(command));
        }

        if options.remote_exec_capable {
            for name in REMOTE_EXEC_DENYLIST {
                registry.deny(name);
            }
        }
        if !options.line_editing {
            registry.deny("history");
        }

        let mut entries = vec![HelpEntry {
            name: "help".to_string(),
            summary: "Show available commands.".to_string(),
            help: None,
        }];
        entries.extend(
            registry
                .handlers
                .iter()
                .filter(|h| !registry.denied.contains(h.name()))
                .map(|h| HelpEntry {
                    name: h.name().to_string(),
                    summary: h.summary().to_string(),
                    help: h.help().map(str::to_string),
                }),
        );
        registry.handlers.insert(0, Box::new(HelpCommand::new(entries)));
        registry
    }

    /// Add a handler. A later registration under the same name wins.
    pub fn register(&mut self, handler: Box<dyn CommandHandler>) {
        self.handlers.retain(|h| h.name() != handler.name());
        self.handlers.push(handler);
    }

    pub fn deny(&mut self, name: &str) {
        self.denied.insert(name.to_string());
    }

    /// Registered names in registration order, denied ones included.
    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn resolve(&mut self, name: &str) -> Result<&mut dyn CommandHandler, ResolveError> {
        if self.denied.contains(name) {
            return Err(ResolveError::Disallowed {
                name: name.to_string(),
            });
        }
        match self.handlers.iter_mut().find(|h| h.name() == name) {
            Some(handler) => Ok(handler.as_mut()),
            None => Err(ResolveError::NotRegistered {
                name: name.to_string(),
            }),
        }
    }
}

/// Commands served by the agent.
pub fn agent_commands() -> Vec<AgentCommand> {
    vec![
        AgentCommand::new(
            "stack",
            "Print the stack of every thread in the target.",
            Some("USAGE: stack [-f FILE] [--native]\n  Dump all thread stacks, optionally to FILE or including native frames."),
        )
        .streaming(),
        AgentCommand::new(
            "trace",
            "Trace a function's call tree with per-call cost.",
            Some("USAGE: trace MODULE [CLASS] METHOD [-i INTERVAL_MS] [-n LIMIT] [-e EXPR]\n  Print the call tree of each invocation slower than INTERVAL_MS."),
        )
        .streaming(),
        AgentCommand::new(
            "watch",
            "Watch a function's arguments, return value and exceptions.",
            Some("USAGE: watch MODULE [CLASS] METHOD [--expr EXPR] [-n LIMIT] [-f FILTER]\n  Print EXPR for each invocation matching FILTER."),
        )
        .streaming(),
        AgentCommand::new(
            "tt",
            "Record invocations of a function for later replay.",
            Some("USAGE: tt -t MODULE [CLASS] METHOD | tt -l | tt -i INDEX [-p]\n  Record, list, inspect or replay time tunnel fragments."),
        )
        .streaming(),
        AgentCommand::new(
            "perf",
            "Sample the target and render a flame graph.",
            Some("USAGE: perf [-d SECONDS] [-f FILE] [-r RATE]\n  Profile the target for SECONDS and write an SVG flame graph to FILE."),
        )
        .streaming(),
        AgentCommand::new(
            "getglobal",
            "Read a module global or class attribute.",
            Some("USAGE: getglobal MODULE [CLASS] FIELD [-e EXPR] [-x DEPTH]\n  Print FIELD, or EXPR evaluated against it."),
        ),
        AgentCommand::new(
            "vmtool",
            "Inspect live instances of a class.",
            Some("USAGE: vmtool -a getInstances -c MODULE CLASS [-e EXPR] [-n LIMIT]\n  List live instances of CLASS."),
        ),
        AgentCommand::new(
            "mem",
            "Summarize memory usage and object growth.",
            Some("USAGE: mem summary [--limit N] | mem diff [--interval SECONDS]\n  Show the largest object types or their growth."),
        ),
        AgentCommand::new(
            "gilstat",
            "Measure GIL acquisition and hold times.",
            Some("USAGE: gilstat on [--take-threshold MS] [--hold-threshold MS] | gilstat off\n  Report threads waiting on or holding the GIL past the thresholds."),
        ),
        AgentCommand::new(
            "module",
            "Find the module a source file was loaded as.",
            Some("USAGE: module FILE_PATH\n  Print the module name the target imported FILE_PATH under."),
        ),
        AgentCommand::new(
            "reload",
            "Hot-reload a function from its source file.",
            Some("USAGE: reload MODULE [CLASS] METHOD [-v]\n  Recompile METHOD from disk inside the target."),
        ),
        // The console parses -h itself.
        AgentCommand::new("console", "Open an interactive console inside the target.", None),
    ]
}
