//! Line input for the interactive loop.
//!
//! [`RustylineSource`] gives line editing, history and first-word
//! completion. [`PlainSource`] reads stdin when no line editor can be set
//! up; it keeps no history.

use std::io::{self, BufRead, Write};
use std::path::Path;

use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Context, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use tracing::debug;

use crate::signals::SignalState;

/// Result of one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    /// End of input.
    Eof,
    /// Ctrl-Z at the prompt.
    Suspended,
}

/// Where the dispatcher reads command lines from.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome>;

    fn add_history(&mut self, line: &str);

    fn load_history(&mut self, path: &Path) -> io::Result<()>;

    fn save_history(&mut self, path: &Path) -> io::Result<()>;

    /// Entries, oldest first.
    fn history(&self) -> Vec<String>;

    /// Whether history and completion are available.
    fn supports_editing(&self) -> bool;
}

/// Registered names that complete the word before the cursor. Only the
/// first word of a line is completed.
pub fn complete_command<'a, S: AsRef<str>>(names: &'a [S], before_cursor: &str) -> Vec<&'a str> {
    let word = before_cursor.trim_start();
    if word.contains(char::is_whitespace) {
        return Vec::new();
    }
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| name.starts_with(word))
        .collect()
}

/// Completion helper for the editor.
pub struct FlightHelper {
    names: Vec<String>,
}

impl FlightHelper {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

impl Completer for FlightHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let before = &line[..pos];
        let start = before.len() - before.trim_start().len();
        let candidates = complete_command(&self.names, before)
            .into_iter()
            .map(|name| Pair {
                display: name.to_string(),
                replacement: format!("{name} "),
            })
            .collect();
        Ok((start, candidates))
    }
}

impl Hinter for FlightHelper {
    type Hint = String;
}

impl Highlighter for FlightHelper {}

impl Validator for FlightHelper {}

impl Helper for FlightHelper {}

/// Ctrl-Z at the prompt: raise the suspend flag and abandon the line.
struct SuspendKey {
    signals: SignalState,
}

impl ConditionalEventHandler for SuspendKey {
    fn handle(&self, _evt: &Event, _n: RepeatCount, _positive: bool, _ctx: &EventContext) -> Option<Cmd> {
        self.signals.request_suspend();
        Some(Cmd::Interrupt)
    }
}

/// Line editor backed by rustyline.
pub struct RustylineSource {
    editor: Editor<FlightHelper, DefaultHistory>,
    signals: SignalState,
}

impl RustylineSource {
    pub fn new(names: Vec<String>, signals: SignalState) -> Result<Self, ReadlineError> {
        let mut editor = Editor::<FlightHelper, DefaultHistory>::new()?;
        editor.set_helper(Some(FlightHelper::new(names)));
        editor.bind_sequence(
            KeyEvent::ctrl('Z'),
            EventHandler::Conditional(Box::new(SuspendKey {
                signals: signals.clone(),
            })),
        );
        Ok(Self { editor, signals })
    }
}

impl LineSource for RustylineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(ReadOutcome::Line(line)),
            Err(ReadlineError::Interrupted) => {
                if self.signals.take_suspend() {
                    Ok(ReadOutcome::Suspended)
                } else {
                    Ok(ReadOutcome::Interrupted)
                }
            }
            Err(ReadlineError::Eof) => Ok(ReadOutcome::Eof),
            Err(ReadlineError::Io(e)) => Err(e),
            Err(other) => Err(io::Error::other(other.to_string())),
        }
    }

    fn add_history(&mut self, line: &str) {
        if let Err(e) = self.editor.add_history_entry(line) {
            debug!(error = %e, "history entry dropped");
        }
    }

    fn load_history(&mut self, path: &Path) -> io::Result<()> {
        if !path.exists() {
            return Ok(());
        }
        self.editor
            .load_history(path)
            .map_err(|e| io::Error::other(e.to_string()))
    }

    fn save_history(&mut self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.editor
            .save_history(path)
            .map_err(|e| io::Error::other(e.to_string()))
    }

    fn history(&self) -> Vec<String> {
        self.editor.history().iter().cloned().collect()
    }

    fn supports_editing(&self) -> bool {
        true
    }
}

/// Unedited stdin, used when no line editor is available.
pub struct PlainSource<R: BufRead> {
    reader: R,
}

impl<R: BufRead> PlainSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for PlainSource<R> {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome> {
        let mut stdout = io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;

        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(_) => Ok(ReadOutcome::Line(line.trim_end_matches(['\n', '\r']).to_string())),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(ReadOutcome::Interrupted),
            Err(e) => Err(e),
        }
    }

    fn add_history(&mut self, _line: &str) {}

    fn load_history(&mut self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn save_history(&mut self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn history(&self) -> Vec<String> {
        Vec::new()
    }

    fn supports_editing(&self) -> bool {
        false
    }
}
