//! Exit-code contract of the native attach helper.
//!
//! Known codes live in [`EXIT_TABLE`]; anything else, including death by
//! signal, is [`HelperCause::Unknown`].

use std::fmt;

use crate::runner::Termination;

/// What a helper exit code means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperCause {
    Success,
    ProcessNotFound,
    PermissionDenied,
    AlreadyTraced,
    ParamsUnreadable,
    SymbolNotFound,
    AgentUnresponsive,
    /// Code outside the table; `None` when the helper was killed by a signal.
    Unknown(Option<i32>),
}

/// One row of the helper's exit-code contract.
#[derive(Debug, Clone, Copy)]
pub struct ExitEntry {
    pub code: i32,
    pub cause: HelperCause,
    pub message: &'static str,
    pub remediation: &'static str,
}

pub const EXIT_TABLE: &[ExitEntry] = &[
    ExitEntry {
        code: 0,
        cause: HelperCause::Success,
        message: "agent injected",
        remediation: "",
    },
    ExitEntry {
        code: 2,
        cause: HelperCause::ProcessNotFound,
        message: "target process not found",
        remediation: "Check the pid; the process may have exited.",
    },
    ExitEntry {
        code: 3,
        cause: HelperCause::PermissionDenied,
        message: "permission denied while attaching",
        remediation: "Run as root or as the user owning the target process.",
    },
    ExitEntry {
        code: 4,
        cause: HelperCause::AlreadyTraced,
        message: "target is already traced by another debugger",
        remediation: "Detach the other tracer (gdb, strace, py-spy) and retry.",
    },
    ExitEntry {
        code: 5,
        cause: HelperCause::ParamsUnreadable,
        message: "injection parameter file unreadable",
        remediation: "Check permissions on the installation directory.",
    },
    ExitEntry {
        code: 6,
        cause: HelperCause::SymbolNotFound,
        message: "runtime entry symbol not found in target",
        remediation: "Run the profiler from the same Python environment as the target.",
    },
    ExitEntry {
        code: 16,
        cause: HelperCause::AgentUnresponsive,
        message: "agent installed but not responding",
        remediation: "Check the target's logs, then retry the attach.",
    },
];

const UNKNOWN_REMEDIATION: &str = "Rerun with --debug to see the helper's output.";

impl HelperCause {
    pub fn from_code(code: i32) -> Self {
        lookup(code)
            .map(|entry| entry.cause)
            .unwrap_or(HelperCause::Unknown(Some(code)))
    }

    pub fn from_termination(termination: Termination) -> Self {
        match termination {
            Termination::Exited(code) => Self::from_code(code),
            Termination::Signaled(_) => HelperCause::Unknown(None),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HelperCause::Success)
    }

    fn entry(&self) -> Option<&'static ExitEntry> {
        EXIT_TABLE.iter().find(|entry| entry.cause == *self)
    }

    pub fn remediation(&self) -> &'static str {
        self.entry()
            .map(|entry| entry.remediation)
            .unwrap_or(UNKNOWN_REMEDIATION)
    }
}

impl fmt::Display for HelperCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.entry()) {
            (_, Some(entry)) => write!(f, "{}", entry.message),
            (HelperCause::Unknown(Some(code)), None) => {
                write!(f, "unknown helper failure (exit code {code})")
            }
            _ => write!(f, "unknown helper failure (killed by signal)"),
        }
    }
}

/// Table row for `code`, if the helper documents it.
pub fn lookup(code: i32) -> Option<&'static ExitEntry> {
    EXIT_TABLE.iter().find(|entry| entry.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_documented_code_maps() {
        let expected = [
            (0, HelperCause::Success),
            (2, HelperCause::ProcessNotFound),
            (3, HelperCause::PermissionDenied),
            (4, HelperCause::AlreadyTraced),
            (5, HelperCause::ParamsUnreadable),
            (6, HelperCause::SymbolNotFound),
            (16, HelperCause::AgentUnresponsive),
        ];
        for (code, cause) in expected {
            assert_eq!(HelperCause::from_code(code), cause, "code {code}");
        }
        assert_eq!(EXIT_TABLE.len(), expected.len());
    }

    #[test]
    fn table_codes_are_unique() {
        for (i, a) in EXIT_TABLE.iter().enumerate() {
            for b in &EXIT_TABLE[i + 1..] {
                assert_ne!(a.code, b.code);
                assert_ne!(a.cause, b.cause);
            }
        }
    }

    #[test]
    fn unknown_code_is_reported_with_its_number() {
        let cause = HelperCause::from_code(1);
        assert_eq!(cause, HelperCause::Unknown(Some(1)));
        assert_eq!(cause.to_string(), "unknown helper failure (exit code 1)");
        assert!(cause.remediation().contains("--debug"));
    }

    #[test]
    fn signal_death_is_unknown() {
        let cause = HelperCause::from_termination(Termination::Signaled(9));
        assert_eq!(cause, HelperCause::Unknown(None));
        assert!(cause.to_string().contains("signal"));
    }

    #[test]
    fn messages_and_remediation() {
        assert_eq!(
            HelperCause::PermissionDenied.to_string(),
            "permission denied while attaching"
        );
        assert!(HelperCause::AlreadyTraced.remediation().contains("tracer"));
        assert!(HelperCause::from_termination(Termination::Exited(0)).is_success());
    }
}
