//! Target process identity.
//!
//! A pid is platform-assigned and recycled by the OS. It identifies the target
//! for the lifetime of one session only and must never be persisted as a
//! stable key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Process ID wrapper with display formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// The pid of the invoking process.
    pub fn current() -> Self {
        ProcessId(std::process::id())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

impl FromStr for ProcessId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(ProcessId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_surrounding_whitespace() {
        assert_eq!(" 4242\n".parse::<ProcessId>().unwrap(), ProcessId(4242));
    }

    #[test]
    fn rejects_negative_pid() {
        assert!("-1".parse::<ProcessId>().is_err());
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&ProcessId(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn current_matches_std() {
        assert_eq!(ProcessId::current().0, std::process::id());
    }
}
