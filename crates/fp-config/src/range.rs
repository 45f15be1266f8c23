//! Inclusive port range used for agent discovery and allocation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

use crate::validate::{ValidationError, ValidationResult};

/// An inclusive `[start, end]` range of TCP ports.
///
/// Construction rejects `start > end`, so every value of this type holds at
/// least one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Build a range, rejecting reversed bounds.
    pub fn new(start: u16, end: u16) -> ValidationResult<Self> {
        if start > end {
            return Err(ValidationError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    /// Whether `port` lies inside the range, both ends included.
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Ports in ascending order.
    pub fn iter(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }

    /// Number of ports in the range.
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: crate::DEFAULT_START_PORT,
            end: crate::DEFAULT_END_PORT,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

impl IntoIterator for PortRange {
    type Item = u16;
    type IntoIter = RangeInclusive<u16>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
