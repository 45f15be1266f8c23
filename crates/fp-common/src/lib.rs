//! Flight profiler common types and errors.
//!
//! This crate provides the foundational types shared by the attach client:
//! - Target process identity
//! - The unified error taxonomy with stable codes and remediation hints

pub mod error;
pub mod id;

pub use error::{format_error_human, Error, ErrorCategory, Result, StructuredError, SuggestedAction};
pub use id::ProcessId;
