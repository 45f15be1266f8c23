//! Flight Profiler Core Library
//!
//! This library provides the attach client for the flight profiler:
//! - Discovery protocol for probing in-process agents
//! - Port allocation and existing-agent discovery
//! - Injection orchestration across the ptrace, debugger and remote-exec strategies
//! - Attach verification under a wall-clock budget
//! - Preflight diagnostics surfaced before injection
//! - The interactive command dispatcher
//!
//! The binary entry point is in `main.rs`.

pub mod attach;
pub mod discovery;
pub mod dispatch;
pub mod exit_codes;
pub mod layout;
pub mod logging;
pub mod preflight;
pub mod runner;
pub mod runtime;
pub mod session;
pub mod signals;
pub mod skills;

// Re-export test utilities for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Version of the attach client, reported in preflight output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
