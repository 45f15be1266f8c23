//! Flight profiler attach client configuration.
//!
//! This crate provides:
//! - The inclusive agent port range
//! - Resolution of `PYFLIGHT_*` environment variables with provenance
//! - Semantic validation (range ordering, positive timeouts)

pub mod range;
pub mod resolve;
pub mod validate;

pub use range::PortRange;
pub use resolve::{AttachConfig, ConfigError, ConfigSource};
pub use validate::{ValidationError, ValidationResult};

/// Default first port of the agent range.
pub const DEFAULT_START_PORT: u16 = 16000;

/// Default last port of the agent range (inclusive).
pub const DEFAULT_END_PORT: u16 = 16500;

/// Default attach confirmation budget in seconds.
pub const DEFAULT_INJECT_TIMEOUT_SECS: u64 = 5;

/// Default per-probe connect/read timeout in milliseconds.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 500;

/// Default number of consecutive unreachable ports tolerated while scanning.
pub const DEFAULT_SCAN_FAULT_LIMIT: u32 = 3;
