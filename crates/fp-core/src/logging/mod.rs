//! Structured logging foundation for the attach client.
//!
//! Provides dual-mode logging:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for scripted runs
//!
//! # Usage
//!
//! ```ignore
//! use fp_core::logging::{init_logging, LogConfig, LogContext, Stage, event_names};
//!
//! let config = LogConfig::from_env(None, None);
//! init_logging(&config);
//!
//! let ctx = LogContext::new(generate_run_id(), 4242);
//! fp_core::log_event!(ctx, INFO, event_names::RUN_STARTED, Stage::Init, "attaching");
//! ```
//!
//! # Design Notes
//!
//! - stdout is reserved for agent output and the prompt
//! - stderr receives all log output (human or JSONL)

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs. Event targets
/// are event names rather than module paths, so the filter is a bare level.
/// A second call is a no-op.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::new(config.level.to_string());

    let result = match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(JsonlLayer::stderr())
            .try_init(),
    };

    if let Err(err) = result {
        tracing::debug!(error = %err, "logging already initialized");
    }
}

/// Generate a unique run ID for this invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    // Shorten to first 12 hex chars for readability
    format!("run-{}", &uuid.simple().to_string()[..12])
}

/// Convenience macro for structured event logging with context.
///
/// Usage:
/// ```ignore
/// log_event!(ctx, INFO, event_names::DISCOVER_FOUND, Stage::Discover, "agent found",
///     port = 16002, range = %range);
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $($fields:tt)+)?) => {
        tracing::info!(
            target: $event,
            run_id = %$ctx.run_id,
            pid = $ctx.pid,
            stage = %$stage,
            message = $msg,
            $($($fields)+)?
        )
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $($fields:tt)+)?) => {
        tracing::debug!(
            target: $event,
            run_id = %$ctx.run_id,
            pid = $ctx.pid,
            stage = %$stage,
            message = $msg,
            $($($fields)+)?
        )
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $($fields:tt)+)?) => {
        tracing::warn!(
            target: $event,
            run_id = %$ctx.run_id,
            pid = $ctx.pid,
            stage = %$stage,
            message = $msg,
            $($($fields)+)?
        )
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $($fields:tt)+)?) => {
        tracing::error!(
            target: $event,
            run_id = %$ctx.run_id,
            pid = $ctx.pid,
            stage = %$stage,
            message = $msg,
            $($($fields)+)?
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();

        assert!(id1.starts_with("run-"));
        assert_ne!(id1, id2);
        // Format: run-<12 hex chars>
        assert_eq!(id1.len(), 16);
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(Level::from(tracing::Level::INFO), Level::Info);
        assert_eq!(Level::from(tracing::Level::WARN), Level::Warn);
    }

    #[test]
    fn log_event_macro_expands_with_context() {
        let ctx = LogContext::new("run-test", 1);
        crate::log_event!(
            ctx,
            DEBUG,
            event_names::CONFIG_LOADED,
            Stage::Init,
            "loaded",
            port = 16000u16
        );
    }
}
