//! Post-injection confirmation on one specific port.
//!
//! The agent may need a moment after the helper exits before it listens, so
//! the port is polled until our agent answers or the budget runs out.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

use crate::discovery::Prober;

/// Pacing of [`confirm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Wait after a refused or timed-out connection.
    pub poll_interval: Duration,
    /// Wait after the port answered with something other than our agent.
    pub mismatch_backoff: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            mismatch_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("no agent answered on port {port} within {}s", elapsed.as_secs_f64())]
    TimedOut { port: u16, elapsed: Duration },
}

/// Poll `port` until our agent answers, returning the pid it reports.
///
/// Only a handshake carrying the agent sentinel confirms; the prober already
/// turns any other `app_type` into an error. The budget is checked before
/// each probe and sleeps never run past it.
pub fn confirm<P: Prober>(
    prober: &P,
    port: u16,
    timeout: Duration,
    options: VerifyOptions,
) -> Result<u32, VerifyError> {
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            debug!(port, attempts, "confirmation timed out");
            return Err(VerifyError::TimedOut { port, elapsed });
        }
        attempts += 1;

        let wait = match prober.probe(port) {
            Ok(resp) => {
                debug!(port, pid = resp.pid, attempts, "agent confirmed");
                return Ok(resp.pid);
            }
            Err(err) if err.is_reachable() => {
                trace!(port, error = %err, "port answered, not our agent yet");
                options.mismatch_backoff
            }
            Err(err) => {
                trace!(port, error = %err, "agent not listening yet");
                options.poll_interval
            }
        };

        let remaining = timeout.saturating_sub(start.elapsed());
        thread::sleep(wait.min(remaining));
    }
}
