//! Locating the target runtime's base address.
//!
//! The locator script compares the target's mapped runtime with the client's
//! runtime executable and prints the load address in hex. It prints nothing
//! when the two are different builds, in which case no offset can be trusted.

use std::time::Duration;

use tracing::debug;

use crate::runner::{CommandSpec, ProcessRunner};

use super::strategy::InjectContext;
use super::AttachError;

/// Bound on the locator script.
const LOCATOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the locator for `pid` and parse its answer.
pub fn resolve<R: ProcessRunner>(ctx: &InjectContext<'_, R>, pid: u32) -> Result<u64, AttachError> {
    let locator = ctx.layout.base_addr_locator();
    let spec = CommandSpec::new(
        "bash",
        [
            locator.display().to_string(),
            pid.to_string(),
            ctx.client_runtime.display().to_string(),
        ],
    )
    .with_timeout(LOCATOR_TIMEOUT);

    let output = ctx.runner.run(&spec)?;
    let address = parse_address(&output.stdout_str())?;
    debug!(pid, address = %format!("{address:#x}"), "runtime base address");
    Ok(address)
}

/// Parse trimmed locator output as hex, with or without `0x`.
pub fn parse_address(raw: &str) -> Result<u64, AttachError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AttachError::BaseAddressMissing);
    }
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16).map_err(|_| AttachError::BaseAddressUnparsable {
        output: trimmed.to_string(),
    })
}
