//! Debugger-attach strategy: a driver script attaches lldb to the target,
//! loads the agent, and writes the port the agent actually bound to a result
//! file.

use std::fs;
use std::path::Path;

use fp_common::ProcessId;
use tracing::{debug, warn};

use crate::runner::{CommandSpec, OutputMode, ProcessRunner};

use super::strategy::{InjectContext, InjectionPlan};
use super::AttachError;

pub fn execute<R: ProcessRunner>(
    ctx: &InjectContext<'_, R>,
    plan: &InjectionPlan,
) -> Result<u16, AttachError> {
    let result_file = tempfile::NamedTempFile::new()?;
    let result_path = result_file.path().to_path_buf();

    let mut args = vec![
        ProcessId::current().to_string(),
        plan.pid.to_string(),
        result_path.display().to_string(),
        plan.port.to_string(),
    ];
    if plan.debug {
        args.push("--debug".to_string());
    }
    // The driver is chatty; its output only reaches the terminal in debug mode.
    let output_mode = if plan.debug {
        OutputMode::Inherit
    } else {
        OutputMode::Capture
    };
    let driver = ctx.layout.debugger_driver();
    let spec = CommandSpec::new(driver.display().to_string(), args).with_output(output_mode);
    let output = ctx.runner.run(&spec)?;
    if !output.success() {
        warn!(status = %output.termination, "debugger driver exited abnormally");
    }

    let port = read_result(&result_path)?;
    debug!(requested = plan.port, bound = port, "debugger driver reported port");
    Ok(port)
}

/// Port written by the driver. The driver's own exit status is not trusted;
/// only a numeric result counts as success.
pub fn read_result(path: &Path) -> Result<u16, AttachError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(AttachError::AttachFailed {
            detail: "debugger driver produced no result".to_string(),
        });
    }
    trimmed.parse().map_err(|_| AttachError::AttachFailed {
        detail: format!("debugger driver wrote {trimmed:?} instead of a port"),
    })
}
