//! Ptrace strategy: a native helper reads a parameter file and injects the
//! bootstrap payload.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::runner::{CommandSpec, OutputMode, ProcessRunner};

use super::exit_status::HelperCause;
use super::strategy::{InjectContext, InjectionPlan};
use super::{base_addr, AttachError};

/// Single-line descriptor the helper reads: `<payload>,<port>,<base-address>`.
pub fn render_params(payload: &Path, port: u16, base_address: u64) -> String {
    format!("{},{},{}\n", payload.display(), port, base_address)
}

pub fn execute<R: ProcessRunner>(
    ctx: &InjectContext<'_, R>,
    plan: &InjectionPlan,
) -> Result<u16, AttachError> {
    let base_address = match plan.base_address {
        Some(addr) => addr,
        None => base_addr::resolve(ctx, plan.pid)?,
    };

    let params_path = ctx.layout.inject_params();
    let params = render_params(&ctx.layout.payload_template(), plan.port, base_address);
    fs::write(&params_path, params).map_err(|source| AttachError::WriteFile {
        path: params_path.clone(),
        source,
    })?;
    debug!(path = %params_path.display(), port = plan.port, "injection parameters written");

    let mut args = vec![plan.pid.to_string()];
    if plan.debug {
        args.push("--debug".to_string());
    }
    let helper = ctx.layout.ptrace_helper();
    let spec = CommandSpec::new(helper.display().to_string(), args).with_output(OutputMode::Inherit);
    let output = ctx.runner.run(&spec)?;

    let cause = HelperCause::from_termination(output.termination);
    if !cause.is_success() {
        return Err(AttachError::Helper {
            strategy: plan.strategy,
            cause,
        });
    }
    Ok(plan.port)
}
