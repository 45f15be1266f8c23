//! Remote-exec strategy: render the bootstrap payload and ask the client
//! runtime to run it inside the target.

use std::fs;
use std::path::Path;

use tracing::{debug, error};

use crate::runner::{CommandSpec, ProcessRunner};

use super::strategy::{InjectContext, InjectionPlan};
use super::{base_addr, AttachError};

const PORT_PLACEHOLDER: &str = "${listen_port}";
const SELF_PATH_PLACEHOLDER: &str = "${current_file_abspath}";
const AGENT_LIB_PLACEHOLDER: &str = "${flight_profiler_agent_so_path}";
const OFFSET_PLACEHOLDER: &str = "${nm_symbol_offset}";

/// Values substituted into the payload template.
#[derive(Debug, Clone, Copy)]
pub struct PayloadParams<'a> {
    pub port: u16,
    /// Where the rendered payload itself is written.
    pub payload_path: &'a Path,
    pub agent_library: &'a Path,
    pub base_address: u64,
}

/// Substitute every placeholder in `template`.
pub fn render_payload(template: &str, params: &PayloadParams<'_>) -> String {
    template
        .replace(PORT_PLACEHOLDER, &params.port.to_string())
        .replace(SELF_PATH_PLACEHOLDER, &params.payload_path.display().to_string())
        .replace(AGENT_LIB_PLACEHOLDER, &params.agent_library.display().to_string())
        .replace(OFFSET_PLACEHOLDER, &params.base_address.to_string())
}

/// One-liner handed to `<runtime> -c`.
pub fn remote_exec_script(pid: u32, payload_path: &Path) -> String {
    let escaped = payload_path
        .display()
        .to_string()
        .replace('\\', "\\\\")
        .replace('\'', "\\'");
    format!("import sys; sys.remote_exec({pid}, '{escaped}')")
}

pub fn execute<R: ProcessRunner>(
    ctx: &InjectContext<'_, R>,
    plan: &InjectionPlan,
) -> Result<u16, AttachError> {
    let base_address = match plan.base_address {
        Some(addr) => addr,
        None => base_addr::resolve(ctx, plan.pid)?,
    };

    let template_path = ctx.layout.payload_template();
    let template = fs::read_to_string(&template_path).map_err(|source| AttachError::ReadFile {
        path: template_path.clone(),
        source,
    })?;
    let payload_path = ctx
        .layout
        .rendered_payload(plan.pid, chrono::Utc::now().timestamp());
    let agent_library = ctx.layout.agent_library();
    let payload = render_payload(
        &template,
        &PayloadParams {
            port: plan.port,
            payload_path: &payload_path,
            agent_library: &agent_library,
            base_address,
        },
    );
    fs::write(&payload_path, payload).map_err(|source| AttachError::WriteFile {
        path: payload_path.clone(),
        source,
    })?;
    debug!(path = %payload_path.display(), "payload rendered");

    let spec = CommandSpec::new(
        ctx.client_runtime.display().to_string(),
        ["-c".to_string(), remote_exec_script(plan.pid, &payload_path)],
    );
    let output = ctx.runner.run(&spec)?;
    if output.success() {
        return Ok(plan.port);
    }

    let stderr = output.stderr_str();
    if stderr.contains("PermissionError") {
        return Err(AttachError::PermissionDenied {
            pid: plan.pid,
            detail: last_line(&stderr),
        });
    }
    error!(
        status = %output.termination,
        stderr = %stderr.trim(),
        "remote exec failed"
    );
    Err(AttachError::RemoteExecFailed {
        detail: last_line(&stderr),
    })
}

/// Final line of a traceback, which names the exception.
fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no diagnostic output")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::strategy::Strategy;
    use crate::layout::InstallLayout;
    use crate::runner::{CommandOutput, ToolError};
    use crate::runtime::HostPlatform;
    use std::cell::RefCell;
    use std::path::PathBuf;

    const TEMPLATE: &str = "PORT = ${listen_port}\nSELF = '${current_file_abspath}'\nLIB = '${flight_profiler_agent_so_path}'\nOFFSET = ${nm_symbol_offset}\n";

    struct Runtime {
        output: CommandOutput,
        seen: RefCell<Vec<CommandSpec>>,
    }

    impl ProcessRunner for Runtime {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
            self.seen.borrow_mut().push(spec.clone());
            Ok(self.output.clone())
        }
    }

    fn attempt(output: CommandOutput) -> (tempfile::TempDir, Runtime, Result<u16, AttachError>) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("code_inject.py"), TEMPLATE).unwrap();
        let layout = InstallLayout::new(dir.path(), HostPlatform::Linux);
        let runtime = Runtime {
            output,
            seen: RefCell::new(Vec::new()),
        };
        let result = {
            let ctx = InjectContext {
                runner: &runtime,
                layout: &layout,
                client_runtime: PathBuf::from("/usr/bin/python3.14"),
            };
            let plan = InjectionPlan {
                strategy: Strategy::RemoteExec,
                pid: 4242,
                port: 16001,
                base_address: Some(4096),
                debug: false,
            };
            execute(&ctx, &plan)
        };
        (dir, runtime, result)
    }

    #[test]
    fn renders_every_placeholder() {
        let rendered = render_payload(
            TEMPLATE,
            &PayloadParams {
                port: 16001,
                payload_path: Path::new("/opt/fp/code_inject_4242_17.py"),
                agent_library: Path::new("/opt/fp/lib/flight_profiler_agent.so"),
                base_address: 4096,
            },
        );
        assert_eq!(
            rendered,
            "PORT = 16001\nSELF = '/opt/fp/code_inject_4242_17.py'\nLIB = '/opt/fp/lib/flight_profiler_agent.so'\nOFFSET = 4096\n"
        );
        assert!(!rendered.contains("${"));
    }

    #[test]
    fn script_quotes_path() {
        assert_eq!(
            remote_exec_script(7, Path::new("/tmp/it's.py")),
            "import sys; sys.remote_exec(7, '/tmp/it\\'s.py')"
        );
    }

    #[test]
    fn success_writes_payload_and_returns_requested_port() {
        let (dir, runtime, result) = attempt(CommandOutput::exited(0, "", ""));
        assert_eq!(result.unwrap(), 16001);

        let seen = runtime.seen.borrow();
        assert_eq!(seen[0].program, "/usr/bin/python3.14");
        assert!(seen[0].args[1].starts_with("import sys; sys.remote_exec(4242, '"));

        let rendered: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("code_inject_4242_"))
            .collect();
        assert_eq!(rendered.len(), 1);
        let body = fs::read_to_string(dir.path().join(&rendered[0])).unwrap();
        assert!(body.contains("PORT = 16001"));
        assert!(body.contains("OFFSET = 4096"));
    }

    #[test]
    fn permission_error_is_distinguished() {
        let stderr = "Traceback (most recent call last):\n  File \"<string>\", line 1\nPermissionError: [Errno 1] Operation not permitted\n";
        let (_dir, _runtime, result) = attempt(CommandOutput::exited(1, "", stderr));
        match result {
            Err(AttachError::PermissionDenied { pid, detail }) => {
                assert_eq!(pid, 4242);
                assert!(detail.starts_with("PermissionError"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_failures_are_remote_exec_failures() {
        let (_dir, _runtime, result) =
            attempt(CommandOutput::exited(1, "", "RuntimeError: remote debugging disabled\n"));
        match result {
            Err(AttachError::RemoteExecFailed { detail }) => {
                assert_eq!(detail, "RuntimeError: remote debugging disabled")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_template_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallLayout::new(dir.path(), HostPlatform::Linux);
        let runtime = Runtime {
            output: CommandOutput::exited(0, "", ""),
            seen: RefCell::new(Vec::new()),
        };
        let ctx = InjectContext {
            runner: &runtime,
            layout: &layout,
            client_runtime: PathBuf::from("python3"),
        };
        let plan = InjectionPlan {
            strategy: Strategy::RemoteExec,
            pid: 1,
            port: 16000,
            base_address: Some(1),
            debug: false,
        };
        assert!(matches!(execute(&ctx, &plan), Err(AttachError::ReadFile { .. })));
        assert!(runtime.seen.borrow().is_empty());
    }
}
