//! flight-profiler: attach to a running Python process and drive the
//! in-process agent from an interactive prompt.
//!
//! Startup runs in a fixed order: configuration, logging, signal handlers,
//! runtime detection, preflight report, attach, then the command loop (or a
//! single `--cmd` line).

use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::Parser;
use fp_common::{ProcessId, StructuredError};
use fp_config::AttachConfig;
use fp_core::attach::{AttachKind, AttachSettings, Attacher};
use fp_core::discovery::TcpProber;
use fp_core::dispatch::{
    CommandRegistry, Dispatcher, LineSource, PlainSource, RegistryOptions, RustylineSource,
};
use fp_core::exit_codes::ExitCode;
use fp_core::layout::InstallLayout;
use fp_core::log_event;
use fp_core::logging::{
    event_names, generate_run_id, init_logging, LogConfig, LogContext, LogFormat, LogLevel, Stage,
};
use fp_core::preflight::PreflightReport;
use fp_core::runner::SystemRunner;
use fp_core::runtime::{resolve_client_runtime, target_executable, HostPlatform, RuntimeVersion};
use fp_core::session::Session;
use fp_core::signals::SignalState;
use fp_core::skills;

const USAGE: &str = "flight-profiler <pid> [options]\n       \
                     flight-profiler install-skills\n       \
                     flight-profiler uninstall-skills";

/// A realtime analysis tool for profiling Python programs.
#[derive(Parser, Debug)]
#[command(name = "flight-profiler")]
#[command(
    version,
    about = "A realtime analysis tool for profiling Python programs.",
    long_about = None,
    override_usage = USAGE
)]
struct Cli {
    /// python process id to analyze.
    #[arg(verbatim_doc_comment)]
    pid: ProcessId,

    /// One-time profile, primarily used for unit testing.
    #[arg(long, value_name = "CMD")]
    cmd: Option<String>,

    /// enable debug logging for attachment.
    #[arg(long)]
    debug: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log output format on stderr (human or jsonl)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Disable colored error output
    #[arg(long)]
    no_color: bool,
}

impl Cli {
    /// Level requested on the command line, if any flag asked for one.
    fn log_level(&self) -> Option<LogLevel> {
        if self.quiet || self.verbose > 0 {
            Some(LogLevel::from_verbosity(self.verbose, self.quiet))
        } else if self.debug {
            Some(LogLevel::Debug)
        } else {
            None
        }
    }
}

fn main() {
    let code = run(std::env::args_os().collect());
    std::process::exit(code.as_i32());
}

fn run(args: Vec<OsString>) -> ExitCode {
    match args.get(1).and_then(|a| a.to_str()) {
        Some("install-skills") => return run_skills(true),
        Some("uninstall-skills") => return run_skills(false),
        _ => {}
    }

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::Fatal
            } else {
                ExitCode::Clean
            };
        }
    };
    let log_config = LogConfig::from_env(cli.log_level(), cli.log_format);
    let errors = ErrorStyle {
        json: log_config.format == LogFormat::Jsonl,
        color: !cli.no_color && io::stderr().is_terminal(),
    };

    let config = match AttachConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            errors.report(&fp_common::Error::Config(e.to_string()), cli.pid);
            return ExitCode::Fatal;
        }
    };

    init_logging(&log_config);
    let ctx = LogContext::new(generate_run_id(), cli.pid.0);
    log_event!(
        ctx,
        DEBUG,
        event_names::CONFIG_LOADED,
        Stage::Init,
        "configuration resolved",
        install_dir = %config.install_dir.display(),
        port_range = %config.port_range,
        inject_timeout_secs = config.inject_timeout.as_secs_f64()
    );

    let signals = SignalState::new();
    if let Err(e) = signals.install() {
        tracing::warn!(error = %e, "signal handlers not installed");
    }

    let code = match attach_and_serve(&cli, &config, signals, ctx.clone()) {
        Ok(code) => code,
        Err(err) => {
            errors.report(&err, cli.pid);
            ExitCode::from(&err)
        }
    };
    log_event!(
        ctx,
        INFO,
        event_names::RUN_FINISHED,
        Stage::Teardown,
        "session ended",
        exit_code = code.as_i32()
    );
    code
}

/// How fatal errors are rendered on stderr.
struct ErrorStyle {
    json: bool,
    color: bool,
}

impl ErrorStyle {
    fn report(&self, err: &fp_common::Error, pid: ProcessId) {
        if self.json {
            eprintln!("{}", StructuredError::from(err).with_context("pid", pid).to_json());
        } else {
            eprintln!("{}", fp_common::format_error_human(err, self.color));
        }
    }
}

fn attach_and_serve(
    cli: &Cli,
    config: &AttachConfig,
    signals: SignalState,
    ctx: LogContext,
) -> Result<ExitCode, fp_common::Error> {
    let pid = cli.pid.0;
    let platform = HostPlatform::current();
    let runner = SystemRunner::default();

    let target_exe = target_executable(&runner, &platform, pid);
    let client_runtime = resolve_client_runtime(config.python.as_deref(), target_exe.as_deref())?;
    let version = RuntimeVersion::probe(&runner, &client_runtime)?;
    log_event!(
        ctx,
        INFO,
        event_names::RUN_STARTED,
        Stage::Preflight,
        "client runtime resolved",
        runtime = %client_runtime.display(),
        version = %version
    );

    PreflightReport::gather(
        &platform,
        pid,
        &config.install_dir,
        target_exe.as_deref(),
        Some(client_runtime.as_path()),
    )
    .show(&mut io::stdout(), cli.debug);

    let layout = InstallLayout::new(config.install_dir.clone(), platform.clone());
    let settings = AttachSettings::from_config(config, platform, client_runtime, version, cli.debug);
    let prober = TcpProber::new(config.probe_timeout);
    let attached = Attacher::new(&prober, &runner, &layout, settings, ctx.clone())
        .attach(pid)
        .map_err(|e| e.into_common(pid))?;

    if attached.kind == AttachKind::Reused {
        println!(
            "[INFO] Process {pid} was attached through port {} already, so keep reusing the same port.",
            attached.port
        );
    }
    println!("\nPyFlightProfiler: 🌟 attach target process {pid} successfully!");

    let session = Session::attached(
        &attached,
        config.probe_timeout,
        target_exe,
        config.history_file.clone(),
        signals.clone(),
    );
    let remote_exec_capable = version.supports_remote_exec();
    let names = CommandRegistry::standard(RegistryOptions {
        remote_exec_capable,
        line_editing: true,
    })
    .names();

    let code = match RustylineSource::new(names, signals) {
        Ok(editor) => serve(cli, editor, session, remote_exec_capable, ctx),
        Err(e) => {
            tracing::warn!(error = %e, "line editing unavailable, reading plain stdin");
            let stdin = io::stdin();
            serve(cli, PlainSource::new(stdin.lock()), session, remote_exec_capable, ctx)
        }
    };
    Ok(code)
}

fn serve<L: LineSource>(
    cli: &Cli,
    input: L,
    session: Session,
    remote_exec_capable: bool,
    ctx: LogContext,
) -> ExitCode {
    let registry = CommandRegistry::standard(RegistryOptions {
        remote_exec_capable,
        line_editing: input.supports_editing(),
    });
    let mut dispatcher = Dispatcher::new(registry, input, session, ctx);
    dispatcher.load_history();

    let mut out = io::stdout();
    if let Some(line) = &cli.cmd {
        return dispatcher.run_once(line, &mut out);
    }

    let code = dispatcher.run(&mut out);
    match code {
        ExitCode::InputClosed => eprintln!("CTRL+D pressed. Exiting Profiler."),
        ExitCode::Suspended => eprintln!("CTRL+Z pressed. Exiting Profiler."),
        _ => {}
    }
    code
}

fn run_skills(install: bool) -> ExitCode {
    let source = match AttachConfig::from_env() {
        Ok(config) => skills_source(config.install_dir),
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::Fatal;
        }
    };
    let target = match skills::default_target_dir() {
        Ok(target) => target,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::Fatal;
        }
    };

    let mut out = io::stdout();
    let result = if install {
        skills::install(&source, &target, &mut out)
    } else {
        skills::uninstall(&source, &target, &mut out)
    };
    match result {
        Ok(_) => ExitCode::Clean,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::Fatal
        }
    }
}

fn skills_source(install_dir: PathBuf) -> PathBuf {
    InstallLayout::new(install_dir, HostPlatform::current()).skills_dir()
}
