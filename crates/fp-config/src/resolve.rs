//! Configuration resolution from the environment.
//!
//! Resolution order: environment variables → built-in defaults. The install
//! directory falls back to the directory holding the running executable.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::range::PortRange;
use crate::validate::{validate_config, ValidationError};

/// Environment variable names.
pub const ENV_START_PORT: &str = "PYFLIGHT_INJECT_START_PORT";
pub const ENV_END_PORT: &str = "PYFLIGHT_INJECT_END_PORT";
pub const ENV_INJECT_TIMEOUT: &str = "PYFLIGHT_INJECT_TIMEOUT";
pub const ENV_PROBE_TIMEOUT_MS: &str = "PYFLIGHT_PROBE_TIMEOUT_MS";
pub const ENV_SCAN_FAULT_LIMIT: &str = "PYFLIGHT_SCAN_FAULT_LIMIT";
pub const ENV_HOME: &str = "PYFLIGHT_HOME";
pub const ENV_PYTHON: &str = "PYFLIGHT_PYTHON";
pub const ENV_HISTORY_FILE: &str = "PYFLIGHT_HISTORY_FILE";

/// Every variable consulted during resolution.
pub const ALL_ENV_VARS: &[&str] = &[
    ENV_START_PORT,
    ENV_END_PORT,
    ENV_INJECT_TIMEOUT,
    ENV_PROBE_TIMEOUT_MS,
    ENV_SCAN_FAULT_LIMIT,
    ENV_HOME,
    ENV_PYTHON,
    ENV_HISTORY_FILE,
];

/// History directory created under the user's home.
const HISTORY_DIR_NAME: &str = "pyFlightProfiler";
const HISTORY_FILE_NAME: &str = "cli_history";

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Set via environment variable.
    Environment,

    /// Derived from the location of the running executable.
    ExecutableDir,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ExecutableDir => write!(f, "executable directory"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Errors raised while resolving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var}={value:?} is not valid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("cannot determine install directory: {0}")]
    InstallDir(#[source] std::io::Error),
}

/// Fully resolved attach client configuration.
#[derive(Debug, Clone, Serialize)]
pub struct AttachConfig {
    /// Ports scanned for an existing agent and searched for a free one.
    pub port_range: PortRange,

    /// Budget for confirming the agent after injection.
    pub inject_timeout: Duration,

    /// Per-probe connect and read timeout.
    pub probe_timeout: Duration,

    /// Consecutive unreachable ports tolerated while scanning; `None` scans
    /// the whole range.
    pub scan_fault_limit: Option<u32>,

    /// Installation directory holding helpers, payload and agent library.
    pub install_dir: PathBuf,

    /// Explicit client runtime executable, if configured.
    pub python: Option<PathBuf>,

    /// Persistent command history file.
    pub history_file: PathBuf,

    /// Provenance of every resolved key, for diagnostics.
    pub sources: BTreeMap<&'static str, ConfigSource>,
}

impl AttachConfig {
    /// Built-in defaults rooted at `install_dir`.
    pub fn defaults(install_dir: PathBuf) -> Self {
        Self {
            port_range: PortRange::default(),
            inject_timeout: Duration::from_secs(crate::DEFAULT_INJECT_TIMEOUT_SECS),
            probe_timeout: Duration::from_millis(crate::DEFAULT_PROBE_TIMEOUT_MS),
            scan_fault_limit: Some(crate::DEFAULT_SCAN_FAULT_LIMIT),
            install_dir,
            python: None,
            history_file: default_history_file(),
            sources: BTreeMap::new(),
        }
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let exe = std::env::current_exe().map_err(ConfigError::InstallDir)?;
        let exe_dir = exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_lookup(|key| std::env::var(key).ok(), exe_dir)
    }

    /// Resolve using an arbitrary variable lookup.
    ///
    /// Empty values count as unset. Values that are set but malformed are
    /// errors, never silently replaced by defaults.
    pub fn from_lookup<F>(lookup: F, exe_dir: PathBuf) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut sources = BTreeMap::new();
        let mut mark = |key: &'static str, set: bool| {
            let source = if set {
                ConfigSource::Environment
            } else {
                ConfigSource::BuiltinDefault
            };
            sources.insert(key, source);
        };

        let start = parse_var::<u16>(ENV_START_PORT, get(ENV_START_PORT))?;
        mark(ENV_START_PORT, start.is_some());
        let end = parse_var::<u16>(ENV_END_PORT, get(ENV_END_PORT))?;
        mark(ENV_END_PORT, end.is_some());
        let port_range = PortRange::new(
            start.unwrap_or(crate::DEFAULT_START_PORT),
            end.unwrap_or(crate::DEFAULT_END_PORT),
        )?;

        let timeout = parse_var::<u64>(ENV_INJECT_TIMEOUT, get(ENV_INJECT_TIMEOUT))?;
        mark(ENV_INJECT_TIMEOUT, timeout.is_some());
        let probe = parse_var::<u64>(ENV_PROBE_TIMEOUT_MS, get(ENV_PROBE_TIMEOUT_MS))?;
        mark(ENV_PROBE_TIMEOUT_MS, probe.is_some());

        let fault_limit = parse_var::<u32>(ENV_SCAN_FAULT_LIMIT, get(ENV_SCAN_FAULT_LIMIT))?;
        mark(ENV_SCAN_FAULT_LIMIT, fault_limit.is_some());
        let scan_fault_limit = match fault_limit {
            Some(0) => None,
            Some(n) => Some(n),
            None => Some(crate::DEFAULT_SCAN_FAULT_LIMIT),
        };

        let install_dir = match get(ENV_HOME) {
            Some(dir) => {
                sources.insert(ENV_HOME, ConfigSource::Environment);
                PathBuf::from(dir)
            }
            None => {
                sources.insert(ENV_HOME, ConfigSource::ExecutableDir);
                exe_dir
            }
        };

        let python = get(ENV_PYTHON).map(PathBuf::from);
        sources.insert(
            ENV_PYTHON,
            if python.is_some() {
                ConfigSource::Environment
            } else {
                ConfigSource::BuiltinDefault
            },
        );

        let history_file = match get(ENV_HISTORY_FILE) {
            Some(path) => {
                sources.insert(ENV_HISTORY_FILE, ConfigSource::Environment);
                PathBuf::from(path)
            }
            None => {
                sources.insert(ENV_HISTORY_FILE, ConfigSource::BuiltinDefault);
                default_history_file()
            }
        };

        let config = Self {
            port_range,
            inject_timeout: Duration::from_secs(
                timeout.unwrap_or(crate::DEFAULT_INJECT_TIMEOUT_SECS),
            ),
            probe_timeout: Duration::from_millis(
                probe.unwrap_or(crate::DEFAULT_PROBE_TIMEOUT_MS),
            ),
            scan_fault_limit,
            install_dir,
            python,
            history_file,
            sources,
        };
        validate_config(&config)?;
        Ok(config)
    }

    /// Provenance of a single key.
    pub fn source_of(&self, key: &str) -> ConfigSource {
        self.sources.get(key).copied().unwrap_or_default()
    }
}

/// `~/pyFlightProfiler/cli_history`, relative to the working directory when
/// no home directory is known.
pub fn default_history_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(HISTORY_DIR_NAME)
        .join(HISTORY_FILE_NAME)
}

fn parse_var<T>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
    }
}
