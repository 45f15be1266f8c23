//! Installation layout.
//!
//! Everything the attach path executes or writes lives under one install
//! directory. Paths are derived here so strategies never hard-code them.

use std::path::{Path, PathBuf};

use crate::runtime::HostPlatform;

/// Paths below the installation directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
    platform: HostPlatform,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>, platform: HostPlatform) -> Self {
        Self {
            root: root.into(),
            platform,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn platform(&self) -> &HostPlatform {
        &self.platform
    }

    /// Shell script printing the runtime's base address for a pid.
    pub fn base_addr_locator(&self) -> PathBuf {
        self.root
            .join("shell")
            .join(self.platform.script_dir())
            .join("py_bin_base_addr_locate.sh")
    }

    /// Native ptrace attach helper.
    pub fn ptrace_helper(&self) -> PathBuf {
        self.root.join("lib").join("inject")
    }

    /// Parameter file read by the ptrace helper.
    pub fn inject_params(&self) -> PathBuf {
        self.root.join("lib").join("inject_params.data")
    }

    /// Debugger driver script used on macOS.
    pub fn debugger_driver(&self) -> PathBuf {
        self.root.join("shell").join("code_inject.sh")
    }

    /// Agent bootstrap payload, also the template for remote exec.
    pub fn payload_template(&self) -> PathBuf {
        self.root.join("code_inject.py")
    }

    /// Native agent library loaded by the payload.
    pub fn agent_library(&self) -> PathBuf {
        let file = match self.platform {
            HostPlatform::MacOs => "flight_profiler_agent.dylib",
            _ => "flight_profiler_agent.so",
        };
        self.root.join("lib").join(file)
    }

    /// Rendered remote-exec payload for one attach attempt.
    pub fn rendered_payload(&self, pid: u32, unix_ts: i64) -> PathBuf {
        self.root.join(format!("code_inject_{pid}_{unix_ts}.py"))
    }

    /// Bundled assistant skill files.
    pub fn skills_dir(&self) -> PathBuf {
        self.root.join("skills")
    }
}
