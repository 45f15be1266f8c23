//! Read-only checks printed before any injection attempt.
//!
//! Nothing here blocks an attach; each check predicts a common failure and
//! tells the operator about it up front.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::runtime::{host_arch, HostPlatform, ProcessUids};

/// Marker file used to probe write access.
const WRITE_MARKER: &str = ".write_test_tmp";

const PASS: &str = "🌟";
const FAIL: &str = "❌";

/// Whether a file can be created and removed in `dir`.
pub fn check_directory_write_permission(dir: &Path) -> bool {
    let marker = dir.join(WRITE_MARKER);
    let ok = fs::write(&marker, b"test").and_then(|_| fs::remove_file(&marker));
    if let Err(e) = &ok {
        debug!(dir = %dir.display(), error = %e, "install directory not writable");
    }
    ok.is_ok()
}

/// Why an attach might be refused by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeWarning {
    TargetIsRoot,
    DifferentOwner,
}

impl PrivilegeWarning {
    pub fn message(&self) -> &'static str {
        match self {
            PrivilegeWarning::TargetIsRoot => {
                "Target process is running as root, elevated privileges may be required."
            }
            PrivilegeWarning::DifferentOwner => {
                "Target process is owned by a different user, permission issues may occur."
            }
        }
    }
}

/// Outcome of comparing client and target UIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivilegeAssessment {
    pub sufficient: bool,
    pub warning: Option<PrivilegeWarning>,
}

/// The client can attach if it is root or its effective UID matches either
/// the target's real or effective UID.
pub fn assess_privileges(client: &ProcessUids, target: &ProcessUids) -> PrivilegeAssessment {
    let sufficient = client.effective == 0
        || client.effective == target.real
        || client.effective == target.effective;

    let warning = if target.real == 0 && client.effective != 0 {
        Some(PrivilegeWarning::TargetIsRoot)
    } else if client.effective != 0 && target.real != client.real {
        Some(PrivilegeWarning::DifferentOwner)
    } else {
        None
    };

    PrivilegeAssessment { sufficient, warning }
}

/// Facts gathered about client and target before attaching.
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub version: String,
    pub platform: HostPlatform,
    pub arch: String,
    pub install_dir: PathBuf,
    pub target_executable: Option<PathBuf>,
    pub client_executable: Option<PathBuf>,
    pub install_writable: bool,
    pub target_uids: Option<ProcessUids>,
    pub client_uids: Option<ProcessUids>,
}

impl PreflightReport {
    /// Inspect the host, the client runtime and the target `pid`.
    pub fn gather(
        platform: &HostPlatform,
        pid: u32,
        install_dir: &Path,
        target_executable: Option<&Path>,
        client_executable: Option<&Path>,
    ) -> Self {
        Self {
            version: crate::VERSION.to_string(),
            platform: platform.clone(),
            arch: host_arch().to_string(),
            install_dir: install_dir.to_path_buf(),
            target_executable: target_executable.map(|p| canonical(p.to_path_buf())),
            client_executable: client_executable.map(|p| canonical(p.to_path_buf())),
            install_writable: check_directory_write_permission(install_dir),
            target_uids: ProcessUids::of_pid(pid),
            client_uids: ProcessUids::current(),
        }
    }

    /// Both executables are known and identical.
    pub fn executables_match(&self) -> bool {
        match (&self.target_executable, &self.client_executable) {
            (Some(target), Some(client)) => target == client,
            _ => false,
        }
    }

    pub fn privileges(&self) -> Option<PrivilegeAssessment> {
        match (&self.client_uids, &self.target_uids) {
            (Some(client), Some(target)) => Some(assess_privileges(client, target)),
            _ => None,
        }
    }

    /// Operator-facing lines, in display order.
    pub fn lines(&self, debug: bool) -> Vec<String> {
        let mut lines = vec![
            format!("PyFlightProfiler version: {}", self.version),
            format!(
                "[INFO] Platform system: {}. Architecture: {}",
                self.platform, self.arch
            ),
            format!("[INFO] Installation directory: {}.", self.install_dir.display()),
        ];
        if debug {
            lines.push(format!(
                "[DEBUG] Server Python Executable: {}",
                display_opt(&self.target_executable)
            ));
            lines.push(format!(
                "[DEBUG] Client Python Executable: {}",
                display_opt(&self.client_executable)
            ));
        }
        lines.push(format!(
            "[INFO] Verify pyFlightProfiler and target are using the same python executable: {}",
            mark(self.executables_match())
        ));

        lines.push(format!(
            "[INFO] Verify pyFlightProfiler has write permission to installation directory: {}",
            mark(self.install_writable)
        ));
        if !self.install_writable {
            lines.push(format!(
                "[WARN] PyFlightProfiler needs write permission to {} to function properly. \
                 Please try run flight_profiler with appropriate permissions.",
                self.install_dir.display()
            ));
        }

        match (self.privileges(), &self.client_uids, &self.target_uids) {
            (Some(assessment), Some(client), Some(target)) => {
                if debug {
                    lines.push(format!(
                        "[INFO] Server Process - Real UID: {}, Effective UID: {}",
                        target.real, target.effective
                    ));
                    lines.push(format!(
                        "[INFO] Client Process - Real UID: {}, Effective UID: {}",
                        client.real, client.effective
                    ));
                }
                lines.push(format!(
                    "[INFO] Verify pyFlightProfiler has user permission to attach target: {}",
                    mark(assessment.sufficient)
                ));
                if let Some(warning) = assessment.warning {
                    lines.push(format!("[WARN] {}", warning.message()));
                }
            }
            _ => lines.push("[INFO] Permission information not available on this platform.".to_string()),
        }
        lines
    }

    pub fn write_to<W: Write>(&self, out: &mut W, debug: bool) -> io::Result<()> {
        for line in self.lines(debug) {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }

    /// Print the report. A failed write is logged; it never stops an attach.
    pub fn show<W: Write>(&self, out: &mut W, debug: bool) {
        if let Err(e) = self.write_to(out, debug) {
            warn!(error = %e, "preflight report not printed");
        }
    }
}

fn canonical(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}

fn mark(ok: bool) -> &'static str {
    if ok {
        PASS
    } else {
        FAIL
    }
}

fn display_opt(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uids(real: u32, effective: u32) -> ProcessUids {
        ProcessUids {
            real,
            effective,
            saved: effective,
            filesystem: effective,
        }
    }

    fn report() -> PreflightReport {
        PreflightReport {
            version: "0.1.0".into(),
            platform: HostPlatform::Linux,
            arch: "x86_64".into(),
            install_dir: PathBuf::from("/opt/fp"),
            target_executable: Some(PathBuf::from("/usr/bin/python3.11")),
            client_executable: Some(PathBuf::from("/usr/bin/python3.11")),
            install_writable: true,
            target_uids: Some(uids(1000, 1000)),
            client_uids: Some(uids(1000, 1000)),
        }
    }

    #[test]
    fn root_client_is_always_sufficient() {
        let a = assess_privileges(&uids(0, 0), &uids(1000, 1000));
        assert!(a.sufficient);
        assert_eq!(a.warning, None);
    }

    #[test]
    fn same_user_is_sufficient() {
        let a = assess_privileges(&uids(1000, 1000), &uids(1000, 1000));
        assert!(a.sufficient);
        assert_eq!(a.warning, None);
    }

    #[test]
    fn effective_uid_match_is_sufficient_but_warns_on_owner() {
        let a = assess_privileges(&uids(1001, 1000), &uids(1002, 1000));
        assert!(a.sufficient);
        assert_eq!(a.warning, Some(PrivilegeWarning::DifferentOwner));
    }

    #[test]
    fn root_target_needs_elevation() {
        let a = assess_privileges(&uids(1000, 1000), &uids(0, 0));
        assert!(!a.sufficient);
        assert_eq!(a.warning, Some(PrivilegeWarning::TargetIsRoot));
    }

    #[test]
    fn write_permission_probe_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_directory_write_permission(dir.path()));
        assert!(!dir.path().join(WRITE_MARKER).exists());
        assert!(!check_directory_write_permission(&dir.path().join("missing")));
    }

    #[test]
    fn healthy_report_has_no_warnings() {
        let lines = report().lines(false);
        assert!(lines[0].starts_with("PyFlightProfiler version: "));
        assert_eq!(lines[1], "[INFO] Platform system: Linux. Architecture: x86_64");
        assert!(lines.iter().all(|l| !l.starts_with("[WARN]")));
        assert!(lines.iter().all(|l| !l.starts_with("[DEBUG]")));
        assert!(lines
            .iter()
            .any(|l| l.contains("same python executable: 🌟")));
    }

    #[test]
    fn mismatches_and_warnings_are_reported() {
        let mut r = report();
        r.client_executable = Some(PathBuf::from("/opt/conda/bin/python"));
        r.install_writable = false;
        r.target_uids = Some(uids(0, 0));
        let lines = r.lines(true);
        assert!(lines.iter().any(|l| l.contains("same python executable: ❌")));
        assert!(lines.iter().any(|l| l.starts_with("[WARN] PyFlightProfiler needs write permission")));
        assert!(lines
            .iter()
            .any(|l| l == "[WARN] Target process is running as root, elevated privileges may be required."));
        assert!(lines.iter().any(|l| l.starts_with("[DEBUG] Client Python Executable: /opt/conda")));
        assert!(lines.iter().any(|l| l.starts_with("[INFO] Server Process - Real UID: 0")));
    }

    #[test]
    fn unknown_uids_are_called_out() {
        let mut r = report();
        r.target_uids = None;
        let lines = r.lines(false);
        assert_eq!(
            lines.last().map(String::as_str),
            Some("[INFO] Permission information not available on this platform.")
        );
        assert!(r.privileges().is_none());
    }

    #[test]
    fn unknown_executables_never_match() {
        let mut r = report();
        r.target_executable = None;
        assert!(!r.executables_match());
    }

    /// Writer whose every write fails.
    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn failed_print_is_not_an_error() {
        let report = report();
        assert!(report.write_to(&mut ClosedPipe, false).is_err());
        report.show(&mut ClosedPipe, true);
    }

    #[test]
    fn gather_uses_the_known_target_executable() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("python3.11");
        fs::write(&exe, b"").unwrap();
        let report = PreflightReport::gather(
            &HostPlatform::Linux,
            std::process::id(),
            dir.path(),
            Some(&exe),
            Some(&exe),
        );
        assert!(report.executables_match());
        assert!(report.install_writable);
    }
}
