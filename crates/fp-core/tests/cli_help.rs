//! CLI help and argument tests for flight-profiler.
//!
//! Nothing here attaches to a process: every case ends during argument
//! parsing or configuration resolution.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;

/// flight-profiler with no PYFLIGHT_* variables inherited.
fn flight_profiler() -> Command {
    let mut cmd = cargo_bin_cmd!("flight-profiler");
    for var in [
        "PYFLIGHT_INJECT_START_PORT",
        "PYFLIGHT_INJECT_END_PORT",
        "PYFLIGHT_INJECT_TIMEOUT",
        "PYFLIGHT_PROBE_TIMEOUT_MS",
        "PYFLIGHT_SCAN_FAULT_LIMIT",
        "PYFLIGHT_HOME",
        "PYFLIGHT_PYTHON",
        "PYFLIGHT_HISTORY_FILE",
        "PYFLIGHT_LOG",
        "PYFLIGHT_LOG_FORMAT",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

mod help {
    use super::*;

    #[test]
    fn help_flag_shows_usage_forms() {
        flight_profiler()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("flight-profiler <pid> [options]"))
            .stdout(predicate::str::contains("flight-profiler install-skills"))
            .stdout(predicate::str::contains("flight-profiler uninstall-skills"))
            .stdout(predicate::str::contains(
                "A realtime analysis tool for profiling Python programs.",
            ));
    }

    #[test]
    fn help_describes_options() {
        flight_profiler()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("python process id to analyze."))
            .stdout(predicate::str::contains("--cmd"))
            .stdout(predicate::str::contains("--debug"));
    }

    #[test]
    fn version_flag_works() {
        flight_profiler()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("flight-profiler"));
    }
}

mod bad_arguments {
    use super::*;

    #[test]
    fn missing_pid_is_fatal() {
        flight_profiler()
            .assert()
            .code(1)
            .stderr(predicate::str::contains("error"));
    }

    #[test]
    fn non_numeric_pid_is_fatal() {
        flight_profiler()
            .arg("not-a-pid")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("invalid value"));
    }

    #[test]
    fn unknown_flag_is_fatal() {
        flight_profiler()
            .args(["4242", "--no-such-flag"])
            .assert()
            .code(1);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        flight_profiler()
            .args(["4242", "-q", "-v"])
            .assert()
            .code(1);
    }
}

mod configuration {
    use super::*;

    #[test]
    fn malformed_port_is_a_configuration_error() {
        flight_profiler()
            .arg("4242")
            .env("PYFLIGHT_INJECT_START_PORT", "sixteen")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("PYFLIGHT_INJECT_START_PORT"))
            .stderr(predicate::str::contains("Reason: configuration error"));
    }

    #[test]
    fn reversed_range_is_a_configuration_error() {
        flight_profiler()
            .arg("4242")
            .env("PYFLIGHT_INJECT_START_PORT", "17000")
            .env("PYFLIGHT_INJECT_END_PORT", "16000")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("configuration error"));
    }

    #[test]
    fn zero_timeout_is_a_configuration_error() {
        flight_profiler()
            .arg("4242")
            .env("PYFLIGHT_INJECT_TIMEOUT", "0")
            .assert()
            .code(1);
    }

    #[test]
    fn jsonl_format_reports_structured_error() {
        let output = flight_profiler()
            .args(["4242", "--log-format", "jsonl"])
            .env("PYFLIGHT_PROBE_TIMEOUT_MS", "soon")
            .assert()
            .code(1)
            .get_output()
            .clone();
        let stderr = String::from_utf8(output.stderr).unwrap();
        let line = stderr.lines().last().unwrap();
        let json: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(json["code"], 40);
        assert_eq!(json["category"], "config");
        assert_eq!(json["context"]["pid"], 4242);
    }
}
