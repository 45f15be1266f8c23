//! `install-skills` / `uninstall-skills` end to end.
//!
//! `HOME` points at a temp dir so the real command directory is never
//! touched.

use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn flight_profiler(install: &Path, home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("flight-profiler");
    cmd.env("PYFLIGHT_HOME", install).env("HOME", home);
    cmd
}

fn install_dir_with_skills(names: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let skills = dir.path().join("skills");
    fs::create_dir_all(&skills).unwrap();
    for name in names {
        fs::write(skills.join(name), "# skill\n").unwrap();
    }
    dir
}

#[test]
fn install_copies_skills_into_home() {
    let install = install_dir_with_skills(&["pyflight-perf.md", "pyflight-stack.md"]);
    let home = tempfile::tempdir().unwrap();

    flight_profiler(install.path(), home.path())
        .arg("install-skills")
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed 2 skill(s) to"))
        .stdout(predicate::str::contains("  /pyflight-perf"))
        .stdout(predicate::str::contains("  /pyflight-stack"));

    let commands = home.path().join(".claude").join("commands");
    assert!(commands.join("pyflight-perf.md").is_file());
    assert!(commands.join("pyflight-stack.md").is_file());
}

#[test]
fn install_without_skills_dir_fails() {
    let install = tempfile::tempdir().unwrap();
    let home = tempfile::tempdir().unwrap();

    flight_profiler(install.path(), home.path())
        .arg("install-skills")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error: Skills directory not found:"));
}

#[test]
fn install_skips_pid_parsing() {
    // Extra arguments after the subcommand are not parsed as a pid.
    let install = install_dir_with_skills(&["pyflight-mem.md"]);
    let home = tempfile::tempdir().unwrap();

    flight_profiler(install.path(), home.path())
        .args(["install-skills", "--whatever"])
        .assert()
        .success();
}

#[test]
fn uninstall_removes_installed_skills() {
    let install = install_dir_with_skills(&["pyflight-trace.md"]);
    let home = tempfile::tempdir().unwrap();
    let commands = home.path().join(".claude").join("commands");
    fs::create_dir_all(&commands).unwrap();
    fs::write(commands.join("pyflight-trace.md"), "x").unwrap();
    fs::write(commands.join("personal.md"), "x").unwrap();

    flight_profiler(install.path(), home.path())
        .arg("uninstall-skills")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 skill(s)"));

    assert!(!commands.join("pyflight-trace.md").exists());
    assert!(commands.join("personal.md").exists());
}

#[test]
fn uninstall_without_skills_dir_is_silent() {
    let install = tempfile::tempdir().unwrap();
    let home = tempfile::tempdir().unwrap();

    flight_profiler(install.path(), home.path())
        .arg("uninstall-skills")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
