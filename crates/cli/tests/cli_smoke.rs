//! CLI smoke tests for kiln.
//!
//! These tests verify that commands parse, run without panicking and return
//! the expected exit codes.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn kiln_cmd() -> Command {
  let mut cmd = cargo_bin_cmd!("kiln");
  for var in ["KILN_QUIET", "KILN_VERBOSE", "KILN_STUDIO_TYPE", "KILN_STUDIO_ROOT", "RUST_LOG"] {
    cmd.env_remove(var);
  }
  cmd
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  kiln_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"))
    .stdout(predicate::str::contains("build"))
    .stdout(predicate::str::contains("enter"));
}

#[test]
fn version_flag_works() {
  kiln_cmd()
    .arg("-V")
    .assert()
    .success()
    .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn version_subcommand_works() {
  kiln_cmd()
    .arg("version")
    .assert()
    .success()
    .stdout(predicate::str::starts_with("kiln "));
}

#[test]
fn build_help_lists_options() {
  kiln_cmd()
    .args(["build", "--help"])
    .assert()
    .success()
    .stdout(predicate::str::contains("--with-deps"))
    .stdout(predicate::str::contains("--extract-to"));
}

// =============================================================================
// Argument errors
// =============================================================================

#[test]
fn unknown_subcommand_fails() {
  kiln_cmd().arg("frobnicate").assert().failure();
}

#[test]
fn run_requires_a_command() {
  kiln_cmd().arg("run").assert().failure();
}

#[test]
fn unknown_studio_type_fails() {
  kiln_cmd()
    .args(["-t", "enormous", "new"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("enormous"));
}

#[test]
fn quiet_and_verbose_conflict() {
  let temp = TempDir::new().unwrap();
  kiln_cmd()
    .args(["-q", "-v", "-r"])
    .arg(temp.path().join("studio"))
    .arg("new")
    .assert()
    .code(1)
    .stderr(predicate::str::contains("verbose"));
}

#[test]
fn build_without_plan_fails() {
  let temp = TempDir::new().unwrap();
  kiln_cmd()
    .arg("build")
    .arg(temp.path())
    .arg("--store")
    .arg(temp.path().join("store"))
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Failed to load plan"));
}
