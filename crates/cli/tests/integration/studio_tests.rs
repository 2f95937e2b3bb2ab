use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn new_creates_studio_and_rm_destroys_it() {
  let env = TestEnv::new();
  env.write_file("src/README", "kiln");

  env
    .kiln_cmd()
    .arg("new")
    .assert()
    .success()
    .stdout(predicate::str::contains("Studio created"));
  assert!(env.studio_root().join("tmp").is_dir());
  assert_eq!(
    std::fs::read_to_string(env.studio_root().join("src/README")).unwrap(),
    "kiln"
  );

  env.kiln_cmd().arg("rm").assert().success();
  assert!(!env.studio_root().exists());
  assert!(env.src_path().join("README").exists());
}

#[test]
fn rm_without_studio_succeeds() {
  let env = TestEnv::new();
  env.kiln_cmd().arg("rm").assert().success();
}

#[test]
fn no_src_flag_skips_mount() {
  let env = TestEnv::new();
  env.kiln_cmd().args(["-n", "new"]).assert().success();
  assert!(!env.studio_root().join("src").exists());
}

#[test]
fn run_prints_command_output() {
  let env = TestEnv::new();
  env
    .kiln_cmd()
    .args(["run", "echo", "hello world"])
    .assert()
    .success()
    .stdout(predicate::str::contains("hello world"));
}

#[test]
fn run_scrubs_the_environment() {
  let env = TestEnv::new();
  env
    .kiln_cmd()
    .env("KILN_TEST_LEAK", "leaked")
    .args(["run", "sh", "-c", "echo home=$HOME leak=${KILN_TEST_LEAK:-none}"])
    .assert()
    .success()
    .stdout(predicate::str::contains("home=/homeless-shelter leak=none"));
}

#[test]
fn run_reports_failing_command() {
  let env = TestEnv::new();
  env
    .kiln_cmd()
    .args(["run", "sh", "-c", "exit 3"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("failed"));
}

#[test]
fn run_keeps_studio_contents_between_invocations() {
  let env = TestEnv::new();
  env
    .kiln_cmd()
    .args(["run", "sh", "-c", "echo kept > $STUDIO_ROOT/tmp/marker"])
    .assert()
    .success();
  env
    .kiln_cmd()
    .args(["run", "sh", "-c", "cat $STUDIO_ROOT/tmp/marker"])
    .assert()
    .success()
    .stdout(predicate::str::contains("kept"));
}
