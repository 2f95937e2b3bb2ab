use predicates::prelude::*;

use super::common::{FAILING_PLAN, GREETER_PLAN, HELLO_PLAN, TestEnv};

#[test]
fn build_installs_and_extracts() {
  let env = TestEnv::new();
  let plan_dir = env.write_plan("hello", HELLO_PLAN);

  env
    .kiln_cmd()
    .arg("build")
    .arg(&plan_dir)
    .args(["--release", "20240101000000", "--extract", "hello", "--extract-to"])
    .arg(env.results_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Built core/hello/1.0/20240101000000"))
    .stdout(predicate::str::contains("Extracted"));

  assert!(
    env
      .store_path()
      .join("pkgs/core/hello/1.0/20240101000000/bin/hello")
      .is_file()
  );
  let extracted = env.results_path().join("hello");
  let output = std::process::Command::new(&extracted).output().unwrap();
  assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello from kiln");
  assert!(!env.studio_root().exists());
}

#[test]
fn identical_rebuild_reports_already_installed() {
  let env = TestEnv::new();
  let plan_dir = env.write_plan("hello", HELLO_PLAN);

  for expected in ["Built core/hello", "already installed"] {
    env
      .kiln_cmd()
      .arg("build")
      .arg(&plan_dir)
      .args(["--release", "20240101000000"])
      .assert()
      .success()
      .stdout(predicate::str::contains(expected));
  }
}

#[test]
fn failing_stage_is_named_in_error() {
  let env = TestEnv::new();
  let plan_dir = env.write_plan("broken", FAILING_PLAN);

  env
    .kiln_cmd()
    .arg("build")
    .arg(&plan_dir)
    .assert()
    .code(1)
    .stderr(predicate::str::contains("stage 'build' failed"))
    .stderr(predicate::str::contains("compiler exploded"));
  assert!(!env.studio_root().exists());
}

#[test]
fn keep_studio_leaves_root_after_failure() {
  let env = TestEnv::new();
  let plan_dir = env.write_plan("broken", FAILING_PLAN);

  env
    .kiln_cmd()
    .arg("build")
    .arg(&plan_dir)
    .arg("--keep-studio")
    .assert()
    .code(1);
  assert!(env.studio_root().is_dir());
}

#[test]
fn missing_dependency_needs_with_deps() {
  let env = TestEnv::new();
  env.write_plan("hello", HELLO_PLAN);
  let greeter = env.write_plan("greeter", GREETER_PLAN);

  env
    .kiln_cmd()
    .arg("build")
    .arg(&greeter)
    .arg("--plans")
    .arg(env.temp.path().join("plans"))
    .assert()
    .code(1)
    .stderr(predicate::str::contains("not installed"));
}

#[test]
fn with_deps_builds_dependencies_first() {
  let env = TestEnv::new();
  env.write_plan("hello", HELLO_PLAN);
  let greeter = env.write_plan("greeter", GREETER_PLAN);

  env
    .kiln_cmd()
    .arg("build")
    .arg(&greeter)
    .arg("--plans")
    .arg(env.temp.path().join("plans"))
    .args(["--with-deps", "--extract", "greeting", "--extract-to"])
    .arg(env.results_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Built dependency core/hello/1.0/"))
    .stdout(predicate::str::contains("Built core/greeter/0.3/"));

  assert_eq!(
    std::fs::read_to_string(env.results_path().join("greeting")).unwrap().trim(),
    "hello from kiln"
  );
}

#[test]
fn unknown_dependency_fails_before_any_studio() {
  let env = TestEnv::new();
  let greeter = env.write_plan("greeter", GREETER_PLAN);

  env
    .kiln_cmd()
    .arg("build")
    .arg(&greeter)
    .assert()
    .code(1)
    .stderr(predicate::str::contains("hello"));
  assert!(!env.studio_root().exists());
}

#[test]
fn json_output_describes_the_build() {
  let env = TestEnv::new();
  let plan_dir = env.write_plan("hello", HELLO_PLAN);

  env
    .kiln_cmd()
    .arg("build")
    .arg(&plan_dir)
    .args(["--release", "20240101000000", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"ident\": \"core/hello/1.0/20240101000000\""))
    .stdout(predicate::str::contains("\"stage\": \"install\""))
    .stdout(predicate::str::contains("\"content_hash\""));
}
