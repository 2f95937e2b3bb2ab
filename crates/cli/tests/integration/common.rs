//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// A plan whose install step writes an executable `hello` into `bin/`.
pub const HELLO_PLAN: &str = r#"
pkg_name = "hello"
pkg_origin = "core"
pkg_version = "1.0"
pkg_binary_path = ["bin"]

[hooks]
do_build = "true"
do_install = '''
mkdir -p "$pkg_prefix/bin"
printf '#!/bin/sh\necho hello from kiln\n' > "$pkg_prefix/bin/hello"
chmod +x "$pkg_prefix/bin/hello"
'''
"#;

/// Builds with `hello` from its build dependencies on PATH.
pub const GREETER_PLAN: &str = r#"
pkg_name = "greeter"
pkg_origin = "core"
pkg_version = "0.3"
pkg_binary_path = ["bin"]
pkg_build_deps = ["hello"]

[hooks]
do_build = "hello > greeting.txt"
do_install = '''
mkdir -p "$pkg_prefix/bin"
cp greeting.txt "$pkg_prefix/bin/greeting"
'''
"#;

pub const FAILING_PLAN: &str = r#"
pkg_name = "broken"
pkg_origin = "core"
pkg_version = "1.0"

[hooks]
do_build = "echo compiler exploded >&2; exit 4"
"#;

/// Isolated test environment.
///
/// Each test gets its own temporary directory with isolated studios, store,
/// source cache and source path.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Write `plans/<name>/plan.toml` and return the plan directory.
  pub fn write_plan(&self, name: &str, content: &str) -> PathBuf {
    self.write_file(&format!("plans/{name}/plan.toml"), content);
    self.temp.path().join("plans").join(name)
  }

  fn dir(&self, name: &str) -> PathBuf {
    let p = self.temp.path().join(name);
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn src_path(&self) -> PathBuf {
    self.dir("src")
  }

  pub fn studios_home(&self) -> PathBuf {
    self.dir("studios")
  }

  pub fn studio_root(&self) -> PathBuf {
    self.studios_home().join("test-studio")
  }

  pub fn store_path(&self) -> PathBuf {
    self.dir("store")
  }

  pub fn results_path(&self) -> PathBuf {
    self.temp.path().join("results")
  }

  /// Get a pre-configured Command for the kiln binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `KILN_SRC_PATH`, `KILN_STUDIOS_HOME`, `KILN_STUDIO_ROOT`: studio location
  /// - `KILN_STORE`: isolated package store
  /// - `KILN_CACHE`, `XDG_CACHE_HOME`: isolated source cache
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    for var in ["KILN_QUIET", "KILN_VERBOSE", "KILN_STUDIO_TYPE", "KILN_NO_SRC_PATH", "RUST_LOG"] {
      cmd.env_remove(var);
    }
    cmd.env("KILN_SRC_PATH", self.src_path());
    cmd.env("KILN_STUDIOS_HOME", self.studios_home());
    cmd.env("KILN_STUDIO_ROOT", self.studio_root());
    cmd.env("KILN_STORE", self.store_path());
    cmd.env("KILN_CACHE", self.dir("cache"));
    cmd.env("XDG_CACHE_HOME", self.dir("cache"));
    cmd
  }
}
