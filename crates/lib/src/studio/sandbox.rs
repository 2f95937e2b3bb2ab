//! Isolation mechanisms for studios.
//!
//! A [`Sandbox`] turns a studio root into a place commands can run. The
//! default [`HostSandbox`] runs commands directly on the host with a scrubbed
//! environment scoped to the studio root:
//! - all inherited variables are cleared
//! - PATH is exactly what the caller composed, or `/path-not-set`
//! - HOME is `/homeless-shelter`
//! - TMPDIR/TMP/TEMP/TEMPDIR point into the studio's `tmp`
//! - LANG/LC_ALL are `C` and SOURCE_DATE_EPOCH is fixed

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use super::config::StudioType;
use crate::consts::SOURCE_DATE_EPOCH;
use crate::util::fs::{remove_path, symlink_dir};

/// What to run inside a studio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
  pub program: String,
  pub args: Vec<String>,
  /// Extra variables layered over the sandbox's base environment.
  pub env: BTreeMap<String, String>,
  pub cwd: PathBuf,
}

impl CommandSpec {
  /// Run `script` with the platform's non-interactive shell.
  pub fn shell(script: &str, cwd: &Path) -> Self {
    let (program, mut args) = default_shell();
    args.push(script.to_string());
    Self {
      program,
      args,
      env: BTreeMap::new(),
      cwd: cwd.to_path_buf(),
    }
  }

  pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
    self.env.extend(env);
    self
  }
}

/// An isolation mechanism for studio roots.
pub trait Sandbox: fmt::Debug + Send + Sync {
  fn name(&self) -> &'static str;

  /// Create the directory skeleton of a fresh, empty studio root.
  fn provision(&self, root: &Path, studio_type: StudioType) -> io::Result<()>;

  /// Make `source` visible at `target` inside the studio.
  fn mount_source(&self, source: &Path, target: &Path) -> io::Result<()>;

  /// Undo [`Sandbox::mount_source`]. Must not touch the source itself.
  fn unmount_source(&self, target: &Path) -> io::Result<()>;

  /// Build the process for `spec`. Stdio is configured by the caller.
  fn command(&self, root: &Path, spec: &CommandSpec) -> Command;
}

/// Runs studio commands on the host with a scrubbed environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostSandbox;

impl Sandbox for HostSandbox {
  fn name(&self) -> &'static str {
    "host"
  }

  fn provision(&self, root: &Path, studio_type: StudioType) -> io::Result<()> {
    for dir in studio_type.skeleton() {
      std::fs::create_dir_all(root.join(dir))?;
    }
    Ok(())
  }

  fn mount_source(&self, source: &Path, target: &Path) -> io::Result<()> {
    remove_path(target)?;
    symlink_dir(source, target)
  }

  fn unmount_source(&self, target: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(target) {
      Ok(meta) if meta.file_type().is_symlink() => remove_path(target),
      Ok(_) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e),
    }
  }

  fn command(&self, root: &Path, spec: &CommandSpec) -> Command {
    let tmp_dir = root.join("tmp");

    let mut command = Command::new(&spec.program);
    command
      .args(&spec.args)
      .current_dir(&spec.cwd)
      .env_clear()
      .env("PATH", "/path-not-set")
      .env("HOME", "/homeless-shelter")
      .env("TMPDIR", &tmp_dir)
      .env("TMP", &tmp_dir)
      .env("TEMP", &tmp_dir)
      .env("TEMPDIR", &tmp_dir)
      .env("LANG", "C")
      .env("LC_ALL", "C")
      .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
      .env("STUDIO_ROOT", root);

    #[cfg(windows)]
    for var in ["SystemRoot", "ComSpec"] {
      if let Ok(value) = std::env::var(var) {
        command.env(var, value);
      }
    }

    for (key, value) in &spec.env {
      command.env(key, value);
    }

    debug!(program = %spec.program, cwd = %spec.cwd.display(), "prepared studio command");
    command
  }
}

/// The platform's non-interactive shell and the flags before the script.
///
/// Never `$SHELL`: interactive shells source profiles that rewrite PATH.
pub fn default_shell() -> (String, Vec<String>) {
  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}

/// Host directories holding the system tools studios may fall back to.
pub fn host_tool_dirs() -> Vec<PathBuf> {
  #[cfg(unix)]
  {
    ["/usr/local/bin", "/usr/bin", "/bin", "/usr/sbin", "/sbin"]
      .into_iter()
      .map(PathBuf::from)
      .filter(|p| p.is_dir())
      .collect()
  }

  #[cfg(windows)]
  {
    std::env::var_os("PATH")
      .map(|path| std::env::split_paths(&path).collect())
      .unwrap_or_default()
  }
}
