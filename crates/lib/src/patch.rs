//! Applying plan patches to unpacked sources.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PatchError {
  #[error("patch {patch} was rejected: {message}")]
  PatchRejected { patch: PathBuf, message: String },

  #[error("failed to run patch for {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Applies a single patch file to a source tree.
pub trait Patcher: Send + Sync {
  fn apply(&self, patch: &Path, source_dir: &Path) -> impl Future<Output = Result<(), PatchError>> + Send;
}

/// Runs the host `patch` tool with `-p1`.
#[derive(Debug, Clone)]
pub struct CommandPatcher {
  program: String,
}

impl Default for CommandPatcher {
  fn default() -> Self {
    Self {
      program: "patch".to_string(),
    }
  }
}

impl CommandPatcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_program(program: &str) -> Self {
    Self {
      program: program.to_string(),
    }
  }
}

impl Patcher for CommandPatcher {
  async fn apply(&self, patch: &Path, source_dir: &Path) -> Result<(), PatchError> {
    if !patch.is_file() {
      return Err(PatchError::PatchRejected {
        patch: patch.to_path_buf(),
        message: "patch file does not exist".to_string(),
      });
    }

    info!(patch = %patch.display(), "applying patch");
    let output = Command::new(&self.program)
      .args(["-p1", "--batch", "--forward", "--input"])
      .arg(patch)
      .current_dir(source_dir)
      .stdin(Stdio::null())
      .output()
      .await
      .map_err(|source| PatchError::Io {
        path: patch.to_path_buf(),
        source,
      })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
      debug!(stdout = %stdout.trim(), "patch output");
    }
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      let message = [stdout.trim(), stderr.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
      return Err(PatchError::PatchRejected {
        patch: patch.to_path_buf(),
        message,
      });
    }
    Ok(())
  }
}
