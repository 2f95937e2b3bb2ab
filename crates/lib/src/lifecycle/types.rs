//! Lifecycle results and errors.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::fetch::FetchError;
use crate::plan::{PackageIdent, Stage};
use crate::studio::{RunOutput, SessionError};

/// Lines of stderr kept in [`ExitInfo`].
const STDERR_TAIL_LINES: usize = 20;

/// Where a lifecycle run is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
  Pending,
  Running(Stage),
  Succeeded,
  Failed { stage: Stage, exit: Option<ExitInfo> },
}

/// How a hook process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
  pub code: Option<i32>,
  pub signal: Option<i32>,
  /// Last lines of the hook's stderr.
  pub stderr_tail: String,
}

impl ExitInfo {
  pub fn from_output(output: &RunOutput) -> Self {
    #[cfg(unix)]
    let signal = std::os::unix::process::ExitStatusExt::signal(&output.status);
    #[cfg(not(unix))]
    let signal = None;

    let lines: Vec<&str> = output.stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");

    Self {
      code: output.status.code(),
      signal,
      stderr_tail: tail,
    }
  }
}

impl fmt::Display for ExitInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.code, self.signal) {
      (Some(code), _) => write!(f, "exit code {code}")?,
      (None, Some(signal)) => write!(f, "killed by signal {signal}")?,
      (None, None) => write!(f, "abnormal exit")?,
    }
    if !self.stderr_tail.is_empty() {
      write!(f, "\n{}", self.stderr_tail)?;
    }
    Ok(())
  }
}

/// Why a stage failed.
#[derive(Debug, Error)]
pub enum StageFailure {
  #[error("hook exited unsuccessfully: {0}")]
  Exit(ExitInfo),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Patch(#[from] crate::patch::PatchError),

  #[error(transparent)]
  Session(#[from] SessionError),

  #[error("invalid source: {0}")]
  Source(String),

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error("plan {plan} has no build step (declare do_build or pkg_build_system)")]
  NoBuildStep { plan: PackageIdent },

  #[error("stage '{stage}' failed: {cause}")]
  StageFailed { stage: Stage, cause: StageFailure },
}

impl LifecycleError {
  /// The failing stage, if a stage failed.
  pub fn stage(&self) -> Option<Stage> {
    match self {
      LifecycleError::StageFailed { stage, .. } => Some(*stage),
      LifecycleError::NoBuildStep { .. } => None,
    }
  }

  /// The state the run ended in.
  pub fn state(&self) -> LifecycleState {
    match self {
      LifecycleError::StageFailed { stage, cause } => LifecycleState::Failed {
        stage: *stage,
        exit: match cause {
          StageFailure::Exit(exit) => Some(exit.clone()),
          _ => None,
        },
      },
      LifecycleError::NoBuildStep { .. } => LifecycleState::Pending,
    }
  }
}

/// Which body ran for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookSource {
  Default,
  Override,
  /// Default body followed by the plan's body.
  Extended,
}

impl HookSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      HookSource::Default => "default",
      HookSource::Override => "override",
      HookSource::Extended => "extended",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
  pub stage: Stage,
  pub source: HookSource,
  pub duration: Duration,
}

/// A successful lifecycle run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
  /// Fully qualified identity of the build.
  pub ident: PackageIdent,
  pub state: LifecycleState,
  pub stages: Vec<StageReport>,
  /// Staged install prefix.
  pub prefix: PathBuf,
  /// Unpacked source directory.
  pub src_dir: PathBuf,
}

impl BuildResult {
  pub fn total_duration(&self) -> Duration {
    self.stages.iter().map(|s| s.duration).sum()
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleOptions {
  /// Run the `check` stage.
  pub run_check: bool,
}

/// Per-build inputs that do not come from the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
  /// Release stamp of the artifact being built.
  pub release: String,
  /// Binary directories of resolved dependencies, in graph order.
  pub dep_bin_dirs: Vec<PathBuf>,
  /// Where fetched sources are cached across studios.
  pub source_cache: PathBuf,
}
