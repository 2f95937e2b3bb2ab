//! Studio sessions.
//!
//! A studio is an isolated root directory that owns everything a build
//! touches. Its lifecycle is `Created -> Entered* -> Destroyed`; the root is
//! guarded by an exclusive lock file beside it (`<root>.lock`) for as long as
//! the `Studio` value lives.

pub mod config;
pub mod sandbox;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use config::{ConfigDefaults, ConfigError, ConfigLayer, EnvSnapshot, SessionConfig, StudioType, Verbosity};
pub use sandbox::{CommandSpec, HostSandbox, Sandbox};

use crate::lock::{FileLock, LockError, LockWait};
use crate::util::fs::{remove_path, reset_dir};

#[derive(Debug, Error)]
pub enum SessionError {
  #[error("studio {root} is in use{}", holder_suffix(.holder))]
  StudioBusy { root: PathBuf, holder: Option<String> },

  #[error("studio {0} has been destroyed")]
  Destroyed(PathBuf),

  #[error("command was cancelled")]
  Cancelled,

  #[error(transparent)]
  Lock(LockError),

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Config(#[from] ConfigError),
}

fn holder_suffix(holder: &Option<String>) -> String {
  holder.as_ref().map(|h| format!(" by {h}")).unwrap_or_default()
}

impl SessionError {
  fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> SessionError {
    let context = context.into();
    move |source| SessionError::Io { context, source }
  }

  fn from_lock(root: &Path, err: LockError) -> Self {
    match err {
      LockError::Contention { purpose, pid, .. } => SessionError::StudioBusy {
        root: root.to_path_buf(),
        holder: Some(format!("PID {pid} ({purpose})")),
      },
      LockError::ContentionUnknown { .. } => SessionError::StudioBusy {
        root: root.to_path_buf(),
        holder: None,
      },
      other => SessionError::Lock(other),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudioState {
  Created,
  Entered,
  Destroyed,
}

/// Cancels the work of one or more studios.
///
/// Cancellation is sticky: a cancelled studio kills the command it is running
/// and refuses to start another. Clones share the same state, so one handle
/// can be attached to several studios with [`Studio::with_canceller`].
#[derive(Debug, Clone)]
pub struct StudioCanceller {
  tx: Arc<watch::Sender<bool>>,
}

impl Default for StudioCanceller {
  fn default() -> Self {
    Self {
      tx: Arc::new(watch::Sender::new(false)),
    }
  }
}

impl StudioCanceller {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.tx.borrow()
  }

  /// Resolves once the canceller has fired, at once if it already has.
  async fn cancelled(&self) {
    let mut rx = self.tx.subscribe();
    let _ = rx.wait_for(|done| *done).await;
  }
}

/// Captured result of a command run in a studio.
#[derive(Debug, Clone)]
pub struct RunOutput {
  pub status: ExitStatus,
  pub stdout: String,
  pub stderr: String,
}

impl RunOutput {
  pub fn success(&self) -> bool {
    self.status.success()
  }
}

/// An interactive shell attached to the caller's terminal.
#[derive(Debug)]
pub struct InteractiveHandle {
  child: Child,
  program: String,
}

impl InteractiveHandle {
  pub fn program(&self) -> &str {
    &self.program
  }

  pub async fn wait(mut self) -> Result<ExitStatus, SessionError> {
    self.child.wait().await.map_err(SessionError::io("waiting for studio shell"))
  }
}

/// A live studio session.
#[derive(Debug)]
pub struct Studio {
  config: SessionConfig,
  sandbox: Arc<dyn Sandbox>,
  state: StudioState,
  lock: Option<FileLock>,
  canceller: StudioCanceller,
  source_mounted: bool,
  interactive_shell: Option<(String, Vec<String>)>,
}

impl Studio {
  /// Lock, reset and provision the studio root described by `config`.
  pub fn create(config: &SessionConfig, sandbox: Arc<dyn Sandbox>) -> Result<Studio, SessionError> {
    Self::start(config, sandbox, true)
  }

  /// Like [`Studio::create`] but keeps whatever an earlier session left in
  /// the root.
  pub fn open(config: &SessionConfig, sandbox: Arc<dyn Sandbox>) -> Result<Studio, SessionError> {
    Self::start(config, sandbox, false)
  }

  fn start(config: &SessionConfig, sandbox: Arc<dyn Sandbox>, reset: bool) -> Result<Studio, SessionError> {
    let root = config.studio_root.clone();
    let lock = FileLock::acquire(&lock_path(&root), LockWait::NonBlocking, &format!("studio {}", root.display()))
      .map_err(|e| SessionError::from_lock(&root, e))?;

    if reset {
      reset_dir(&root).map_err(SessionError::io(format!("resetting {}", root.display())))?;
    }
    sandbox
      .provision(&root, config.studio_type)
      .map_err(SessionError::io(format!("provisioning {}", root.display())))?;

    let mut studio = Studio {
      config: config.clone(),
      sandbox,
      state: StudioState::Created,
      lock: Some(lock),
      canceller: StudioCanceller::new(),
      source_mounted: false,
      interactive_shell: None,
    };

    if config.mount_source {
      studio
        .sandbox
        .mount_source(&config.src_path, &studio.src_dir())
        .map_err(SessionError::io(format!("mounting {}", config.src_path.display())))?;
      studio.source_mounted = true;
    }

    info!(
      root = %root.display(),
      studio_type = %config.studio_type,
      sandbox = studio.sandbox.name(),
      reset,
      "studio ready"
    );
    Ok(studio)
  }

  /// Use `program args...` instead of the default shell for [`Studio::enter`].
  pub fn with_interactive_shell(mut self, program: &str, args: &[&str]) -> Self {
    self.interactive_shell = Some((program.to_string(), args.iter().map(|a| a.to_string()).collect()));
    self
  }

  pub fn config(&self) -> &SessionConfig {
    &self.config
  }

  pub fn root(&self) -> &Path {
    &self.config.studio_root
  }

  pub fn studio_type(&self) -> StudioType {
    self.config.studio_type
  }

  pub fn state(&self) -> StudioState {
    self.state
  }

  /// Where the source path is mounted.
  pub fn src_dir(&self) -> PathBuf {
    self.root().join("src")
  }

  pub fn cache_dir(&self) -> PathBuf {
    self.root().join("cache")
  }

  pub fn tmp_dir(&self) -> PathBuf {
    self.root().join("tmp")
  }

  /// Staging area for install prefixes.
  pub fn out_dir(&self) -> PathBuf {
    self.root().join("out")
  }

  pub fn canceller(&self) -> StudioCanceller {
    self.canceller.clone()
  }

  /// Share `canceller` with other studios instead of the studio's own.
  pub fn with_canceller(mut self, canceller: StudioCanceller) -> Self {
    self.canceller = canceller;
    self
  }

  pub fn is_cancelled(&self) -> bool {
    self.canceller.is_cancelled()
  }

  /// Fails with `Cancelled` once the studio's canceller has fired.
  pub fn ensure_not_cancelled(&self) -> Result<(), SessionError> {
    if self.is_cancelled() {
      return Err(SessionError::Cancelled);
    }
    Ok(())
  }

  fn ensure_live(&self) -> Result<(), SessionError> {
    if self.state == StudioState::Destroyed {
      return Err(SessionError::Destroyed(self.root().to_path_buf()));
    }
    Ok(())
  }

  /// Start an interactive shell attached to the caller's stdio.
  pub fn enter(&mut self) -> Result<InteractiveHandle, SessionError> {
    self.ensure_live()?;

    let (program, args) = self.interactive_shell.clone().unwrap_or_else(|| {
      let (program, _) = sandbox::default_shell();
      (program, vec!["-i".to_string()])
    });
    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), self.base_path());
    env.insert("STUDIO_TYPE".to_string(), self.studio_type().to_string());
    let spec = CommandSpec {
      program: program.clone(),
      args,
      env,
      cwd: self.working_dir(),
    };

    let child = self
      .sandbox
      .command(self.root(), &spec)
      .stdin(Stdio::inherit())
      .stdout(Stdio::inherit())
      .stderr(Stdio::inherit())
      .spawn()
      .map_err(SessionError::io(format!("starting {program}")))?;

    self.state = StudioState::Entered;
    info!(root = %self.root().display(), shell = %program, "entered studio");
    Ok(InteractiveHandle { child, program })
  }

  /// Run a shell script in the studio with the studio's base environment.
  pub async fn run(&mut self, script: &str) -> Result<RunOutput, SessionError> {
    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), self.base_path());
    env.insert("STUDIO_TYPE".to_string(), self.studio_type().to_string());
    let spec = CommandSpec::shell(script, &self.working_dir()).with_env(env);
    self.run_spec(&spec).await
  }

  /// Run a shell script with `env` layered over the sandbox environment.
  pub async fn run_with_env(
    &mut self,
    script: &str,
    env: &BTreeMap<String, String>,
    cwd: &Path,
  ) -> Result<RunOutput, SessionError> {
    let spec = CommandSpec::shell(script, cwd).with_env(env.clone());
    self.run_spec(&spec).await
  }

  async fn run_spec(&mut self, spec: &CommandSpec) -> Result<RunOutput, SessionError> {
    self.ensure_live()?;
    self.ensure_not_cancelled()?;
    let canceller = self.canceller.clone();

    let mut command = self.sandbox.command(self.root(), spec);
    command
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
      .spawn()
      .map_err(SessionError::io(format!("spawning {}", spec.program)))?;
    let mut group = ProcessGroup::of(&child);
    self.state = StudioState::Entered;
    debug!(pid = ?child.id(), root = %self.root().display(), "studio command started");

    let stdout = tokio::spawn(read_stream(child.stdout.take()));
    let stderr = tokio::spawn(read_stream(child.stderr.take()));

    let status = tokio::select! {
      status = child.wait() => status.map_err(SessionError::io("waiting for studio command"))?,
      () = canceller.cancelled() => {
        group.kill();
        if let Err(e) = child.kill().await {
          debug!(error = %e, "failed to kill studio command");
        }
        stdout.abort();
        stderr.abort();
        warn!(root = %self.root().display(), "studio command cancelled");
        return Err(SessionError::Cancelled);
      }
    };
    group.release();

    let output = RunOutput {
      status,
      stdout: stdout.await.unwrap_or_default(),
      stderr: stderr.await.unwrap_or_default(),
    };
    if !output.stdout.is_empty() {
      debug!(stdout = %output.stdout, "studio command stdout");
    }
    if !output.stderr.is_empty() {
      debug!(stderr = %output.stderr, "studio command stderr");
    }
    Ok(output)
  }

  /// PATH for commands that have no dependency-derived PATH of their own.
  pub fn base_path(&self) -> String {
    compose_path(&[], self)
  }

  fn working_dir(&self) -> PathBuf {
    if self.source_mounted {
      self.src_dir()
    } else {
      self.root().to_path_buf()
    }
  }

  /// Tear the studio down. Safe to call any number of times.
  ///
  /// The lock is released and the studio is `Destroyed` even when unmounting
  /// or removing the root fails, and that error is returned. A root whose
  /// source could not be unmounted is left on disk.
  pub fn destroy(&mut self) -> Result<(), SessionError> {
    if self.state == StudioState::Destroyed {
      return Ok(());
    }

    let mut error = None;
    if self.source_mounted {
      if let Err(e) = self.sandbox.unmount_source(&self.src_dir()) {
        error = Some(SessionError::io(format!("unmounting {}", self.src_dir().display()))(e));
      }
      self.source_mounted = false;
    }
    if error.is_none()
      && let Err(e) = remove_path(self.root())
    {
      error = Some(SessionError::io(format!("removing {}", self.root().display()))(e));
    }

    self.lock = None;
    self.state = StudioState::Destroyed;
    match error {
      Some(err) => {
        warn!(root = %self.root().display(), error = %err, "studio destroyed with errors");
        Err(err)
      }
      None => {
        info!(root = %self.root().display(), "studio destroyed");
        Ok(())
      }
    }
  }
}

/// Destroy a studio root that was not created by this process.
///
/// Fails with `StudioBusy` while a live session holds the root. A root that
/// does not exist is not an error.
pub fn destroy_root(root: &Path, sandbox: &dyn Sandbox) -> Result<(), SessionError> {
  let _lock = FileLock::acquire(&lock_path(root), LockWait::NonBlocking, &format!("destroy {}", root.display()))
    .map_err(|e| SessionError::from_lock(root, e))?;

  sandbox
    .unmount_source(&root.join("src"))
    .map_err(SessionError::io(format!("unmounting {}", root.join("src").display())))?;
  remove_path(root).map_err(SessionError::io(format!("removing {}", root.display())))?;

  info!(root = %root.display(), "studio destroyed");
  Ok(())
}

/// `<root>.lock`, beside the root so resetting the root keeps it. The file
/// outlives the studio.
pub fn lock_path(root: &Path) -> PathBuf {
  let mut name = root.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "studio".into());
  name.push(".lock");
  root.with_file_name(name)
}

/// Join `dirs` and, unless the studio type forbids it, the host tool dirs.
pub fn compose_path(dirs: &[PathBuf], studio: &Studio) -> String {
  let mut entries: Vec<PathBuf> = dirs.to_vec();
  for dir in ["bin", "tools/bin"] {
    let candidate = studio.root().join(dir);
    if candidate.is_dir() {
      entries.push(candidate);
    }
  }
  if studio.studio_type().inherits_host_tools() {
    entries.extend(sandbox::host_tool_dirs());
  }

  std::env::join_paths(entries)
    .map(|p| p.to_string_lossy().into_owned())
    .unwrap_or_default()
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
  let mut buffer = Vec::new();
  if let Some(mut stream) = stream
    && let Err(e) = stream.read_to_end(&mut buffer).await
  {
    debug!(error = %e, "failed to read studio command output");
  }
  String::from_utf8_lossy(&buffer).into_owned()
}

/// The process group of a running studio command.
///
/// Dropping it kills the whole group, so hooks that background work die with
/// the command even when the future running it is dropped.
struct ProcessGroup {
  #[cfg_attr(not(unix), allow(dead_code))]
  pid: Option<u32>,
  live: bool,
}

impl ProcessGroup {
  fn of(child: &Child) -> Self {
    Self {
      pid: child.id(),
      live: true,
    }
  }

  /// The command exited by itself; leave the group alone.
  fn release(&mut self) {
    self.live = false;
  }

  fn kill(&mut self) {
    if !std::mem::take(&mut self.live) {
      return;
    }
    #[cfg(unix)]
    if let Some(pid) = self.pid.and_then(|id| rustix::process::Pid::from_raw(id as i32))
      && let Err(e) = rustix::process::kill_process_group(pid, rustix::process::Signal::KILL)
    {
      debug!(error = %e, "failed to signal process group");
    }
  }
}

impl Drop for ProcessGroup {
  fn drop(&mut self) {
    self.kill();
  }
}
