//! The hook lifecycle.
//!
//! A build runs the stages `prepare -> build -> (check) -> install` inside a
//! studio. Each stage runs the plan's hook if it declares one and the stage
//! default otherwise; a hook declared with `extend_default` runs after the
//! default. The first failing stage ends the run and no later stage starts.

mod env;
mod types;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

pub use env::{BuildDirs, build_env};
pub use types::*;

use crate::fetch::{Fetcher, unpack_archive};
use crate::patch::Patcher;
use crate::plan::{HookBody, Plan, Stage};
use crate::studio::Studio;

/// Runs plans through their lifecycle.
#[derive(Debug, Clone)]
pub struct Lifecycle<F, P> {
  fetcher: F,
  patcher: P,
}

impl<F: Fetcher, P: Patcher> Lifecycle<F, P> {
  pub fn new(fetcher: F, patcher: P) -> Self {
    Self { fetcher, patcher }
  }

  pub async fn run(
    &self,
    plan: &Plan,
    studio: &mut Studio,
    ctx: &BuildContext,
    options: &LifecycleOptions,
  ) -> Result<BuildResult, LifecycleError> {
    let ident = plan.ident().with_release(&ctx.release);
    if !plan.has_build_step() {
      return Err(LifecycleError::NoBuildStep { plan: plan.ident() });
    }

    let dirs = BuildDirs::new(plan, studio, &ctx.release);
    for dir in [&dirs.src, &dirs.prefix] {
      std::fs::create_dir_all(dir).map_err(|source| LifecycleError::StageFailed {
        stage: Stage::Prepare,
        cause: StageFailure::Io {
          context: format!("creating {}", dir.display()),
          source,
        },
      })?;
    }
    let env = build_env(plan, studio, ctx, &dirs);

    let mut state = LifecycleState::Pending;
    let mut stages = Vec::new();
    for stage in Stage::ALL {
      if stage == Stage::Check && !options.run_check {
        debug!(plan = %ident, "check stage not requested");
        continue;
      }

      transition(&mut state, LifecycleState::Running(stage));
      info!(plan = %ident, stage = %stage, "stage started");
      let started = Instant::now();

      match self.run_stage(stage, plan, studio, ctx, &dirs, &env).await {
        Ok(source) => {
          let duration = started.elapsed();
          info!(plan = %ident, stage = %stage, ?duration, "stage succeeded");
          stages.push(StageReport {
            stage,
            source,
            duration,
          });
        }
        Err(cause) => {
          let err = LifecycleError::StageFailed { stage, cause };
          transition(&mut state, err.state());
          warn!(plan = %ident, stage = %stage, error = %err, "stage failed");
          return Err(err);
        }
      }
    }
    transition(&mut state, LifecycleState::Succeeded);

    Ok(BuildResult {
      ident,
      state,
      stages,
      prefix: dirs.prefix,
      src_dir: dirs.src,
    })
  }

  async fn run_stage(
    &self,
    stage: Stage,
    plan: &Plan,
    studio: &mut Studio,
    ctx: &BuildContext,
    dirs: &BuildDirs,
    env: &BTreeMap<String, String>,
  ) -> Result<HookSource, StageFailure> {
    // A cancel that lands while no command runs still fails this stage.
    studio.ensure_not_cancelled()?;
    let source = match plan.hook_body(stage) {
      HookBody::Default(stage) => {
        self.run_default(stage, plan, studio, ctx, dirs, env).await?;
        HookSource::Default
      }
      HookBody::Override(hook) => {
        if hook.extend_default {
          self.run_default(stage, plan, studio, ctx, dirs, env).await?;
        }
        run_script(studio, &hook.script, env, &dirs.src).await?;
        if hook.extend_default {
          HookSource::Extended
        } else {
          HookSource::Override
        }
      }
    };
    studio.ensure_not_cancelled()?;
    Ok(source)
  }

  async fn run_default(
    &self,
    stage: Stage,
    plan: &Plan,
    studio: &mut Studio,
    ctx: &BuildContext,
    dirs: &BuildDirs,
    env: &BTreeMap<String, String>,
  ) -> Result<(), StageFailure> {
    if stage == Stage::Prepare {
      return self.default_prepare(plan, studio, ctx, dirs).await;
    }

    match plan.build_system.and_then(|recipe| recipe.script(stage)) {
      Some(script) => run_script(studio, script, env, &dirs.src).await,
      None => {
        debug!(stage = %stage, "no default body");
        Ok(())
      }
    }
  }

  /// Fetch, verify and unpack the source, then apply patches in order.
  async fn default_prepare(
    &self,
    plan: &Plan,
    studio: &Studio,
    ctx: &BuildContext,
    dirs: &BuildDirs,
  ) -> Result<(), StageFailure> {
    if let Some(url) = plan.source_url().map_err(|e| StageFailure::Source(e.to_string()))? {
      let checksum = plan
        .checksum
        .as_ref()
        .ok_or_else(|| StageFailure::Source(format!("{url} has no checksum")))?;
      let archive = self.fetcher.fetch(&url, checksum, &ctx.source_cache).await?;

      let cache = dirs.cache.clone();
      tokio::task::spawn_blocking(move || unpack_archive(&archive, &cache))
        .await
        .map_err(|e| StageFailure::Io {
          context: "unpacking source".to_string(),
          source: std::io::Error::other(e),
        })??;
    }

    for patch in plan.patch_paths() {
      studio.ensure_not_cancelled()?;
      self.patcher.apply(&patch, &dirs.src).await?;
    }
    Ok(())
  }
}

async fn run_script(
  studio: &mut Studio,
  script: &str,
  env: &BTreeMap<String, String>,
  cwd: &Path,
) -> Result<(), StageFailure> {
  let output = studio.run_with_env(script, env, cwd).await?;
  if !output.success() {
    return Err(StageFailure::Exit(ExitInfo::from_output(&output)));
  }
  Ok(())
}

fn transition(state: &mut LifecycleState, next: LifecycleState) {
  debug!(from = ?state, to = ?next, "lifecycle transition");
  *state = next;
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::fetch::FetchError;
  use crate::patch::PatchError;
  use crate::plan::Checksum;
  use crate::studio::{HostSandbox, SessionConfig, SessionError, StudioCanceller};
  use crate::util::testutil::plan as parse_plan;
  use std::path::PathBuf;
  use std::sync::{Arc, Mutex};
  use tempfile::TempDir;

  /// Serves one prebuilt archive for every URL.
  #[derive(Debug, Clone, Default)]
  struct StaticFetcher {
    archive: Option<PathBuf>,
    calls: Arc<Mutex<Vec<String>>>,
  }

  impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str, _checksum: &Checksum, _dest_dir: &Path) -> Result<PathBuf, FetchError> {
      self.calls.lock().unwrap().push(url.to_string());
      self.archive.clone().ok_or_else(|| FetchError::FetchFailed {
        url: url.to_string(),
        message: "no archive".to_string(),
      })
    }
  }

  /// Records patches and rejects the ones named in `reject`.
  #[derive(Debug, Clone, Default)]
  struct RecordingPatcher {
    reject: Vec<&'static str>,
    applied: Arc<Mutex<Vec<String>>>,
  }

  impl Patcher for RecordingPatcher {
    async fn apply(&self, patch: &Path, _source_dir: &Path) -> Result<(), PatchError> {
      let name = patch.file_name().unwrap().to_string_lossy().into_owned();
      self.applied.lock().unwrap().push(name.clone());
      if self.reject.contains(&name.as_str()) {
        return Err(PatchError::PatchRejected {
          patch: patch.to_path_buf(),
          message: "hunk 1 FAILED".to_string(),
        });
      }
      Ok(())
    }
  }

  /// Cancels the studio from inside the first patch, like a Ctrl-C that
  /// lands while prepare runs no command.
  #[derive(Debug, Clone)]
  struct CancellingPatcher {
    canceller: StudioCanceller,
    applied: Arc<Mutex<Vec<String>>>,
  }

  impl Patcher for CancellingPatcher {
    async fn apply(&self, patch: &Path, _source_dir: &Path) -> Result<(), PatchError> {
      self.applied.lock().unwrap().push(patch.display().to_string());
      self.canceller.cancel();
      Ok(())
    }
  }

  struct Fixture {
    temp: TempDir,
    studio: Studio,
  }

  impl Fixture {
    fn new() -> Self {
      let temp = TempDir::new().unwrap();
      let config = SessionConfig::for_root(&temp.path().join("studio"), temp.path()).without_source_mount();
      let studio = Studio::create(&config, Arc::new(HostSandbox)).unwrap();
      Self { temp, studio }
    }

    fn ctx_of(temp: &TempDir) -> BuildContext {
      BuildContext {
        release: "20240101000000".to_string(),
        dep_bin_dirs: Vec::new(),
        source_cache: temp.path().join("sources"),
      }
    }

    fn archive(&self, dirname: &str, files: &[(&str, &str)]) -> PathBuf {
      use flate2::Compression;
      use flate2::write::GzEncoder;

      let path = self.temp.path().join(format!("{dirname}.tar.gz"));
      let encoder = GzEncoder::new(std::fs::File::create(&path).unwrap(), Compression::default());
      let mut builder = tar::Builder::new(encoder);
      for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
          .append_data(&mut header, format!("{dirname}/{name}"), content.as_bytes())
          .unwrap();
      }
      builder.into_inner().unwrap().finish().unwrap();
      path
    }
  }

  fn sourced_plan(extra: &str) -> Plan {
    parse_plan(&format!(
      r#"
pkg_name = "hello"
pkg_origin = "core"
pkg_version = "1.0"
pkg_source = "https://example.com/${{pkg_name}}-${{pkg_version}}.tar.gz"
pkg_shasum = "{}"
{extra}
"#,
      "a".repeat(64)
    ))
  }

  #[tokio::test]
  async fn runs_stages_with_overrides_and_defaults() {
    let mut fx = Fixture::new();
    let fetcher = StaticFetcher {
      archive: Some(fx.archive("hello-1.0", &[("greeting.txt", "hi")])),
      ..Default::default()
    };
    let plan = sourced_plan(
      r#"
[hooks]
do_build = "cat greeting.txt > built.txt"
do_install = '''
mkdir -p "$pkg_prefix/bin"
cp built.txt "$pkg_prefix/bin/hello"
echo "$pkg_name/$pkg_version/$pkg_release" > "$pkg_prefix/IDENT"
'''
"#,
    );
    let lifecycle = Lifecycle::new(fetcher.clone(), RecordingPatcher::default());

    let result = lifecycle
      .run(&plan, &mut fx.studio, &Fixture::ctx_of(&fx.temp), &LifecycleOptions::default())
      .await
      .unwrap();

    assert_eq!(result.state, LifecycleState::Succeeded);
    assert_eq!(result.ident.to_string(), "core/hello/1.0/20240101000000");
    let ran: Vec<(Stage, HookSource)> = result.stages.iter().map(|s| (s.stage, s.source)).collect();
    assert_eq!(
      ran,
      vec![
        (Stage::Prepare, HookSource::Default),
        (Stage::Build, HookSource::Override),
        (Stage::Install, HookSource::Override),
      ]
    );
    assert_eq!(*fetcher.calls.lock().unwrap(), vec!["https://example.com/hello-1.0.tar.gz"]);
    assert_eq!(std::fs::read_to_string(result.prefix.join("bin/hello")).unwrap(), "hi");
    assert_eq!(
      std::fs::read_to_string(result.prefix.join("IDENT")).unwrap().trim(),
      "hello/1.0/20240101000000"
    );
  }

  #[tokio::test]
  async fn second_of_three_patches_failing_stops_prepare() {
    let mut fx = Fixture::new();
    let plan = parse_plan(
      r#"
pkg_name = "hello"
pkg_origin = "core"
pkg_version = "1.0"
pkg_patches = ["patches/001-a.patch", "patches/002-b.patch", "patches/003-c.patch"]

[hooks]
do_build = "echo built > \"$pkg_prefix/built\""
"#,
    );
    let patcher = RecordingPatcher {
      reject: vec!["002-b.patch"],
      ..Default::default()
    };
    let lifecycle = Lifecycle::new(StaticFetcher::default(), patcher.clone());

    let err = lifecycle
      .run(&plan, &mut fx.studio, &Fixture::ctx_of(&fx.temp), &LifecycleOptions::default())
      .await
      .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Prepare));
    assert!(matches!(
      err,
      LifecycleError::StageFailed {
        cause: StageFailure::Patch(PatchError::PatchRejected { ref patch, .. }),
        ..
      } if patch.ends_with("patches/002-b.patch")
    ));
    assert_eq!(*patcher.applied.lock().unwrap(), vec!["001-a.patch", "002-b.patch"]);
    assert!(!fx.studio.out_dir().join("core/hello/1.0/20240101000000/built").exists());
    assert!(err.to_string().starts_with("stage 'prepare' failed"));
  }

  #[tokio::test]
  async fn plan_without_build_step_fails_before_any_stage() {
    let mut fx = Fixture::new();
    let fetcher = StaticFetcher::default();
    let plan = sourced_plan("");
    let lifecycle = Lifecycle::new(fetcher.clone(), RecordingPatcher::default());

    let err = lifecycle
      .run(&plan, &mut fx.studio, &Fixture::ctx_of(&fx.temp), &LifecycleOptions::default())
      .await
      .unwrap_err();

    assert!(matches!(err, LifecycleError::NoBuildStep { .. }));
    assert!(fetcher.calls.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn failing_hook_reports_exit_and_stops() {
    let mut fx = Fixture::new();
    let plan = parse_plan(
      r#"
pkg_name = "hello"
pkg_origin = "core"
pkg_version = "1.0"

[hooks]
do_build = "echo 'cc: error: main.c' >&2; exit 3"
do_install = "echo installed > \"$pkg_prefix/installed\""
"#,
    );
    let lifecycle = Lifecycle::new(StaticFetcher::default(), RecordingPatcher::default());

    let err = lifecycle
      .run(&plan, &mut fx.studio, &Fixture::ctx_of(&fx.temp), &LifecycleOptions::default())
      .await
      .unwrap_err();

    let LifecycleError::StageFailed {
      stage: Stage::Build,
      cause: StageFailure::Exit(exit),
    } = &err
    else {
      panic!("unexpected error: {err}");
    };
    assert_eq!(exit.code, Some(3));
    assert_eq!(exit.stderr_tail, "cc: error: main.c");
    assert!(matches!(err.state(), LifecycleState::Failed { stage: Stage::Build, exit: Some(_) }));
    assert!(!fx.studio.out_dir().join("core/hello/1.0/20240101000000/installed").exists());
  }

  #[tokio::test]
  async fn extended_prepare_runs_after_default() {
    let mut fx = Fixture::new();
    let fetcher = StaticFetcher {
      archive: Some(fx.archive("hello-1.0", &[("Makefile", "all:\n")])),
      ..Default::default()
    };
    let plan = sourced_plan(
      r#"
[hooks]
do_build = "true"

[hooks.do_prepare]
run = "test -f Makefile && echo patched > prepared.txt"
extend_default = true
"#,
    );
    let lifecycle = Lifecycle::new(fetcher, RecordingPatcher::default());

    let result = lifecycle
      .run(&plan, &mut fx.studio, &Fixture::ctx_of(&fx.temp), &LifecycleOptions::default())
      .await
      .unwrap();

    assert_eq!(result.stages[0].source, HookSource::Extended);
    assert!(result.src_dir.join("prepared.txt").exists());
  }

  #[tokio::test]
  async fn check_runs_only_when_requested() {
    let plan = parse_plan(
      r#"
pkg_name = "hello"
pkg_origin = "core"
pkg_version = "1.0"

[hooks]
do_build = "true"
do_check = "echo checked > \"$pkg_prefix/checked\""
"#,
    );
    let lifecycle = Lifecycle::new(StaticFetcher::default(), RecordingPatcher::default());

    let mut fx = Fixture::new();
    let skipped = lifecycle
      .run(&plan, &mut fx.studio, &Fixture::ctx_of(&fx.temp), &LifecycleOptions::default())
      .await
      .unwrap();
    assert!(!skipped.stages.iter().any(|s| s.stage == Stage::Check));
    assert!(!skipped.prefix.join("checked").exists());

    let mut fx = Fixture::new();
    let checked = lifecycle
      .run(&plan, &mut fx.studio, &Fixture::ctx_of(&fx.temp), &LifecycleOptions { run_check: true })
      .await
      .unwrap();
    assert!(checked.stages.iter().any(|s| s.stage == Stage::Check));
    assert!(checked.prefix.join("checked").exists());
  }

  #[tokio::test]
  async fn fetch_failure_fails_prepare() {
    let mut fx = Fixture::new();
    let plan = sourced_plan("[hooks]\ndo_build = \"true\"\n");
    let lifecycle = Lifecycle::new(StaticFetcher::default(), RecordingPatcher::default());

    let err = lifecycle
      .run(&plan, &mut fx.studio, &Fixture::ctx_of(&fx.temp), &LifecycleOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      LifecycleError::StageFailed {
        stage: Stage::Prepare,
        cause: StageFailure::Fetch(FetchError::FetchFailed { .. })
      }
    ));
  }

  #[tokio::test]
  async fn cancel_during_prepare_stops_before_build() {
    let mut fx = Fixture::new();
    let plan = parse_plan(
      r#"
pkg_name = "hello"
pkg_origin = "core"
pkg_version = "1.0"
pkg_patches = ["patches/001-a.patch", "patches/002-b.patch"]

[hooks]
do_build = "echo built > \"$pkg_prefix/built\""
do_install = "echo installed > \"$pkg_prefix/installed\""
"#,
    );
    let patcher = CancellingPatcher {
      canceller: fx.studio.canceller(),
      applied: Arc::default(),
    };
    let lifecycle = Lifecycle::new(StaticFetcher::default(), patcher.clone());

    let err = lifecycle
      .run(&plan, &mut fx.studio, &Fixture::ctx_of(&fx.temp), &LifecycleOptions::default())
      .await
      .unwrap_err();

    assert!(matches!(
      err,
      LifecycleError::StageFailed {
        stage: Stage::Prepare,
        cause: StageFailure::Session(SessionError::Cancelled),
      }
    ));
    assert_eq!(patcher.applied.lock().unwrap().len(), 1);
    let prefix = fx.studio.out_dir().join("core/hello/1.0/20240101000000");
    assert!(!prefix.join("built").exists());
    assert!(!prefix.join("installed").exists());
  }
}
