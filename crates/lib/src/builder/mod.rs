//! End-to-end builds.
//!
//! [`Builder::build`] runs one plan through the whole pipeline: resolve the
//! dependency graph, make sure every dependency is installed (building
//! missing ones first when asked to), run the lifecycle in a fresh studio,
//! install the staged prefix and optionally extract binaries. The studio is
//! destroyed on every exit path unless the caller keeps it, including when
//! the build is cancelled or its future is dropped.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::fetch::{Fetcher, HttpFetcher};
use crate::lifecycle::{BuildContext, BuildResult, Lifecycle, LifecycleError, LifecycleOptions};
use crate::patch::{CommandPatcher, Patcher};
use crate::plan::{PackageIdent, Plan, PlanError, Stage};
use crate::resolve::{DependencyGraph, PlanRepository, ResolveError, Resolver};
use crate::store::{Artifact, InstallOutcome, PackageStore, StoreError, release_stamp};
use crate::studio::{HostSandbox, Sandbox, SessionConfig, SessionError, Studio, StudioCanceller};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Session(#[from] SessionError),

  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("{plan} needs dependencies that are not installed: {}", join_idents(missing))]
  MissingDependencies {
    plan: PackageIdent,
    missing: Vec<PackageIdent>,
  },
}

fn join_idents(idents: &[PackageIdent]) -> String {
  idents.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl BuildError {
  /// The lifecycle stage that failed, if any.
  pub fn stage(&self) -> Option<Stage> {
    match self {
      BuildError::Lifecycle(err) => err.stage(),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
  pub run_check: bool,
  /// Build dependency plans that are not installed yet.
  pub build_missing: bool,
  pub keep_studio: bool,
  /// Pin the release instead of stamping the current time.
  pub release: Option<String>,
  /// Binary names to extract after install.
  pub extract: Vec<String>,
  /// Extraction destination; defaults to `<src_path>/results`.
  pub extract_to: Option<PathBuf>,
}

impl BuildOptions {
  fn for_dependency(&self) -> Self {
    Self {
      build_missing: true,
      ..Self::default()
    }
  }
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
  /// Fully qualified identity of the artifact.
  pub ident: PackageIdent,
  pub install: InstallOutcome,
  pub graph: DependencyGraph,
  pub result: BuildResult,
  pub extracted: Vec<PathBuf>,
  /// Dependencies built first, in build order.
  pub dependencies_built: Vec<PackageIdent>,
}

type BoxedBuild<'a> = Pin<Box<dyn Future<Output = Result<BuildOutcome, BuildError>> + 'a>>;

pub struct Builder<F, P> {
  config: SessionConfig,
  repo: PlanRepository,
  store: PackageStore,
  lifecycle: Lifecycle<F, P>,
  sandbox: Arc<dyn Sandbox>,
  source_cache: PathBuf,
  canceller: StudioCanceller,
}

impl Builder<HttpFetcher, CommandPatcher> {
  /// A builder with the HTTP fetcher, the host `patch` tool and the host
  /// sandbox.
  pub fn with_defaults(config: SessionConfig, repo: PlanRepository, store: PackageStore) -> Self {
    Self::new(
      config,
      repo,
      store,
      Lifecycle::new(HttpFetcher::new(), CommandPatcher::new()),
      Arc::new(HostSandbox),
    )
  }
}

impl<F: Fetcher, P: Patcher> Builder<F, P> {
  pub fn new(
    config: SessionConfig,
    repo: PlanRepository,
    store: PackageStore,
    lifecycle: Lifecycle<F, P>,
    sandbox: Arc<dyn Sandbox>,
  ) -> Self {
    Self {
      repo,
      store,
      lifecycle,
      sandbox,
      source_cache: config.source_cache.clone(),
      config,
      canceller: StudioCanceller::new(),
    }
  }

  pub fn with_source_cache(mut self, path: PathBuf) -> Self {
    self.source_cache = path;
    self
  }

  /// Cancels the running build and every build started afterwards.
  ///
  /// The hook running at the time is killed with its process group, no
  /// further stage starts, nothing is installed and the studio is destroyed
  /// unless it is kept.
  pub fn canceller(&self) -> StudioCanceller {
    self.canceller.clone()
  }

  pub fn store(&self) -> &PackageStore {
    &self.store
  }

  pub fn repo(&self) -> &PlanRepository {
    &self.repo
  }

  pub async fn build(&self, plan: &Plan, options: &BuildOptions) -> Result<BuildOutcome, BuildError> {
    self.build_in(plan, options, self.config.clone()).await
  }

  fn build_in<'a>(&'a self, plan: &'a Plan, options: &'a BuildOptions, config: SessionConfig) -> BoxedBuild<'a> {
    Box::pin(async move {
      if self.canceller.is_cancelled() {
        return Err(SessionError::Cancelled.into());
      }
      let graph = Resolver::new(&self.repo, &self.store).resolve(plan, &config)?;
      let dependencies_built = self.ensure_dependencies(plan, &graph, options).await?;

      let dep_bin_dirs = self.dependency_bin_dirs(&graph)?;
      let runtime_deps = self.installed_runtime_deps(plan, &graph, &config)?;
      let ctx = BuildContext {
        release: options.release.clone().unwrap_or_else(release_stamp),
        dep_bin_dirs,
        source_cache: self.source_cache.clone(),
      };

      info!(
        plan = %plan.ident(),
        release = %ctx.release,
        studio = %config.studio_root.display(),
        "building"
      );
      let studio = Studio::create(&config, self.sandbox.clone())?.with_canceller(self.canceller.clone());
      let mut guard = StudioGuard {
        studio,
        keep: options.keep_studio,
      };
      let outcome = self
        .run_in_studio(plan, &mut guard.studio, &ctx, options, runtime_deps)
        .await;
      drop(guard);

      let (result, install, extracted) = outcome?;
      Ok(BuildOutcome {
        ident: result.ident.clone(),
        install,
        graph,
        result,
        extracted,
        dependencies_built,
      })
    })
  }

  async fn run_in_studio(
    &self,
    plan: &Plan,
    studio: &mut Studio,
    ctx: &BuildContext,
    options: &BuildOptions,
    runtime_deps: Vec<PackageIdent>,
  ) -> Result<(BuildResult, InstallOutcome, Vec<PathBuf>), BuildError> {
    let lifecycle_options = LifecycleOptions {
      run_check: options.run_check,
    };
    let result = self.lifecycle.run(plan, studio, ctx, &lifecycle_options).await?;
    studio.ensure_not_cancelled()?;

    let artifact = Artifact::from_staged(
      result.ident.clone(),
      &result.prefix,
      plan.binary_path.clone(),
      runtime_deps,
      plan.signing_key.clone(),
    )?;
    let install = self.store.install(&artifact).await?;
    if let InstallOutcome::AlreadyInstalled(path) = &install {
      info!(ident = %artifact.ident, path = %path.display(), "identical artifact already installed");
    }

    let extracted = if options.extract.is_empty() {
      Vec::new()
    } else {
      let dest = options
        .extract_to
        .clone()
        .unwrap_or_else(|| self.config.src_path.join("results"));
      self.store.extract_binaries(&plan.ident(), &options.extract, &dest)?
    };

    Ok((result, install, extracted))
  }

  /// Build or reject the graph's plan nodes that have no installed artifact.
  async fn ensure_dependencies(
    &self,
    plan: &Plan,
    graph: &DependencyGraph,
    options: &BuildOptions,
  ) -> Result<Vec<PackageIdent>, BuildError> {
    let missing: Vec<Plan> = graph
      .missing_from(&self.store)?
      .into_iter()
      .filter_map(|node| node.plan().cloned())
      .collect();
    if missing.is_empty() {
      return Ok(Vec::new());
    }
    if !options.build_missing {
      return Err(BuildError::MissingDependencies {
        plan: plan.ident(),
        missing: missing.iter().map(Plan::ident).collect(),
      });
    }

    let dep_options = options.for_dependency();
    let mut built = Vec::new();
    for dep in &missing {
      if self.store.is_installed(&dep.ident())? {
        continue;
      }
      info!(plan = %plan.ident(), dependency = %dep.ident(), "building missing dependency");
      let config = self.dependency_config(dep);
      let outcome = self.build_in(dep, &dep_options, config).await?;
      built.extend(outcome.dependencies_built);
      built.push(outcome.ident);
    }
    Ok(built)
  }

  /// Each dependency builds in its own studio beside the main one.
  fn dependency_config(&self, dep: &Plan) -> SessionConfig {
    let mut name = self
      .config
      .studio_root
      .file_name()
      .map(|n| n.to_os_string())
      .unwrap_or_else(|| "studio".into());
    name.push(format!("-{}-{}", dep.origin, dep.name));
    let root = self.config.studio_root.with_file_name(name);
    self.config.clone().with_studio_root(&root)
  }

  fn dependency_bin_dirs(&self, graph: &DependencyGraph) -> Result<Vec<PathBuf>, BuildError> {
    let mut dirs = Vec::new();
    for node in graph.nodes() {
      if let Some(pkg) = self.store.latest(&node.ident)? {
        dirs.extend(pkg.binary_dirs());
      }
    }
    Ok(dirs)
  }

  /// Installed identities of the plan's direct runtime dependencies.
  fn installed_runtime_deps(
    &self,
    plan: &Plan,
    graph: &DependencyGraph,
    config: &SessionConfig,
  ) -> Result<Vec<PackageIdent>, BuildError> {
    let mut deps = Vec::new();
    for dep in plan.effective_deps(config).runtime_deps {
      let resolved = graph.get(&dep.key()).map(|node| node.ident.clone()).unwrap_or(dep);
      match self.store.latest(&resolved)? {
        Some(pkg) => deps.push(pkg.ident),
        None => deps.push(resolved),
      }
    }
    Ok(deps)
  }
}

/// Destroys the studio when dropped unless it is kept.
///
/// Dropping the build future mid-stage drops the running command first,
/// which kills its process group, then this guard.
struct StudioGuard {
  studio: Studio,
  keep: bool,
}

impl Drop for StudioGuard {
  fn drop(&mut self) {
    if self.keep {
      info!(root = %self.studio.root().display(), "keeping studio");
    } else if let Err(e) = self.studio.destroy() {
      warn!(root = %self.studio.root().display(), error = %e, "failed to destroy studio");
    }
  }
}
