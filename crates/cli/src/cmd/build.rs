//! Implementation of the `kiln build` command.
//!
//! Loads a plan, resolves its dependencies against a plan directory and the
//! package store, builds it in a fresh studio and installs the result.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use kiln_lib::builder::{BuildOptions, BuildOutcome, Builder};
use kiln_lib::plan::{Plan, Stage};
use kiln_lib::resolve::PlanRepository;
use kiln_lib::store::{InstallOutcome, PackageStore};
use kiln_lib::studio::SessionConfig;

use crate::output::{
  OutputFormat, format_duration, print_info, print_json, print_stat, print_step, print_success, truncate_hash,
};

pub struct BuildArgs {
  pub plan: PathBuf,
  pub plans: Option<PathBuf>,
  pub check: bool,
  pub with_deps: bool,
  pub keep_studio: bool,
  pub release: Option<String>,
  pub extract: Vec<String>,
  pub extract_to: Option<PathBuf>,
  pub store: Option<PathBuf>,
  pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
struct BuildSummary {
  ident: String,
  path: PathBuf,
  already_installed: bool,
  content_hash: Option<String>,
  stages: Vec<StageSummary>,
  dependencies_built: Vec<String>,
  extracted: Vec<PathBuf>,
  duration_ms: u64,
}

#[derive(Debug, Serialize)]
struct StageSummary {
  stage: Stage,
  source: &'static str,
  duration_ms: u64,
}

/// Build the plan at `args.plan` and install the result.
///
/// Ctrl-C kills the running hook's process group and destroys the studio.
pub fn cmd_build(config: &SessionConfig, args: BuildArgs) -> Result<()> {
  let start = Instant::now();

  let plan = Plan::load(&args.plan).with_context(|| format!("Failed to load plan from {}", args.plan.display()))?;
  let repo = match &args.plans {
    Some(dir) => {
      PlanRepository::load_dir(dir).with_context(|| format!("Failed to load plans from {}", dir.display()))?
    }
    None => PlanRepository::new(),
  };
  let store_root = args.store.as_ref().unwrap_or(&config.store_root);
  let store = PackageStore::open(store_root)
    .with_context(|| format!("Failed to open package store at {}", store_root.display()))?;

  let options = BuildOptions {
    run_check: args.check,
    build_missing: args.with_deps,
    keep_studio: args.keep_studio,
    release: args.release,
    extract: args.extract,
    extract_to: args.extract_to,
  };
  let builder = Builder::with_defaults(config.clone(), repo, store);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt
    .block_on(async {
      let canceller = builder.canceller();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          warn!("interrupted, cancelling build");
          canceller.cancel();
        }
      });
      builder.build(&plan, &options).await
    })
    .with_context(|| format!("Build of {} failed", plan.ident()))?;

  let content_hash = builder
    .store()
    .latest(&outcome.ident)?
    .map(|pkg| pkg.manifest.content_hash.0);
  let summary = summarize(&outcome, content_hash, start.elapsed().as_millis() as u64);

  if args.output.is_json() {
    print_json(&summary)?;
  } else {
    print_summary(&outcome, &summary, config, options.keep_studio);
  }
  Ok(())
}

fn summarize(outcome: &BuildOutcome, content_hash: Option<String>, duration_ms: u64) -> BuildSummary {
  BuildSummary {
    ident: outcome.ident.to_string(),
    path: outcome.install.path().to_path_buf(),
    already_installed: matches!(outcome.install, InstallOutcome::AlreadyInstalled(_)),
    content_hash,
    stages: outcome
      .result
      .stages
      .iter()
      .map(|report| StageSummary {
        stage: report.stage,
        source: report.source.as_str(),
        duration_ms: report.duration.as_millis() as u64,
      })
      .collect(),
    dependencies_built: outcome.dependencies_built.iter().map(ToString::to_string).collect(),
    extracted: outcome.extracted.clone(),
    duration_ms,
  }
}

fn print_summary(outcome: &BuildOutcome, summary: &BuildSummary, config: &SessionConfig, kept: bool) {
  println!();
  for dep in &summary.dependencies_built {
    print_info(&format!("Built dependency {dep}"));
  }
  if summary.already_installed {
    print_success(&format!("{} already installed", summary.ident));
  } else {
    print_success(&format!("Built {}", summary.ident));
  }
  print_stat("Path", &summary.path.display().to_string());
  if let Some(hash) = &summary.content_hash {
    print_stat("Hash", truncate_hash(hash));
  }
  print_stat("Stages", &outcome.result.stages.len().to_string());
  for report in &outcome.result.stages {
    print_step(
      report.stage.as_str(),
      &format!("{} ({})", format_duration(report.duration), report.source.as_str()),
    );
  }
  for path in &summary.extracted {
    print_stat("Extracted", &path.display().to_string());
  }
  if kept {
    print_stat("Studio", &config.studio_root.display().to_string());
  }
  print_stat("Duration", &format_duration(std::time::Duration::from_millis(summary.duration_ms)));
}
