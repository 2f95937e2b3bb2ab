//! Loading and validating `plan.toml` files.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path};

use serde::Deserialize;
use tracing::{debug, warn};

use super::hooks::{BuildSystem, HookOverride, Stage};
use super::ident::{PackageIdent, validate_component};
use super::types::{Checksum, OverrideCondition, OverrideRule, Plan, PlanError};
use crate::consts::PLAN_FILENAME;
use crate::studio::StudioType;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawHook {
  Script(String),
  Detailed {
    run: String,
    #[serde(default)]
    extend_default: bool,
  },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOverride {
  studio_type: StudioType,
  pkg_build_deps: Option<Vec<String>>,
  pkg_deps: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPlan {
  pkg_name: Option<String>,
  pkg_origin: Option<String>,
  pkg_version: Option<String>,
  pkg_maintainer: Option<String>,
  #[serde(default)]
  pkg_license: Vec<String>,
  pkg_source: Option<String>,
  pkg_shasum: Option<String>,
  pkg_dirname: Option<String>,
  pkg_gpg_key: Option<String>,
  #[serde(default)]
  pkg_binary_path: Vec<String>,
  #[serde(default)]
  pkg_deps: Vec<String>,
  #[serde(default)]
  pkg_build_deps: Vec<String>,
  #[serde(default)]
  pkg_patches: Vec<String>,
  pkg_build_system: Option<BuildSystem>,
  #[serde(default)]
  hooks: BTreeMap<String, RawHook>,
  #[serde(default)]
  overrides: Vec<RawOverride>,
}

impl Plan {
  /// Load a plan from a `plan.toml` file or a directory containing one.
  pub fn load(path: &Path) -> Result<Plan, PlanError> {
    let file = if path.is_dir() {
      path.join(PLAN_FILENAME)
    } else {
      path.to_path_buf()
    };
    let text = std::fs::read_to_string(&file).map_err(|source| PlanError::Io {
      path: file.clone(),
      source,
    })?;
    // Patch paths must resolve from inside the unpacked source dir.
    let parent = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let plan_dir = dunce::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());

    debug!(path = %file.display(), "loading plan");
    Self::from_toml_str(&text, &plan_dir)
  }

  /// Parse and validate a plan from TOML text.
  ///
  /// `plan_dir` anchors relative patch paths.
  pub fn from_toml_str(text: &str, plan_dir: &Path) -> Result<Plan, PlanError> {
    let label = plan_dir.display().to_string();
    let raw: RawPlan = toml::from_str(text).map_err(|e| PlanError::malformed(&label, e.message()))?;

    let name = required(&label, "pkg_name", raw.pkg_name)?;
    let origin = required(&label, "pkg_origin", raw.pkg_origin)?;
    let version = required(&label, "pkg_version", raw.pkg_version)?;
    let ident_text = format!("{origin}/{name}/{version}");
    validate_component(&ident_text, &origin, "origin")?;
    validate_component(&ident_text, &name, "name")?;
    validate_component(&ident_text, &version, "version")?;
    let ident = PackageIdent::new(&origin, &name).with_version(&version);

    let checksum = raw
      .pkg_shasum
      .map(|s| s.parse::<Checksum>().map_err(|reason| PlanError::malformed(&ident, reason)))
      .transpose()?;
    if raw.pkg_source.is_some() && checksum.is_none() {
      return Err(PlanError::ChecksumMissing {
        plan: ident.to_string(),
      });
    }

    let runtime_deps = dep_list(&ident, "pkg_deps", &raw.pkg_deps)?;
    let mut build_deps = dep_list(&ident, "pkg_build_deps", &raw.pkg_build_deps)?;
    build_deps.retain(|dep| {
      let duplicated = runtime_deps.iter().any(|r| r.key() == dep.key());
      if duplicated {
        warn!(plan = %ident, dep = %dep, "dependency declared as both runtime and build; keeping runtime");
      }
      !duplicated
    });

    for entry in raw.pkg_binary_path.iter().chain(raw.pkg_patches.iter()) {
      validate_relative(&ident, entry)?;
    }

    let mut hooks = BTreeMap::new();
    for (hook_name, raw_hook) in raw.hooks {
      let stage: Stage = hook_name.parse()?;
      let body = match raw_hook {
        RawHook::Script(script) => HookOverride {
          script,
          extend_default: false,
        },
        RawHook::Detailed { run, extend_default } => HookOverride {
          script: run,
          extend_default,
        },
      };
      if hooks.insert(stage, body).is_some() {
        return Err(PlanError::malformed(&ident, format!("hook for stage '{stage}' declared twice")));
      }
    }

    let overrides = raw
      .overrides
      .into_iter()
      .map(|o| {
        Ok(OverrideRule {
          when: OverrideCondition::StudioType(o.studio_type),
          build_deps: o
            .pkg_build_deps
            .map(|deps| dep_list(&ident, "overrides.pkg_build_deps", &deps))
            .transpose()?,
          runtime_deps: o
            .pkg_deps
            .map(|deps| dep_list(&ident, "overrides.pkg_deps", &deps))
            .transpose()?,
        })
      })
      .collect::<Result<Vec<_>, PlanError>>()?;

    let mut seen_licenses = HashSet::new();
    let license = raw
      .pkg_license
      .into_iter()
      .filter(|l| seen_licenses.insert(l.clone()))
      .collect();

    let plan = Plan {
      dirname: raw.pkg_dirname.unwrap_or_else(|| format!("{name}-{version}")),
      name,
      origin,
      version,
      maintainer: raw.pkg_maintainer,
      license,
      source: raw.pkg_source,
      checksum,
      signing_key: raw.pkg_gpg_key,
      binary_path: raw.pkg_binary_path,
      runtime_deps,
      build_deps,
      patches: raw.pkg_patches,
      build_system: raw.pkg_build_system,
      hooks,
      overrides,
      plan_dir: plan_dir.to_path_buf(),
    };

    plan
      .source_url()
      .map_err(|e| PlanError::malformed(&ident, format!("pkg_source: {e}")))?;

    Ok(plan)
  }
}

fn required(label: &str, field: &str, value: Option<String>) -> Result<String, PlanError> {
  match value {
    Some(v) if !v.trim().is_empty() => Ok(v),
    _ => Err(PlanError::malformed(label, format!("missing required field {field}"))),
  }
}

/// Parse a dependency list, rejecting duplicates and self-references.
fn dep_list(plan: &PackageIdent, field: &str, entries: &[String]) -> Result<Vec<PackageIdent>, PlanError> {
  let mut seen = HashSet::new();
  let mut deps = Vec::with_capacity(entries.len());

  for entry in entries {
    let dep = PackageIdent::parse_dep(entry, &plan.origin)?;
    if dep.key() == plan.key() {
      return Err(PlanError::malformed(plan, format!("{field} references the plan itself")));
    }
    if !seen.insert(dep.key()) {
      return Err(PlanError::malformed(plan, format!("{field} lists {} more than once", dep.key())));
    }
    deps.push(dep);
  }

  Ok(deps)
}

fn validate_relative(plan: &PackageIdent, entry: &str) -> Result<(), PlanError> {
  let path = Path::new(entry);
  let escapes = path
    .components()
    .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
  if entry.is_empty() || escapes {
    return Err(PlanError::malformed(plan, format!("path '{entry}' must be relative to the plan")));
  }
  Ok(())
}
