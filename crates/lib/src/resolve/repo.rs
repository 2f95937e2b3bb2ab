//! Plan repositories: the plans a resolver may build from source.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::consts::PLAN_FILENAME;
use crate::plan::ident::compare_versions;
use crate::plan::{PackageIdent, Plan, PlanError};

/// Plans indexed by `origin/name`.
#[derive(Debug, Clone, Default)]
pub struct PlanRepository {
  plans: BTreeMap<String, Vec<Plan>>,
}

impl PlanRepository {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_plans(plans: impl IntoIterator<Item = Plan>) -> Self {
    let mut repo = Self::new();
    for plan in plans {
      repo.insert(plan);
    }
    repo
  }

  /// Load every `plan.toml` below `root`.
  pub fn load_dir(root: &Path) -> Result<Self, PlanError> {
    let mut repo = Self::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
      let entry = entry.map_err(|e| PlanError::Io {
        path: root.to_path_buf(),
        source: e.into(),
      })?;
      if entry.file_type().is_file() && entry.file_name() == PLAN_FILENAME {
        repo.insert(Plan::load(entry.path())?);
      }
    }
    debug!(root = %root.display(), plans = repo.len(), "loaded plan repository");
    Ok(repo)
  }

  /// Add a plan. A plan with the same identity replaces the earlier one.
  pub fn insert(&mut self, plan: Plan) {
    let versions = self.plans.entry(plan.ident().key()).or_default();
    versions.retain(|p| p.version != plan.version);
    versions.push(plan);
  }

  pub fn len(&self) -> usize {
    self.plans.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.plans.is_empty()
  }

  pub fn plans(&self) -> impl Iterator<Item = &Plan> {
    self.plans.values().flatten()
  }

  /// The highest-versioned plan satisfying `ident`.
  ///
  /// A request pinned to a release never matches a plan.
  pub fn find(&self, ident: &PackageIdent) -> Option<&Plan> {
    if ident.release.is_some() {
      return None;
    }
    self
      .plans
      .get(&ident.key())?
      .iter()
      .filter(|plan| plan.ident().satisfies(ident))
      .max_by(|a, b| compare_versions(&a.version, &b.version))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::simple_plan;
  use tempfile::TempDir;

  #[test]
  fn find_picks_highest_matching_version() {
    let repo = PlanRepository::from_plans([
      simple_plan("core", "gcc", "5.2.0", &[], &[]),
      simple_plan("core", "gcc", "10.1.0", &[], &[]),
      simple_plan("core", "gcc", "9.3.0", &[], &[]),
    ]);

    assert_eq!(repo.len(), 3);
    assert_eq!(repo.find(&PackageIdent::new("core", "gcc")).unwrap().version, "10.1.0");
    assert_eq!(repo.find(&"core/gcc/5.2.0".parse().unwrap()).unwrap().version, "5.2.0");
    assert!(repo.find(&"core/gcc/5.2.0/20240101000000".parse().unwrap()).is_none());
    assert!(repo.find(&PackageIdent::new("other", "gcc")).is_none());
  }

  #[test]
  fn load_dir_finds_nested_plans() {
    let temp = TempDir::new().unwrap();
    for (dir, name) in [("a", "zlib"), ("b/nested", "make")] {
      let plan_dir = temp.path().join(dir);
      std::fs::create_dir_all(&plan_dir).unwrap();
      std::fs::write(
        plan_dir.join(PLAN_FILENAME),
        format!("pkg_name = \"{name}\"\npkg_origin = \"core\"\npkg_version = \"1.0\"\n"),
      )
      .unwrap();
    }

    let repo = PlanRepository::load_dir(temp.path()).unwrap();
    assert_eq!(repo.len(), 2);
    assert!(repo.find(&PackageIdent::new("core", "make")).is_some());
  }

  #[test]
  fn load_dir_surfaces_invalid_plans() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(PLAN_FILENAME), "pkg_name = 3\n").unwrap();

    assert!(matches!(
      PlanRepository::load_dir(temp.path()),
      Err(PlanError::MalformedPlan { .. })
    ));
  }
}
