//! Test utilities for kiln-lib.
//!
//! Builders for plans and artifacts shared by the unit tests of several
//! modules.

use std::fs;
use std::path::Path;

use crate::plan::{PackageIdent, Plan};
use crate::store::Artifact;

/// Parse a plan from TOML, panicking with the error on failure.
pub fn plan(toml: &str) -> Plan {
  Plan::from_toml_str(toml, Path::new("/plans/test")).unwrap_or_else(|e| panic!("invalid test plan: {e}"))
}

/// A minimal plan with the given identity and dependency lists.
pub fn simple_plan(origin: &str, name: &str, version: &str, deps: &[&str], build_deps: &[&str]) -> Plan {
  let list = |items: &[&str]| {
    items
      .iter()
      .map(|d| format!("\"{d}\""))
      .collect::<Vec<_>>()
      .join(", ")
  };
  plan(&format!(
    r#"
pkg_name = "{name}"
pkg_origin = "{origin}"
pkg_version = "{version}"
pkg_deps = [{}]
pkg_build_deps = [{}]
pkg_build_system = "make"
"#,
    list(deps),
    list(build_deps)
  ))
}

/// Stage an artifact directory containing `files` (relative path, content).
pub fn staged_artifact(root: &Path, ident: &str, files: &[(&str, &str)]) -> Artifact {
  let ident: PackageIdent = ident.parse().unwrap();
  let staged = root.join(format!("staged-{}", ident.to_string().replace('/', "-")));
  fs::create_dir_all(&staged).unwrap();
  for (rel, content) in files {
    let path = staged.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
  }
  Artifact::from_staged(ident, &staged, vec!["bin".to_string()], Vec::new(), None).unwrap()
}
