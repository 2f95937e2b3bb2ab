//! The environment every hook runs with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::types::BuildContext;
use crate::plan::Plan;
use crate::studio::{Studio, compose_path};

/// Paths a lifecycle run works in, all inside the studio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDirs {
  /// Where sources are unpacked.
  pub cache: PathBuf,
  /// `<cache>/<pkg_dirname>`, the working directory of every hook.
  pub src: PathBuf,
  /// Staged install prefix.
  pub prefix: PathBuf,
}

impl BuildDirs {
  pub fn new(plan: &Plan, studio: &Studio, release: &str) -> Self {
    let cache = studio.cache_dir();
    Self {
      src: cache.join(&plan.dirname),
      prefix: studio
        .out_dir()
        .join(&plan.origin)
        .join(&plan.name)
        .join(&plan.version)
        .join(release),
      cache,
    }
  }
}

fn display(path: &Path) -> String {
  path.to_string_lossy().into_owned()
}

/// Variables layered over the sandbox environment for every hook.
pub fn build_env(plan: &Plan, studio: &Studio, ctx: &BuildContext, dirs: &BuildDirs) -> BTreeMap<String, String> {
  let mut env = BTreeMap::new();
  env.insert("pkg_name".to_string(), plan.name.clone());
  env.insert("pkg_origin".to_string(), plan.origin.clone());
  env.insert("pkg_version".to_string(), plan.version.clone());
  env.insert("pkg_release".to_string(), ctx.release.clone());
  env.insert("pkg_dirname".to_string(), plan.dirname.clone());
  env.insert("pkg_prefix".to_string(), display(&dirs.prefix));
  env.insert("SRC_PATH".to_string(), display(&dirs.src));
  env.insert("CACHE_PATH".to_string(), display(&dirs.cache));
  env.insert("STUDIO_TYPE".to_string(), studio.studio_type().to_string());
  env.insert("PATH".to_string(), compose_path(&ctx.dep_bin_dirs, studio));
  env
}
