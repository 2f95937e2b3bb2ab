//! Hook slots and override-or-default resolution.
//!
//! The hook set is closed: every lifecycle stage has exactly one slot, and a
//! slot resolves either to the plan's own body or to the built-in default.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Plan, PlanError};

/// A lifecycle stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
  Prepare,
  Build,
  Check,
  Install,
}

impl Stage {
  pub const ALL: [Stage; 4] = [Stage::Prepare, Stage::Build, Stage::Check, Stage::Install];

  pub fn as_str(&self) -> &'static str {
    match self {
      Stage::Prepare => "prepare",
      Stage::Build => "build",
      Stage::Check => "check",
      Stage::Install => "install",
    }
  }

  /// The plan-file key of this stage's hook slot.
  pub fn hook_name(&self) -> &'static str {
    match self {
      Stage::Prepare => "do_prepare",
      Stage::Build => "do_build",
      Stage::Check => "do_check",
      Stage::Install => "do_install",
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Stage {
  type Err = PlanError;

  /// Accepts hook slot names (`do_build`) and bare stage names (`build`).
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Stage::ALL
      .into_iter()
      .find(|stage| stage.hook_name() == s || stage.as_str() == s)
      .ok_or_else(|| PlanError::UnknownHook(s.to_string()))
  }
}

/// A hook body declared by a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookOverride {
  /// Shell snippet run inside the studio.
  pub script: String,
  /// Run the stage's default body before `script`.
  pub extend_default: bool,
}

/// What runs for a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookBody {
  /// The built-in default for the stage.
  Default(Stage),
  /// The plan's own body.
  Override(HookOverride),
}

/// Default build recipes a plan can opt into instead of writing `do_build`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
  /// `./configure --prefix=$pkg_prefix && make`
  Autotools,
  /// Plain `make`.
  Make,
}

impl BuildSystem {
  /// The recipe's shell snippet for `stage`, if it has one.
  pub fn script(&self, stage: Stage) -> Option<&'static str> {
    match (self, stage) {
      (_, Stage::Prepare) => None,
      (BuildSystem::Autotools, Stage::Build) => Some("./configure --prefix=\"$pkg_prefix\"\nmake"),
      (BuildSystem::Make, Stage::Build) => Some("make"),
      (_, Stage::Check) => Some("make check"),
      (BuildSystem::Autotools, Stage::Install) => Some("make install"),
      (BuildSystem::Make, Stage::Install) => Some("make install PREFIX=\"$pkg_prefix\""),
    }
  }
}

/// Resolve the body that runs for `hook_name` in `plan`.
///
/// Returns the plan's override when declared, otherwise the stage default.
/// Names outside the closed hook set are rejected with `UnknownHook`.
pub fn resolve_hook(plan: &Plan, hook_name: &str) -> Result<HookBody, PlanError> {
  let stage: Stage = hook_name.parse()?;
  Ok(plan.hook_body(stage))
}

impl Plan {
  pub fn hook_body(&self, stage: Stage) -> HookBody {
    match self.hooks.get(&stage) {
      Some(body) => HookBody::Override(body.clone()),
      None => HookBody::Default(stage),
    }
  }

  /// True when the build stage has something to run.
  pub fn has_build_step(&self) -> bool {
    self.hooks.contains_key(&Stage::Build) || self.build_system.is_some()
  }
}
