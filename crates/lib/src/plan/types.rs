use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use super::hooks::{BuildSystem, HookOverride, Stage};
use super::ident::{IdentError, PackageIdent};
use super::template::{self, TemplateError};
use crate::studio::{SessionConfig, StudioType};

#[derive(Debug, Error)]
pub enum PlanError {
  #[error("failed to read plan {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed plan {plan}: {reason}")]
  MalformedPlan { plan: String, reason: String },

  #[error("plan {plan} declares a source but no checksum")]
  ChecksumMissing { plan: String },

  #[error("unknown hook '{0}'")]
  UnknownHook(String),

  #[error(transparent)]
  MalformedIdent(#[from] IdentError),
}

impl PlanError {
  pub(crate) fn malformed(plan: impl fmt::Display, reason: impl Into<String>) -> Self {
    PlanError::MalformedPlan {
      plan: plan.to_string(),
      reason: reason.into(),
    }
  }
}

/// Digest algorithms accepted in `pkg_shasum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
  Sha256,
  Sha512,
}

impl ChecksumAlgorithm {
  fn hex_len(&self) -> usize {
    match self {
      ChecksumAlgorithm::Sha256 => 64,
      ChecksumAlgorithm::Sha512 => 128,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ChecksumAlgorithm::Sha256 => "sha256",
      ChecksumAlgorithm::Sha512 => "sha512",
    }
  }
}

/// An algorithm-qualified content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
  pub algorithm: ChecksumAlgorithm,
  /// Lowercase hex digest.
  pub digest: String,
}

impl Checksum {
  pub fn sha256(digest: &str) -> Self {
    Self {
      algorithm: ChecksumAlgorithm::Sha256,
      digest: digest.to_ascii_lowercase(),
    }
  }

  /// Digest of `bytes` with this checksum's algorithm.
  pub fn digest_bytes(&self, bytes: &[u8]) -> String {
    match self.algorithm {
      ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
      ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
    }
  }

  /// Digest of the file at `path` with this checksum's algorithm.
  pub fn digest_file(&self, path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut buffer = [0u8; 8192];
    match self.algorithm {
      ChecksumAlgorithm::Sha256 => {
        let mut hasher = Sha256::new();
        loop {
          let n = file.read(&mut buffer)?;
          if n == 0 {
            break;
          }
          hasher.update(&buffer[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
      }
      ChecksumAlgorithm::Sha512 => {
        let mut hasher = Sha512::new();
        loop {
          let n = file.read(&mut buffer)?;
          if n == 0 {
            break;
          }
          hasher.update(&buffer[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
      }
    }
  }
}

impl fmt::Display for Checksum {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.algorithm.as_str(), self.digest)
  }
}

impl FromStr for Checksum {
  type Err = String;

  /// `sha256:<hex>`, `sha512:<hex>`, or bare 64-char hex (sha256).
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (algorithm, digest) = match s.split_once(':') {
      Some(("sha256", digest)) => (ChecksumAlgorithm::Sha256, digest),
      Some(("sha512", digest)) => (ChecksumAlgorithm::Sha512, digest),
      Some((other, _)) => return Err(format!("unsupported checksum algorithm '{other}'")),
      None => (ChecksumAlgorithm::Sha256, s),
    };

    if digest.len() != algorithm.hex_len() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
      return Err(format!(
        "{} digest must be {} hex characters",
        algorithm.as_str(),
        algorithm.hex_len()
      ));
    }

    Ok(Self {
      algorithm,
      digest: digest.to_ascii_lowercase(),
    })
  }
}

impl TryFrom<String> for Checksum {
  type Error = String;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<Checksum> for String {
  fn from(checksum: Checksum) -> Self {
    checksum.to_string()
  }
}

/// Predicate over the session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideCondition {
  StudioType(StudioType),
}

impl OverrideCondition {
  pub fn matches(&self, config: &SessionConfig) -> bool {
    match self {
      OverrideCondition::StudioType(studio_type) => config.studio_type == *studio_type,
    }
  }
}

/// Replaces dependency lists when its condition matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRule {
  pub when: OverrideCondition,
  pub build_deps: Option<Vec<PackageIdent>>,
  pub runtime_deps: Option<Vec<PackageIdent>>,
}

/// Dependency lists after override rules were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveDeps {
  pub runtime_deps: Vec<PackageIdent>,
  pub build_deps: Vec<PackageIdent>,
  /// Index of the rule that applied, if any.
  pub applied_rule: Option<usize>,
}

/// A validated build plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
  pub name: String,
  pub origin: String,
  pub version: String,
  pub maintainer: Option<String>,
  pub license: Vec<String>,
  pub source: Option<String>,
  pub checksum: Option<Checksum>,
  pub dirname: String,
  pub signing_key: Option<String>,
  pub binary_path: Vec<String>,
  pub runtime_deps: Vec<PackageIdent>,
  pub build_deps: Vec<PackageIdent>,
  pub patches: Vec<String>,
  pub build_system: Option<BuildSystem>,
  pub hooks: BTreeMap<Stage, HookOverride>,
  pub overrides: Vec<OverrideRule>,
  pub plan_dir: PathBuf,
}

impl Plan {
  /// The `origin/name/version` identity.
  pub fn ident(&self) -> PackageIdent {
    PackageIdent::new(&self.origin, &self.name).with_version(&self.version)
  }

  fn template_vars(&self) -> [(&str, &str); 4] {
    [
      ("pkg_name", self.name.as_str()),
      ("pkg_origin", self.origin.as_str()),
      ("pkg_version", self.version.as_str()),
      ("pkg_dirname", self.dirname.as_str()),
    ]
  }

  /// The rendered source URL, if the plan declares one.
  pub fn source_url(&self) -> Result<Option<String>, TemplateError> {
    self
      .source
      .as_deref()
      .map(|source| template::render(source, &self.template_vars()))
      .transpose()
  }

  /// Absolute paths of the declared patches, in declaration order.
  pub fn patch_paths(&self) -> Vec<PathBuf> {
    self.patches.iter().map(|p| self.plan_dir.join(p)).collect()
  }

  /// Apply override rules for `config`. The last matching rule wins.
  pub fn effective_deps(&self, config: &SessionConfig) -> EffectiveDeps {
    let applied = self
      .overrides
      .iter()
      .enumerate()
      .rev()
      .find(|(_, rule)| rule.when.matches(config));

    let Some((index, rule)) = applied else {
      return EffectiveDeps {
        runtime_deps: self.runtime_deps.clone(),
        build_deps: self.build_deps.clone(),
        applied_rule: None,
      };
    };

    let runtime_deps = rule.runtime_deps.clone().unwrap_or_else(|| self.runtime_deps.clone());
    let build_deps = rule
      .build_deps
      .clone()
      .unwrap_or_else(|| self.build_deps.clone())
      .into_iter()
      .filter(|dep| !runtime_deps.iter().any(|r| r.key() == dep.key()))
      .collect();

    EffectiveDeps {
      runtime_deps,
      build_deps,
      applied_rule: Some(index),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil;

  #[test]
  fn checksum_parsing() {
    let bare = "a".repeat(64);
    let parsed: Checksum = bare.parse().unwrap();
    assert_eq!(parsed.algorithm, ChecksumAlgorithm::Sha256);

    let qualified: Checksum = format!("sha512:{}", "B".repeat(128)).parse().unwrap();
    assert_eq!(qualified.algorithm, ChecksumAlgorithm::Sha512);
    assert_eq!(qualified.digest, "b".repeat(128));

    assert!("sha256:abc".parse::<Checksum>().is_err());
    assert!(format!("md5:{}", "a".repeat(32)).parse::<Checksum>().is_err());
  }

  #[test]
  fn checksum_digests_bytes() {
    let checksum = Checksum::sha256(&"0".repeat(64));
    assert_eq!(
      checksum.digest_bytes(b"hello world"),
      "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
  }

  #[test]
  fn source_url_renders_identity() {
    let plan = testutil::plan(&format!(
      r#"
pkg_name = "findutils"
pkg_origin = "chef"
pkg_version = "4.4.2"
pkg_source = "http://ftp.gnu.org/gnu/${{pkg_name}}/${{pkg_name}}-${{pkg_version}}.tar.gz"
pkg_shasum = "{}"
pkg_build_system = "autotools"
"#,
      "c".repeat(64)
    ));

    assert_eq!(
      plan.source_url().unwrap().as_deref(),
      Some("http://ftp.gnu.org/gnu/findutils/findutils-4.4.2.tar.gz")
    );
    assert_eq!(plan.ident().to_string(), "chef/findutils/4.4.2");
  }

  #[test]
  fn last_matching_override_wins() {
    let plan = testutil::plan(
      r#"
pkg_name = "gcc"
pkg_origin = "chef"
pkg_version = "5.2.0"
pkg_build_deps = ["make", "sed"]
pkg_build_system = "autotools"

[[overrides]]
studio_type = "bootstrap"
pkg_build_deps = ["make"]

[[overrides]]
studio_type = "bootstrap"
pkg_build_deps = ["sed"]
"#,
    );

    let bootstrap =
      SessionConfig::for_root(Path::new("/s/root"), Path::new("/src")).with_studio_type(StudioType::Bootstrap);
    let effective = plan.effective_deps(&bootstrap);
    assert_eq!(effective.applied_rule, Some(1));
    assert_eq!(effective.build_deps, vec![PackageIdent::new("chef", "sed")]);

    let full = SessionConfig::for_root(Path::new("/s/root"), Path::new("/src"));
    let effective = plan.effective_deps(&full);
    assert_eq!(effective.applied_rule, None);
    assert_eq!(effective.build_deps.len(), 2);
  }
}
