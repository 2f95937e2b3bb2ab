//! Package identifiers: `origin/name[/version[/release]]`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed package identifier '{ident}': {reason}")]
pub struct IdentError {
  pub ident: String,
  pub reason: String,
}

impl IdentError {
  fn new(ident: &str, reason: impl Into<String>) -> Self {
    Self {
      ident: ident.to_string(),
      reason: reason.into(),
    }
  }
}

/// Identifies a package, possibly partially.
///
/// `origin` and `name` are always present. A plan identity adds `version`;
/// an installed artifact adds `release` as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageIdent {
  pub origin: String,
  pub name: String,
  pub version: Option<String>,
  pub release: Option<String>,
}

impl PackageIdent {
  pub fn new(origin: &str, name: &str) -> Self {
    Self {
      origin: origin.to_string(),
      name: name.to_string(),
      version: None,
      release: None,
    }
  }

  pub fn with_version(mut self, version: &str) -> Self {
    self.version = Some(version.to_string());
    self
  }

  pub fn with_release(mut self, release: &str) -> Self {
    self.release = Some(release.to_string());
    self
  }

  /// Parse a dependency reference. A bare `name` takes `default_origin`.
  pub fn parse_dep(s: &str, default_origin: &str) -> Result<Self, IdentError> {
    if s.contains('/') {
      s.parse()
    } else {
      validate_component(s, s, "name")?;
      Ok(Self::new(default_origin, s))
    }
  }

  /// The `origin/name` key used to collapse duplicate references.
  pub fn key(&self) -> String {
    format!("{}/{}", self.origin, self.name)
  }

  pub fn is_fully_qualified(&self) -> bool {
    self.version.is_some() && self.release.is_some()
  }

  /// True when every component present in `req` matches this identifier.
  pub fn satisfies(&self, req: &PackageIdent) -> bool {
    if self.origin != req.origin || self.name != req.name {
      return false;
    }
    if let Some(version) = &req.version
      && self.version.as_ref() != Some(version)
    {
      return false;
    }
    if let Some(release) = &req.release
      && self.release.as_ref() != Some(release)
    {
      return false;
    }
    true
  }
}

impl fmt::Display for PackageIdent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.origin, self.name)?;
    if let Some(version) = &self.version {
      write!(f, "/{version}")?;
      if let Some(release) = &self.release {
        write!(f, "/{release}")?;
      }
    }
    Ok(())
  }
}

impl FromStr for PackageIdent {
  type Err = IdentError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let parts: Vec<&str> = s.split('/').collect();
    if !(2..=4).contains(&parts.len()) {
      return Err(IdentError::new(s, "expected origin/name[/version[/release]]"));
    }

    let labels = ["origin", "name", "version", "release"];
    for (part, label) in parts.iter().zip(labels) {
      validate_component(s, part, label)?;
    }

    Ok(Self {
      origin: parts[0].to_string(),
      name: parts[1].to_string(),
      version: parts.get(2).map(|v| v.to_string()),
      release: parts.get(3).map(|r| r.to_string()),
    })
  }
}

impl TryFrom<String> for PackageIdent {
  type Error = IdentError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<PackageIdent> for String {
  fn from(ident: PackageIdent) -> Self {
    ident.to_string()
  }
}

pub(crate) fn validate_component(ident: &str, part: &str, label: &str) -> Result<(), IdentError> {
  if part.is_empty() {
    return Err(IdentError::new(ident, format!("{label} is empty")));
  }
  if let Some(c) = part
    .chars()
    .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-')))
  {
    return Err(IdentError::new(ident, format!("invalid character '{c}' in {label}")));
  }
  Ok(())
}

/// Compare two version strings segment by segment.
///
/// Dot-separated segments that are both numeric compare numerically,
/// anything else compares lexically. `1.10` sorts after `1.9`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
  let mut left = a.split('.');
  let mut right = b.split('.');
  loop {
    match (left.next(), right.next()) {
      (None, None) => return Ordering::Equal,
      (Some(_), None) => return Ordering::Greater,
      (None, Some(_)) => return Ordering::Less,
      (Some(l), Some(r)) => {
        let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
          (Ok(l), Ok(r)) => l.cmp(&r),
          _ => l.cmp(r),
        };
        if ord != Ordering::Equal {
          return ord;
        }
      }
    }
  }
}
