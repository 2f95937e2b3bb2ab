//! Artifacts and their manifests.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::consts::MANIFEST_FILENAME;
use crate::plan::PackageIdent;
use crate::util::hash::{ContentHash, hash_directory};

/// A staged build output ready to be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  /// Fully qualified identifier.
  pub ident: PackageIdent,
  pub staged: PathBuf,
  pub content_hash: ContentHash,
  pub binary_path: Vec<String>,
  pub runtime_deps: Vec<PackageIdent>,
  pub signing_key: Option<String>,
}

impl Artifact {
  /// Hash a staged prefix and wrap it as an artifact.
  pub fn from_staged(
    ident: PackageIdent,
    staged: &Path,
    binary_path: Vec<String>,
    runtime_deps: Vec<PackageIdent>,
    signing_key: Option<String>,
  ) -> Result<Self, StoreError> {
    if !ident.is_fully_qualified() {
      return Err(StoreError::Unqualified(ident));
    }
    let content_hash = hash_directory(staged, &[MANIFEST_FILENAME])?;

    Ok(Self {
      ident,
      staged: staged.to_path_buf(),
      content_hash,
      binary_path,
      runtime_deps,
      signing_key,
    })
  }
}

/// `MANIFEST.json`, the last file written into an installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
  pub ident: PackageIdent,
  pub content_hash: ContentHash,
  #[serde(default)]
  pub binary_path: Vec<String>,
  #[serde(default)]
  pub runtime_deps: Vec<PackageIdent>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub signing_key: Option<String>,
  pub installed_at: DateTime<Utc>,
}

impl Manifest {
  pub fn for_artifact(artifact: &Artifact) -> Self {
    Self {
      ident: artifact.ident.clone(),
      content_hash: artifact.content_hash.clone(),
      binary_path: artifact.binary_path.clone(),
      runtime_deps: artifact.runtime_deps.clone(),
      signing_key: artifact.signing_key.clone(),
      installed_at: Utc::now(),
    }
  }

  pub fn read(package_dir: &Path) -> Result<Self, StoreError> {
    let path = package_dir.join(MANIFEST_FILENAME);
    let content = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
      path: path.clone(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| StoreError::Manifest { path, source })
  }

  /// Write the manifest through a temporary file in `package_dir` and
  /// rename it into place, so readers see the old manifest or the new one.
  pub fn write(&self, package_dir: &Path) -> Result<(), StoreError> {
    let path = package_dir.join(MANIFEST_FILENAME);
    let content = serde_json::to_string_pretty(self).map_err(|source| StoreError::Manifest {
      path: path.clone(),
      source,
    })?;
    let io_err = |source| StoreError::Io {
      path: path.clone(),
      source,
    };

    let mut file = tempfile::Builder::new()
      .prefix(".manifest")
      .tempfile_in(package_dir)
      .map_err(io_err)?;
    file.write_all(content.as_bytes()).map_err(io_err)?;
    file.as_file().sync_all().map_err(io_err)?;
    file.persist(&path).map_err(|e| io_err(e.error))?;
    Ok(())
  }
}

/// A release stamp for a new build: `YYYYMMDDhhmmss` in UTC.
pub fn release_stamp() -> String {
  Utc::now().format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn release_stamp_shape() {
    let stamp = release_stamp();
    assert_eq!(stamp.len(), 14);
    assert!(stamp.chars().all(|c| c.is_ascii_digit()));
  }

  #[test]
  fn from_staged_requires_full_ident() {
    let temp = TempDir::new().unwrap();
    let err = Artifact::from_staged(
      "core/zlib/1.2.8".parse().unwrap(),
      temp.path(),
      Vec::new(),
      Vec::new(),
      None,
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::Unqualified(_)));
  }

  #[test]
  fn hash_ignores_manifest() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("lib.so"), "binary").unwrap();
    let ident: PackageIdent = "core/zlib/1.2.8/20240101000000".parse().unwrap();

    let before = Artifact::from_staged(ident.clone(), temp.path(), Vec::new(), Vec::new(), None).unwrap();
    std::fs::write(temp.path().join(MANIFEST_FILENAME), "{}").unwrap();
    let after = Artifact::from_staged(ident, temp.path(), Vec::new(), Vec::new(), None).unwrap();

    assert_eq!(before.content_hash, after.content_hash);
  }

  #[test]
  fn manifest_round_trip() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("x"), "1").unwrap();
    let artifact = Artifact::from_staged(
      "core/x/1/20240101000000".parse().unwrap(),
      temp.path(),
      vec!["bin".into()],
      vec!["core/glibc/2.22/20230101000000".parse().unwrap()],
      Some("KEY".into()),
    )
    .unwrap();

    let manifest = Manifest::for_artifact(&artifact);
    manifest.write(temp.path()).unwrap();
    assert_eq!(Manifest::read(temp.path()).unwrap(), manifest);
  }

  #[test]
  fn write_replaces_manifest_without_leftovers() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("lib.so"), "binary").unwrap();
    let ident: PackageIdent = "core/zlib/1.2.8/20240101000000".parse().unwrap();
    let artifact = Artifact::from_staged(ident, temp.path(), Vec::new(), Vec::new(), None).unwrap();
    std::fs::write(temp.path().join(MANIFEST_FILENAME), "{ truncated").unwrap();

    let manifest = Manifest::for_artifact(&artifact);
    manifest.write(temp.path()).unwrap();

    assert_eq!(Manifest::read(temp.path()).unwrap(), manifest);
    let mut names: Vec<String> = std::fs::read_dir(temp.path())
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    assert_eq!(names, vec![MANIFEST_FILENAME.to_string(), "lib.so".to_string()]);
  }
}
