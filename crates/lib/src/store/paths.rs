//! On-disk layout of the package store.

use std::path::{Path, PathBuf};

use crate::plan::PackageIdent;

/// Paths inside a store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
  root: PathBuf,
}

impl StoreLayout {
  pub fn new(root: &Path) -> Self {
    Self {
      root: root.to_path_buf(),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn pkgs_dir(&self) -> PathBuf {
    self.root.join("pkgs")
  }

  /// Staging area for installs in progress. Same filesystem as `pkgs`.
  pub fn tmp_dir(&self) -> PathBuf {
    self.root.join("tmp")
  }

  pub fn locks_dir(&self) -> PathBuf {
    self.root.join("locks")
  }

  /// `pkgs/<origin>/<name>`, holding every installed version.
  pub fn name_dir(&self, ident: &PackageIdent) -> PathBuf {
    self.pkgs_dir().join(&ident.origin).join(&ident.name)
  }

  /// The directory for a fully qualified ident, `None` otherwise.
  pub fn package_dir(&self, ident: &PackageIdent) -> Option<PathBuf> {
    match (&ident.version, &ident.release) {
      (Some(version), Some(release)) => Some(self.name_dir(ident).join(version).join(release)),
      _ => None,
    }
  }

  /// `locks/<origin>@<name>@<version>@<release>.lock`. `@` never appears in
  /// an ident component, so distinct idents never share a lock.
  pub fn install_lock(&self, ident: &PackageIdent) -> PathBuf {
    let mut parts = vec![ident.origin.as_str(), ident.name.as_str()];
    parts.extend(ident.version.as_deref());
    parts.extend(ident.release.as_deref());
    self.locks_dir().join(format!("{}.lock", parts.join("@")))
  }
}
