//! The package store.
//!
//! Installed artifacts live under their fully qualified ident. A package is
//! installed exactly when its `MANIFEST.json` exists; installs are staged in
//! `tmp/` and moved into place with a single rename, then the manifest is
//! written last.
//!
//! # Layout
//!
//! ```text
//! store/
//! ├── pkgs/<origin>/<name>/<version>/<release>/
//! │   ├── ...                 # artifact content
//! │   └── MANIFEST.json
//! ├── tmp/                    # installs in progress
//! └── locks/                  # one lock file per fully qualified ident
//! ```

mod artifact;
pub mod paths;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub use artifact::{Artifact, Manifest, release_stamp};
pub use paths::StoreLayout;

use crate::consts::MANIFEST_FILENAME;
use crate::lock::{FileLock, LockError, LockWait};
use crate::platform::paths::store_dir;
use crate::plan::PackageIdent;
use crate::util::fs::{copy_dir_all, remove_path, reset_dir};
use crate::util::hash::{ContentHash, HashError, hash_directory};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("{ident} is already installed with different content (installed {installed}, new {new})")]
  CorruptArtifact {
    ident: PackageIdent,
    installed: ContentHash,
    new: ContentHash,
  },

  #[error("no installed package matches {0}")]
  NotInstalled(PackageIdent),

  #[error("binary '{name}' not found in any installed release of {ident}")]
  BinaryNotFound { name: String, ident: PackageIdent },

  #[error("{0} is not fully qualified (origin/name/version/release)")]
  Unqualified(PackageIdent),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error("store I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid manifest {path}: {source}")]
  Manifest {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("install task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
  move |source| StoreError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
  Installed(PathBuf),
  /// The same content was already installed under this ident.
  AlreadyInstalled(PathBuf),
}

impl InstallOutcome {
  pub fn path(&self) -> &Path {
    match self {
      InstallOutcome::Installed(path) | InstallOutcome::AlreadyInstalled(path) => path,
    }
  }
}

/// An installed package as recorded by its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
  pub ident: PackageIdent,
  pub path: PathBuf,
  pub manifest: Manifest,
}

impl InstalledPackage {
  /// Absolute binary directories of this package.
  pub fn binary_dirs(&self) -> Vec<PathBuf> {
    self.manifest.binary_path.iter().map(|p| self.path.join(p)).collect()
  }
}

#[derive(Debug, Clone)]
pub struct PackageStore {
  layout: StoreLayout,
}

impl PackageStore {
  pub fn open(root: &Path) -> Result<Self, StoreError> {
    let layout = StoreLayout::new(root);
    for dir in [layout.pkgs_dir(), layout.tmp_dir(), layout.locks_dir()] {
      std::fs::create_dir_all(&dir).map_err(io_at(&dir))?;
    }
    Ok(Self { layout })
  }

  /// Open the store at `KILN_STORE` or the platform default.
  pub fn open_default() -> Result<Self, StoreError> {
    Self::open(&store_dir())
  }

  pub fn root(&self) -> &Path {
    self.layout.root()
  }

  pub fn layout(&self) -> &StoreLayout {
    &self.layout
  }

  /// Install `artifact`, waiting for any concurrent install of the same ident.
  pub async fn install(&self, artifact: &Artifact) -> Result<InstallOutcome, StoreError> {
    let store = self.clone();
    let artifact = artifact.clone();
    tokio::task::spawn_blocking(move || store.install_blocking(&artifact)).await?
  }

  pub fn install_blocking(&self, artifact: &Artifact) -> Result<InstallOutcome, StoreError> {
    let ident = &artifact.ident;
    let dest = self
      .layout
      .package_dir(ident)
      .ok_or_else(|| StoreError::Unqualified(ident.clone()))?;

    let lock_path = self.layout.install_lock(ident);
    let _lock = FileLock::acquire(&lock_path, LockWait::Blocking, &format!("install {ident}"))?;

    if dest.join(MANIFEST_FILENAME).exists() {
      match Manifest::read(&dest) {
        Ok(existing) if existing.content_hash == artifact.content_hash => {
          debug!(ident = %ident, "already installed");
          return Ok(InstallOutcome::AlreadyInstalled(dest));
        }
        Ok(existing) => {
          return Err(StoreError::CorruptArtifact {
            ident: ident.clone(),
            installed: existing.content_hash,
            new: artifact.content_hash.clone(),
          });
        }
        Err(e) => warn!(path = %dest.display(), error = %e, "unreadable manifest, reinstalling"),
      }
    }
    if dest.exists() {
      warn!(path = %dest.display(), "removing incomplete install");
      remove_path(&dest).map_err(io_at(&dest))?;
    }

    let tmp_dir = self.layout.tmp_dir();
    let staging = tempfile::Builder::new()
      .prefix(&format!("{}-{}.", ident.origin, ident.name))
      .tempdir_in(&tmp_dir)
      .map_err(io_at(&tmp_dir))?;
    let staged_copy = staging.path().join("pkg");
    copy_dir_all(&artifact.staged, &staged_copy).map_err(io_at(&artifact.staged))?;

    let copied_hash = hash_directory(&staged_copy, &[MANIFEST_FILENAME])?;
    if copied_hash != artifact.content_hash {
      return Err(StoreError::CorruptArtifact {
        ident: ident.clone(),
        installed: copied_hash,
        new: artifact.content_hash.clone(),
      });
    }

    if let Some(parent) = dest.parent() {
      std::fs::create_dir_all(parent).map_err(io_at(parent))?;
    }
    std::fs::rename(&staged_copy, &dest).map_err(io_at(&dest))?;
    Manifest::for_artifact(artifact).write(&dest)?;

    info!(ident = %ident, path = %dest.display(), hash = %artifact.content_hash, "installed");
    Ok(InstallOutcome::Installed(dest))
  }

  /// Installed packages satisfying `ident`, most recently installed first.
  pub fn installed(&self, ident: &PackageIdent) -> Result<Vec<InstalledPackage>, StoreError> {
    let name_dir = self.layout.name_dir(ident);
    if !name_dir.is_dir() {
      return Ok(Vec::new());
    }

    let mut packages = Vec::new();
    for entry in WalkDir::new(&name_dir).min_depth(2).max_depth(2).sort_by_file_name() {
      let entry = entry.map_err(|e| StoreError::Io {
        path: name_dir.clone(),
        source: e.into(),
      })?;
      if !entry.file_type().is_dir() || !entry.path().join(MANIFEST_FILENAME).exists() {
        continue;
      }

      let manifest = match Manifest::read(entry.path()) {
        Ok(manifest) => manifest,
        Err(e) => {
          warn!(path = %entry.path().display(), error = %e, "skipping package with unreadable manifest");
          continue;
        }
      };
      if manifest.ident.satisfies(ident) {
        packages.push(InstalledPackage {
          ident: manifest.ident.clone(),
          path: entry.path().to_path_buf(),
          manifest,
        });
      }
    }

    packages.sort_by(|a, b| {
      b.manifest
        .installed_at
        .cmp(&a.manifest.installed_at)
        .then_with(|| b.ident.release.cmp(&a.ident.release))
    });
    Ok(packages)
  }

  pub fn latest(&self, ident: &PackageIdent) -> Result<Option<InstalledPackage>, StoreError> {
    Ok(self.installed(ident)?.into_iter().next())
  }

  pub fn is_installed(&self, ident: &PackageIdent) -> Result<bool, StoreError> {
    Ok(self.latest(ident)?.is_some())
  }

  pub fn package_path(&self, ident: &PackageIdent) -> Result<Option<PathBuf>, StoreError> {
    Ok(self.latest(ident)?.map(|pkg| pkg.path))
  }

  /// Copy the named binaries out of the installed releases of `ident`.
  ///
  /// `dest` is reset to empty first. Each name is taken from the most
  /// recently installed release that contains it.
  pub fn extract_binaries(
    &self,
    ident: &PackageIdent,
    names: &[String],
    dest: &Path,
  ) -> Result<Vec<PathBuf>, StoreError> {
    reset_dir(dest).map_err(io_at(dest))?;

    let candidates = self.installed(ident)?;
    if candidates.is_empty() {
      return Err(StoreError::NotInstalled(ident.clone()));
    }

    let mut extracted = Vec::with_capacity(names.len());
    for name in names {
      let source = candidates
        .iter()
        .find_map(|pkg| find_file(&pkg.path, name))
        .ok_or_else(|| StoreError::BinaryNotFound {
          name: name.clone(),
          ident: ident.clone(),
        })?;

      let target = dest.join(name);
      std::fs::copy(&source, &target).map_err(io_at(&source))?;
      debug!(from = %source.display(), to = %target.display(), "extracted binary");
      extracted.push(target);
    }

    info!(ident = %ident, count = extracted.len(), dest = %dest.display(), "extracted binaries");
    Ok(extracted)
  }
}

/// First regular file named `name` below `root`, walking in path order.
fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
  if name == MANIFEST_FILENAME {
    return None;
  }
  WalkDir::new(root)
    .sort_by_file_name()
    .into_iter()
    .filter_map(Result::ok)
    .find(|e| e.file_type().is_file() && e.file_name() == name)
    .map(|e| e.into_path())
}
