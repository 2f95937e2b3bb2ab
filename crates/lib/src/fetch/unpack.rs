//! Unpacking fetched sources.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use super::FetchError;

/// Unpack `archive` into `dest`.
///
/// `.tar.gz`/`.tgz` and `.tar` are extracted; any other file is copied into
/// `dest` unchanged.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), FetchError> {
  std::fs::create_dir_all(dest).map_err(|source| FetchError::Io {
    path: dest.to_path_buf(),
    source,
  })?;

  let name = archive
    .file_name()
    .map(|n| n.to_string_lossy().to_ascii_lowercase())
    .unwrap_or_default();
  let unpack_failed = |e: std::io::Error| FetchError::Unpack {
    archive: archive.to_path_buf(),
    message: e.to_string(),
  };

  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    let file = File::open(archive).map_err(unpack_failed)?;
    tar::Archive::new(GzDecoder::new(file)).unpack(dest).map_err(unpack_failed)?;
  } else if name.ends_with(".tar") {
    let file = File::open(archive).map_err(unpack_failed)?;
    tar::Archive::new(file).unpack(dest).map_err(unpack_failed)?;
  } else {
    let target: PathBuf = dest.join(archive.file_name().unwrap_or_default());
    std::fs::copy(archive, &target).map_err(unpack_failed)?;
  }

  debug!(archive = %archive.display(), dest = %dest.display(), "unpacked source");
  Ok(())
}
