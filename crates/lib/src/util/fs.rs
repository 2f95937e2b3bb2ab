//! Scoped filesystem helpers.
//!
//! Directory resets are modelled as one operation ("make this path an empty
//! directory") instead of ad hoc delete/create sequences at call sites.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Make `path` an empty directory, removing whatever was there before.
pub fn reset_dir(path: &Path) -> io::Result<()> {
  remove_path(path)?;
  fs::create_dir_all(path)
}

/// Remove a file, symlink or directory tree. Missing paths are not an error.
///
/// Symlinks are removed without following them.
pub fn remove_path(path: &Path) -> io::Result<()> {
  let meta = match fs::symlink_metadata(path) {
    Ok(meta) => meta,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(e),
  };

  let result = if meta.file_type().is_symlink() {
    remove_symlink(path)
  } else if meta.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  };

  match result {
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    other => other,
  }
}

#[cfg(unix)]
fn remove_symlink(path: &Path) -> io::Result<()> {
  fs::remove_file(path)
}

#[cfg(windows)]
fn remove_symlink(path: &Path) -> io::Result<()> {
  fs::remove_dir(path).or_else(|_| fs::remove_file(path))
}

/// Create a directory symlink at `link` pointing to `target`.
pub fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
  #[cfg(unix)]
  {
    std::os::unix::fs::symlink(target, link)
  }
  #[cfg(windows)]
  {
    std::os::windows::fs::symlink_dir(target, link)
  }
}

/// Recursively copy the contents of `src` into `dest`.
///
/// Symlinks are recreated, not followed. Permissions of regular files are
/// preserved by `fs::copy`.
pub fn copy_dir_all(src: &Path, dest: &Path) -> io::Result<()> {
  fs::create_dir_all(dest)?;

  for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    let target = dest.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      let link_target = fs::read_link(entry.path())?;
      #[cfg(unix)]
      std::os::unix::fs::symlink(&link_target, &target)?;
      #[cfg(windows)]
      {
        if entry.path().is_dir() {
          std::os::windows::fs::symlink_dir(&link_target, &target)?;
        } else {
          std::os::windows::fs::symlink_file(&link_target, &target)?;
        }
      }
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target)?;
    }
  }

  Ok(())
}
