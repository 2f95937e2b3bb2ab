use std::path::PathBuf;

use crate::consts::{APP_NAME, ENV_CACHE, ENV_STORE};

/// Returns the root directory used when running as a privileged user.
#[cfg(windows)]
pub fn root_dir() -> PathBuf {
  let drive = std::env::var("SYSTEMDRIVE").unwrap_or_else(|_| "C:".to_string());
  PathBuf::from(format!("{drive}\\")).join(APP_NAME)
}

#[cfg(not(windows))]
pub fn root_dir() -> PathBuf {
  PathBuf::from("/").join(APP_NAME)
}

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  if let Ok(path) = std::env::var(ENV_CACHE) {
    return PathBuf::from(path);
  }
  std::env::var("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir())
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  if let Ok(path) = std::env::var(ENV_CACHE) {
    return PathBuf::from(path);
  }
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Returns the package store directory.
///
/// `KILN_STORE` wins; privileged users get the system-wide store, everyone
/// else a per-user store under the data directory.
pub fn store_dir() -> PathBuf {
  if let Ok(path) = std::env::var(ENV_STORE) {
    return PathBuf::from(path);
  }
  if super::is_elevated() {
    root_dir().join("store")
  } else {
    data_dir().join("store")
  }
}

/// Default parent directory for studio roots.
pub fn default_studios_home() -> PathBuf {
  if super::is_elevated() {
    root_dir().join("studios")
  } else {
    data_dir().join("studios")
  }
}
