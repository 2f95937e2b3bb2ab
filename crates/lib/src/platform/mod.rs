//! Host platform queries: well-known directories and privilege detection.

pub mod paths;

/// Returns true when the process runs with root privileges.
#[cfg(unix)]
pub fn is_elevated() -> bool {
  rustix::process::geteuid().is_root()
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
  false
}
