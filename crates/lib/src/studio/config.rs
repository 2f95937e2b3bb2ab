//! Session configuration.
//!
//! A `SessionConfig` is built once per invocation by layering built-in
//! defaults, a snapshot of the process environment and explicit flags, in
//! that order of increasing precedence. It is immutable afterwards and passed
//! by reference; nothing downstream reads the environment again.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{
  ENV_CACHE, ENV_NO_SRC_PATH, ENV_QUIET, ENV_SRC_PATH, ENV_STORE, ENV_STUDIO_ROOT, ENV_STUDIO_TYPE, ENV_STUDIOS_HOME,
  ENV_VERBOSE, SESSION_ENV_VARS,
};
use crate::platform::paths::{cache_dir, default_studios_home, store_dir};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid boolean for {var}: '{value}' (expected 1/0, true/false, yes/no, on/off)")]
  InvalidBool { var: String, value: String },

  #[error("unknown studio type '{0}' (expected one of: baseline, full, slim, minimal, bootstrap)")]
  InvalidStudioType(String),

  #[error("quiet and verbose are both set in {0}")]
  ConflictingVerbosity(&'static str),

  #[error("cannot determine current directory: {0}")]
  CurrentDir(#[source] std::io::Error),
}

/// The kind of studio to provision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudioType {
  Baseline,
  #[default]
  Full,
  Slim,
  Minimal,
  /// Staged toolchain builds: a minimal dependency set builds the toolchain
  /// that later full builds use.
  Bootstrap,
}

impl StudioType {
  pub const ALL: [StudioType; 5] = [
    StudioType::Baseline,
    StudioType::Full,
    StudioType::Slim,
    StudioType::Minimal,
    StudioType::Bootstrap,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      StudioType::Baseline => "baseline",
      StudioType::Full => "full",
      StudioType::Slim => "slim",
      StudioType::Minimal => "minimal",
      StudioType::Bootstrap => "bootstrap",
    }
  }

  /// Directories created inside a fresh studio root.
  pub fn skeleton(&self) -> &'static [&'static str] {
    match self {
      StudioType::Minimal => &["tmp", "cache", "out"],
      StudioType::Slim => &["tmp", "cache", "out", "bin", "etc"],
      StudioType::Baseline | StudioType::Full => &["tmp", "cache", "out", "bin", "etc", "var"],
      StudioType::Bootstrap => &["tmp", "cache", "out", "tools"],
    }
  }

  /// Whether commands may fall back to the host's system tool directories
  /// after the resolved dependencies. Minimal studios see only their deps.
  pub fn inherits_host_tools(&self) -> bool {
    !matches!(self, StudioType::Minimal)
  }
}

impl fmt::Display for StudioType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for StudioType {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lowered = s.trim().to_ascii_lowercase();
    StudioType::ALL
      .into_iter()
      .find(|t| t.as_str() == lowered)
      .ok_or_else(|| ConfigError::InvalidStudioType(s.to_string()))
  }
}

/// How chatty studio commands are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
  Quiet,
  #[default]
  Normal,
  Verbose,
}

impl Verbosity {
  /// Combine a quiet and a verbose toggle from the same layer.
  pub fn from_toggles(quiet: bool, verbose: bool, layer: &'static str) -> Result<Option<Self>, ConfigError> {
    match (quiet, verbose) {
      (true, true) => Err(ConfigError::ConflictingVerbosity(layer)),
      (true, false) => Ok(Some(Verbosity::Quiet)),
      (false, true) => Ok(Some(Verbosity::Verbose)),
      (false, false) => Ok(None),
    }
  }
}

/// Snapshot of the process environment variables a session reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot(BTreeMap<String, String>);

impl EnvSnapshot {
  /// Read the recognized variables from the current process environment.
  pub fn capture() -> Self {
    Self(
      SESSION_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok().map(|value| (var.to_string(), value)))
        .collect(),
    )
  }

  pub fn from_pairs<I, K, V>(pairs: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }

  pub fn get(&self, var: &str) -> Option<&str> {
    self.0.get(var).map(String::as_str).filter(|v| !v.is_empty())
  }

  fn get_bool(&self, var: &str) -> Result<Option<bool>, ConfigError> {
    self.get(var).map(|value| parse_bool(var, value)).transpose()
  }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(ConfigError::InvalidBool {
      var: var.to_string(),
      value: value.to_string(),
    }),
  }
}

/// One configuration source. Unset fields defer to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
  pub mount_source: Option<bool>,
  pub src_path: Option<PathBuf>,
  pub studio_root: Option<PathBuf>,
  pub studio_type: Option<StudioType>,
  pub studios_home: Option<PathBuf>,
  pub verbosity: Option<Verbosity>,
  pub store_root: Option<PathBuf>,
  pub cache_dir: Option<PathBuf>,
}

impl ConfigLayer {
  pub fn from_env(env: &EnvSnapshot) -> Result<Self, ConfigError> {
    let quiet = env.get_bool(ENV_QUIET)?.unwrap_or(false);
    let verbose = env.get_bool(ENV_VERBOSE)?.unwrap_or(false);

    Ok(Self {
      mount_source: env.get_bool(ENV_NO_SRC_PATH)?.map(|suppress| !suppress),
      src_path: env.get(ENV_SRC_PATH).map(PathBuf::from),
      studio_root: env.get(ENV_STUDIO_ROOT).map(PathBuf::from),
      studio_type: env.get(ENV_STUDIO_TYPE).map(str::parse).transpose()?,
      studios_home: env.get(ENV_STUDIOS_HOME).map(PathBuf::from),
      verbosity: Verbosity::from_toggles(quiet, verbose, "environment")?,
      store_root: env.get(ENV_STORE).map(PathBuf::from),
      cache_dir: env.get(ENV_CACHE).map(PathBuf::from),
    })
  }

  /// Fields set in `higher` replace the ones in `self`.
  pub fn overlay(self, higher: ConfigLayer) -> ConfigLayer {
    ConfigLayer {
      mount_source: higher.mount_source.or(self.mount_source),
      src_path: higher.src_path.or(self.src_path),
      studio_root: higher.studio_root.or(self.studio_root),
      studio_type: higher.studio_type.or(self.studio_type),
      studios_home: higher.studios_home.or(self.studios_home),
      verbosity: higher.verbosity.or(self.verbosity),
      store_root: higher.store_root.or(self.store_root),
      cache_dir: higher.cache_dir.or(self.cache_dir),
    }
  }
}

/// Built-in defaults that depend on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDefaults {
  pub src_path: PathBuf,
  pub studios_home: PathBuf,
  pub store_root: PathBuf,
  pub cache_dir: PathBuf,
}

impl ConfigDefaults {
  pub fn detect() -> Result<Self, ConfigError> {
    Ok(Self {
      src_path: std::env::current_dir().map_err(ConfigError::CurrentDir)?,
      studios_home: default_studios_home(),
      store_root: store_dir(),
      cache_dir: cache_dir(),
    })
  }
}

/// Immutable configuration of one studio session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
  pub mount_source: bool,
  pub src_path: PathBuf,
  pub studio_root: PathBuf,
  pub studio_type: StudioType,
  pub studios_home: PathBuf,
  pub verbosity: Verbosity,
  /// Package store used by builds.
  pub store_root: PathBuf,
  /// Where fetched source archives are cached across studios.
  pub source_cache: PathBuf,
}

impl SessionConfig {
  /// Merge `defaults < env < flags`.
  pub fn resolve(defaults: ConfigDefaults, env: &EnvSnapshot, flags: ConfigLayer) -> Result<Self, ConfigError> {
    let merged = ConfigLayer::from_env(env)?.overlay(flags);

    let src_path = merged.src_path.unwrap_or(defaults.src_path);
    let studios_home = merged.studios_home.unwrap_or(defaults.studios_home);
    let studio_root = merged
      .studio_root
      .unwrap_or_else(|| studios_home.join(studio_dir_name(&src_path)));

    Ok(Self {
      mount_source: merged.mount_source.unwrap_or(true),
      src_path,
      studio_root,
      studio_type: merged.studio_type.unwrap_or_default(),
      studios_home,
      verbosity: merged.verbosity.unwrap_or_default(),
      store_root: merged.store_root.unwrap_or(defaults.store_root),
      source_cache: merged.cache_dir.unwrap_or(defaults.cache_dir).join("src"),
    })
  }

  /// Resolve against the live process environment and host defaults.
  pub fn from_process(flags: ConfigLayer) -> Result<Self, ConfigError> {
    Self::resolve(ConfigDefaults::detect()?, &EnvSnapshot::capture(), flags)
  }

  /// A config rooted at `root` with every other field at its default. The
  /// store and source cache sit beside the studios home.
  pub fn for_root(root: &Path, src_path: &Path) -> Self {
    let studios_home = root.parent().map(Path::to_path_buf).unwrap_or_default();
    Self {
      mount_source: true,
      src_path: src_path.to_path_buf(),
      studio_root: root.to_path_buf(),
      studio_type: StudioType::default(),
      store_root: studios_home.with_file_name("store"),
      source_cache: studios_home.with_file_name("sources"),
      studios_home,
      verbosity: Verbosity::default(),
    }
  }

  pub fn with_studio_type(mut self, studio_type: StudioType) -> Self {
    self.studio_type = studio_type;
    self
  }

  pub fn with_studio_root(mut self, root: &Path) -> Self {
    self.studio_root = root.to_path_buf();
    self
  }

  pub fn without_source_mount(mut self) -> Self {
    self.mount_source = false;
    self
  }
}

/// Derive a studio directory name from a source path.
///
/// `/` becomes `root`; otherwise the leading slash is dropped, separators
/// become `--` and spaces become `-`.
pub fn studio_dir_name(src_path: &Path) -> String {
  let raw = src_path.to_string_lossy().replace('\\', "/");
  if raw == "/" {
    return "root".to_string();
  }
  raw
    .trim_start_matches('/')
    .replace(':', "")
    .replace('/', "--")
    .replace(' ', "-")
}
