//! Names and well-known values shared across the crate.

pub const APP_NAME: &str = "kiln";

/// Store location override.
pub const ENV_STORE: &str = "KILN_STORE";

/// Source cache location override.
pub const ENV_CACHE: &str = "KILN_CACHE";

pub const ENV_NO_SRC_PATH: &str = "KILN_NO_SRC_PATH";
pub const ENV_QUIET: &str = "KILN_QUIET";
pub const ENV_SRC_PATH: &str = "KILN_SRC_PATH";
pub const ENV_STUDIO_ROOT: &str = "KILN_STUDIO_ROOT";
pub const ENV_STUDIO_TYPE: &str = "KILN_STUDIO_TYPE";
pub const ENV_STUDIOS_HOME: &str = "KILN_STUDIOS_HOME";
pub const ENV_VERBOSE: &str = "KILN_VERBOSE";

/// Every environment variable read into a `SessionConfig`.
pub const SESSION_ENV_VARS: &[&str] = &[
  ENV_CACHE,
  ENV_NO_SRC_PATH,
  ENV_QUIET,
  ENV_SRC_PATH,
  ENV_STUDIO_ROOT,
  ENV_STUDIO_TYPE,
  ENV_STORE,
  ENV_STUDIOS_HOME,
  ENV_VERBOSE,
];

/// File name of a plan inside its plan directory.
pub const PLAN_FILENAME: &str = "plan.toml";

/// Metadata file written last when an artifact is installed.
pub const MANIFEST_FILENAME: &str = "MANIFEST.json";

/// Reproducible timestamp for build commands (1980-01-01T00:00:00Z).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
