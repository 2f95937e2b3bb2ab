//! Implementation of the `kiln new` command.

use std::sync::Arc;

use anyhow::{Context, Result};

use kiln_lib::studio::{HostSandbox, SessionConfig, Studio};

use crate::output::{print_stat, print_success};

/// Create a fresh studio, replacing whatever the root held before.
///
/// The studio outlives this process; `kiln rm` tears it down.
pub fn cmd_new(config: &SessionConfig) -> Result<()> {
  let studio = Studio::create(config, Arc::new(HostSandbox)).context("Failed to create studio")?;

  print_success(&format!("Studio created at {}", studio.root().display()));
  print_stat("Type", studio.studio_type().as_str());
  let source = if config.mount_source {
    config.src_path.display().to_string()
  } else {
    "not mounted".to_string()
  };
  print_stat("Source", &source);

  Ok(())
}
