//! Implementation of the `kiln rm` command.

use anyhow::{Context, Result};

use kiln_lib::studio::{HostSandbox, SessionConfig, destroy_root};

use crate::output::print_success;

pub fn cmd_rm(config: &SessionConfig) -> Result<()> {
  let root = &config.studio_root;
  destroy_root(root, &HostSandbox).with_context(|| format!("Failed to destroy studio {}", root.display()))?;
  print_success(&format!("Studio {} destroyed", root.display()));
  Ok(())
}
