//! Implementation of the `kiln enter` command.

use std::sync::Arc;

use anyhow::{Context, Result, bail};

use kiln_lib::studio::{HostSandbox, SessionConfig, Studio};

/// Open the studio (creating it if needed) and attach an interactive shell.
pub fn cmd_enter(config: &SessionConfig) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  rt.block_on(async {
    let mut studio = Studio::open(config, Arc::new(HostSandbox)).context("Failed to open studio")?;
    let handle = studio.enter().context("Failed to enter studio")?;
    let program = handle.program().to_string();
    let status = handle.wait().await.context("Studio shell failed")?;

    if !status.success() && status.code().is_none() {
      bail!("{program} was terminated: {status}");
    }
    Ok(())
  })
}
