//! Implementation of the `kiln run` command.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::warn;

use kiln_lib::studio::{HostSandbox, SessionConfig, Studio};

/// Run `command` in the studio and relay its output.
///
/// Ctrl-C kills the command's whole process group.
pub fn cmd_run(config: &SessionConfig, command: &[String]) -> Result<()> {
  let script = shell_join(command);
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  let output = rt.block_on(async {
    let mut studio = Studio::open(config, Arc::new(HostSandbox)).context("Failed to open studio")?;
    let canceller = studio.canceller();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling studio command");
        canceller.cancel();
      }
    });
    studio.run(&script).await.with_context(|| format!("Failed to run `{script}`"))
  })?;

  print!("{}", output.stdout);
  eprint!("{}", output.stderr);
  if !output.success() {
    bail!("`{script}` failed: {}", output.status);
  }
  Ok(())
}

/// Quote each word for `sh -c` unless it is plainly safe.
fn shell_join(words: &[String]) -> String {
  words.iter().map(|w| shell_quote(w)).collect::<Vec<_>>().join(" ")
}

fn shell_quote(word: &str) -> String {
  let safe = !word.is_empty()
    && word
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
  if safe {
    word.to_string()
  } else {
    format!("'{}'", word.replace('\'', r"'\''"))
  }
}
