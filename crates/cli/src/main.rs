//! kiln: build packages from declarative plans inside isolated studios.

mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_lib::studio::{ConfigLayer, SessionConfig, StudioType, Verbosity};

use crate::output::{OutputFormat, print_error};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Build packages from plans inside isolated studios", long_about = None)]
struct Cli {
  /// Do not mount the source path into the studio
  #[arg(short = 'n', long = "no-src", global = true)]
  no_src: bool,

  /// Only print errors
  #[arg(short, long, global = true)]
  quiet: bool,

  /// Print debug output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Studio root directory
  #[arg(short = 'r', long = "root", global = true, value_name = "STUDIO_ROOT")]
  studio_root: Option<PathBuf>,

  /// Source path mounted into the studio (default: current directory)
  #[arg(short = 's', long = "src", global = true, value_name = "SRC_PATH")]
  src_path: Option<PathBuf>,

  /// Studio type: minimal, slim, baseline, full or bootstrap
  #[arg(short = 't', long = "type", global = true, value_name = "STUDIO_TYPE")]
  studio_type: Option<StudioType>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Create a fresh studio
  New,

  /// Enter an interactive shell in the studio
  Enter,

  /// Run a command in the studio
  Run {
    /// Command and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
  },

  /// Build a plan and install the result into the store
  Build {
    /// Plan directory or plan.toml (default: current directory)
    #[arg(default_value = ".")]
    plan: PathBuf,

    /// Directory of plans used to resolve dependencies
    #[arg(long, value_name = "DIR")]
    plans: Option<PathBuf>,

    /// Run the check stage
    #[arg(long)]
    check: bool,

    /// Build dependencies that are not installed yet
    #[arg(long)]
    with_deps: bool,

    /// Keep the studio after the build
    #[arg(long)]
    keep_studio: bool,

    /// Release stamp to use instead of the current time
    #[arg(long, value_name = "REL")]
    release: Option<String>,

    /// Binary to extract after install (repeatable)
    #[arg(long, value_name = "NAME")]
    extract: Vec<String>,

    /// Extraction destination (default: <SRC_PATH>/results)
    #[arg(long, value_name = "DIR")]
    extract_to: Option<PathBuf>,

    /// Package store directory
    #[arg(long, value_name = "DIR")]
    store: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
  },

  /// Destroy the studio
  Rm,

  /// Print the version
  Version,
}

impl Cli {
  fn config_layer(&self) -> Result<ConfigLayer> {
    Ok(ConfigLayer {
      mount_source: self.no_src.then_some(false),
      src_path: self.src_path.clone(),
      studio_root: self.studio_root.clone(),
      studio_type: self.studio_type,
      studios_home: None,
      verbosity: Verbosity::from_toggles(self.quiet, self.verbose, "flags")?,
      store_root: None,
      cache_dir: None,
    })
  }
}

fn init_tracing(verbosity: Verbosity) {
  let level = match verbosity {
    Verbosity::Quiet => "error",
    Verbosity::Normal => "info",
    Verbosity::Verbose => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

/// Resolve the session configuration and start logging at its verbosity.
fn session(layer: ConfigLayer) -> Result<SessionConfig> {
  let config = SessionConfig::from_process(layer).context("Failed to resolve studio configuration")?;
  init_tracing(config.verbosity);
  Ok(config)
}

fn run(cli: Cli) -> Result<()> {
  let layer = cli.config_layer()?;

  match cli.command {
    Commands::Version => {
      cmd::cmd_version();
      Ok(())
    }
    Commands::New => cmd::cmd_new(&session(layer)?),
    Commands::Enter => cmd::cmd_enter(&session(layer)?),
    Commands::Run { command } => cmd::cmd_run(&session(layer)?, &command),
    Commands::Build {
      plan,
      plans,
      check,
      with_deps,
      keep_studio,
      release,
      extract,
      extract_to,
      store,
      output,
    } => cmd::cmd_build(
      &session(layer)?,
      cmd::BuildArgs {
        plan,
        plans,
        check,
        with_deps,
        keep_studio,
        release,
        extract,
        extract_to,
        store,
        output,
      },
    ),
    Commands::Rm => cmd::cmd_rm(&session(layer)?),
  }
}

fn main() {
  let cli = Cli::parse();
  if let Err(e) = run(cli) {
    print_error(&format!("{e:#}"));
    std::process::exit(1);
  }
}
