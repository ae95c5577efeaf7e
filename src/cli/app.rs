//! Main CLI application structure

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::output::{Output, OutputFormat};
use super::{build_cmd, plan_cmd, plugin_cmd};

#[derive(Parser)]
#[command(name = "alter")]
#[command(author, version, about = "Plugin-driven build and preprocessing tool")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Configuration file (.yaml or .toml)
    #[arg(long, short = 'c', global = true, env = "ALTER_CONF", default_value = "alter.yaml")]
    pub config: PathBuf,

    /// Defaults to `build`
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collect sources into a sandbox and run every stage
    Build {
        /// Keep the sandbox directory after the build
        #[arg(long)]
        keep: bool,
    },

    /// Show how a stage's requirements resolve, without running anything
    Plan {
        /// Stage name (defaults to preprocess)
        stage: Option<String>,
    },

    /// List user and builtin plugins
    Plugins,
}

/// Installs the stderr log subscriber. `RUST_LOG` overrides the level.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let output = Output::new(cli.format);

    tracing::debug!("alter starting with configuration {}", cli.config.display());

    match cli.command.unwrap_or(Commands::Build { keep: false }) {
        Commands::Build { keep } => build_cmd::run(&cli.config, keep, &output)?,
        Commands::Plan { stage } => plan_cmd::run(&cli.config, stage.as_deref(), &output)?,
        Commands::Plugins => plugin_cmd::run(&cli.config, &output)?,
    }

    Ok(())
}
