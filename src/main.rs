//! rpi4-build - Raspberry Pi 4 boot image builder.
//!
//! Builds a kernel, a Buildroot root filesystem and a bootable disk image
//! inside Docker, fixing common failures (memory, disk, network,
//! permissions, missing tools) and retrying.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;

use rpi4_builder::classify::PatternTable;
use rpi4_builder::commands::{self, build::BuildOptions, show::ShowTarget};
use rpi4_builder::config::Config;
use rpi4_builder::logging;
use rpi4_builder::steps::Variant;

#[derive(Parser)]
#[command(name = "rpi4-build")]
#[command(about = "Raspberry Pi 4 boot image builder")]
#[command(
    after_help = "QUICK START:\n  rpi4-build preflight  Check docker and build files\n  rpi4-build build      Build in the persistent container\n  rpi4-build ci         One-shot CI build\n  rpi4-build clean      Remove the persistent container"
)]
struct Cli {
    /// JSON file overriding the error patterns ({"disk": ["..."], ...})
    #[arg(long, global = true, env = "RPI4_ERROR_PATTERNS")]
    patterns: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build in the persistent container (kept between runs)
    Build {
        /// Remove the container when done instead of keeping it
        #[arg(long)]
        force_remove: bool,
    },

    /// CI build: fresh container, time limit, build-stats.json
    Ci,

    /// Run preflight checks
    Preflight {
        /// Check the CI build context instead of the interactive one
        #[arg(long)]
        ci: bool,
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowCommand,
    },

    /// Remove the persistent build container
    Clean,
}

#[derive(Subcommand)]
enum ShowCommand {
    /// Show configuration and error patterns
    Config,
    /// Show the persistent container's state
    Container,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let base_dir = std::env::current_dir().context("Failed to read current directory")?;
    let config = Config::load(&base_dir)?;

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("Failed to create output directory {}", config.output_dir.display())
    })?;

    let log_file = match &cli.command {
        Commands::Build { .. } => Some(config.output_dir.join(commands::build::LOG_FILE)),
        Commands::Ci => Some(config.output_dir.join(commands::ci::LOG_FILE)),
        _ => None,
    };
    let annotations = matches!(cli.command, Commands::Ci);
    logging::init(log_file.as_deref(), annotations)?;

    let patterns = PatternTable::load(cli.patterns.as_deref())?;

    match cli.command {
        Commands::Build { force_remove } => {
            commands::cmd_build(&config, &patterns, BuildOptions { force_remove })
        }
        Commands::Ci => commands::cmd_ci(&config, &patterns),
        Commands::Preflight { ci, strict } => {
            let variant = if ci { Variant::Ci } else { Variant::Interactive };
            commands::cmd_preflight(&config, variant, strict)?;
            Ok(true)
        }
        Commands::Show { what } => {
            let target = match what {
                ShowCommand::Config => ShowTarget::Config,
                ShowCommand::Container => ShowTarget::Container,
            };
            commands::cmd_show(target, &config, &patterns)?;
            Ok(true)
        }
        Commands::Clean => {
            commands::cmd_clean(&config)?;
            Ok(true)
        }
    }
}
