//! # pairbench
//!
//! Command-line driver for paired server/client network test campaigns.
//!
//! ## Commands
//!
//! - `run`: Run every parameter set until its quota is met or attempts run out
//! - `validate`: Check a campaign file and print the commands it would run
//! - `reap`: Kill leftover workloads on both targets
//!
//! ## Example
//!
//! ```bash
//! # Dry-check the matrix
//! pairbench validate --config campaign.toml
//!
//! # Run it, writing results under ./results
//! pairbench run --config campaign.toml
//!
//! # Clean up after an interrupted campaign
//! pairbench reap --config campaign.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use pairbench_core::Config;

mod commands;
mod logging;

use commands::{reap, run, validate};

/// Command-line driver for pairbench test campaigns.
#[derive(Parser, Debug)]
#[command(name = "pairbench")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Campaign file
    #[arg(long, short, global = true, default_value = "campaign.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the campaign
    Run {
        /// Results directory (default: from the campaign file)
        #[arg(long)]
        results: Option<PathBuf>,

        /// Number of parameter sets run at once
        #[arg(long)]
        workers: Option<usize>,

        /// Print the campaign result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the campaign file and print the rendered commands
    Validate,

    /// Kill leftover workloads on both targets
    Reap,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            results,
            workers,
            json,
        } => {
            let passed = run::run(config, results, workers, json).await?;
            if !passed {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Validate => {
            validate::run(&config);
        }
        Commands::Reap => {
            reap::run(&config).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}
