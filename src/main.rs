//! FReD - unified CLI entrypoint.
//!
//! Usage:
//!   fred start --config config/fred.toml
//!   fred status --config config/fred.toml
//!   fred config validate --config config/fred.toml

use anyhow::Result;
use clap::Parser;
use fred::cli::commands::{run_config, run_start_with_config, run_status};
use fred::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/fred.toml"));

    match cli.command {
        Commands::Start(args) => {
            let overrides = args.overrides(cli.log_level);
            run_start_with_config(&config_path, overrides).await
        }
        Commands::Status(args) => run_status(&config_path, args),
        Commands::Config(args) => run_config(args),
    }
}
