//! Slate - unified CLI entrypoint.
//!
//! Usage:
//!   slate start --config config/slate.toml
//!   slate config validate --config config/slate.toml
//!   slate inspect --data-dir data [--tablet-id ID]

use anyhow::Result;
use clap::Parser;
use slate::cli::commands::{run_config, run_inspect, run_start_with_config};
use slate::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/slate.toml"));
    let overrides = cli.overrides();

    match cli.command {
        Commands::Start(_args) => run_start_with_config(&config_path, &overrides).await,
        Commands::Config(args) => run_config(args),
        Commands::Inspect(args) => run_inspect(args),
    }
}
