//! Config command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate a configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/slate.toml")]
        config: PathBuf,
    },
    /// Print configuration with defaults applied.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/slate.toml")]
        config: PathBuf,
    },
}

/// Run a config subcommand.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => {
            Config::from_file(&config)
                .with_context(|| format!("configuration {} is invalid", config.display()))?;
            println!("configuration {} is valid", config.display());
            Ok(())
        }
        ConfigCommand::Show { config } => {
            let config = Config::from_file(&config)?;
            let rendered =
                toml::to_string_pretty(&config).context("failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
    }
}
