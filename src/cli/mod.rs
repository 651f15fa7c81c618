//! Command-line interface.
//!
//! Unified CLI for slate operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// Slate - tablet server for a distributed columnar store.
#[derive(Parser, Debug)]
#[command(name = "slate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Data directory, overriding the configured one.
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Collect the global flags into configuration overrides.
    pub fn overrides(&self) -> crate::core::config::ConfigOverrides {
        crate::core::config::ConfigOverrides {
            log_level: self.log_level.clone(),
            data_dir: self.data_dir.clone(),
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the slate tablet server.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Inspect on-disk tablet state.
    Inspect(commands::InspectArgs),
}
