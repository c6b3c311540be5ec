//! Command-line interface.
//!
//! Unified CLI for FReD node operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// FReD - keygroup replication node.
#[derive(Parser, Debug)]
#[command(name = "fred")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Start(commands::StartArgs),
    /// Show the identity and settings a node would start with.
    Status(commands::StatusArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}
