//! Config command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/fred.toml")]
        config: PathBuf,
    },
    /// Print configuration with defaults filled in.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/fred.toml")]
        config: PathBuf,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Generate a configuration template.
    Generate {
        /// Output file path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config, format } => show_config(&config, &format),
        ConfigCommand::Generate { output } => generate_config(output.as_deref()),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    let config = Config::from_file(path)?;

    println!("✓ Config file is valid");
    if config.nameservice.mode == "none" {
        println!("  ⚠ Warning: no name service; membership is local only");
    }
    if !config.peering_enabled() {
        println!("  ⚠ Warning: peering listener disabled; peers cannot reach this node");
    }
    if !config.node.seed {
        println!("  ⚠ Warning: node starts unseeded and waits for an introduction");
    }
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    let config = Config::from_file(path)?;
    let rendered = render_config(&config, format)?;
    println!("{}", rendered);
    Ok(())
}

fn render_config(config: &Config, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(config).context("failed to render JSON"),
        _ => toml::to_string_pretty(config).context("failed to render TOML"),
    }
}

fn generate_config(output: Option<&Path>) -> Result<()> {
    let template = config_template();
    match output {
        Some(path) => {
            std::fs::write(path, template)
                .with_context(|| format!("failed to write {:?}", path))?;
            println!("Generated config template: {:?}", path);
        }
        None => println!("{}", template),
    }
    Ok(())
}

fn config_template() -> &'static str {
    r#"# FReD node configuration

[node]
id = "nodeA"
host = "localhost"
peering_port = 5555
seed = true

[peering]
bind = "0.0.0.0:5555"
connect_timeout_ms = 2000
request_timeout_ms = 5000
max_frame_bytes = 4194304

[nameservice]
# none | memory | etcd
mode = "none"
endpoints = []
request_timeout_ms = 3000

[storage]
adaptor = "memory"

[telemetry]
log_level = "info"
"#
}
