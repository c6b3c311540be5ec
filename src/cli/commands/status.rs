//! Status command implementation.
//!
//! Reports the identity and settings a node would start with. There is no
//! admin endpoint to query, so this reads the configuration only.

use crate::core::config::Config;
use crate::replication::node::Node;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Show the node identity and effective configuration.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output format (text, json).
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Run the status command.
pub fn run_status(config_path: &Path, args: StatusArgs) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;

    match args.format.as_str() {
        "json" => println!("{}", status_json(&config)?),
        _ => print!("{}", status_text(&config)?),
    }
    Ok(())
}

fn self_node(config: &Config) -> Result<Node> {
    Node::parse(&config.node.id, &config.node.host, config.node.peering_port)
        .map_err(|e| anyhow::anyhow!("invalid node identity: {}", e))
}

fn status_text(config: &Config) -> Result<String> {
    let node = self_node(config)?;
    let mut out = String::new();

    out.push_str("FReD Node Status\n");
    out.push_str("================\n");
    out.push_str(&format!("Version:        {}\n\n", env!("CARGO_PKG_VERSION")));

    out.push_str("Identity:\n");
    out.push_str(&format!("  Node ID:      {}\n", node.id));
    out.push_str(&format!("  Endpoint:     {}\n", node.endpoint()));
    out.push_str(&format!("  Seeded:       {}\n\n", config.node.seed));

    out.push_str("Peering:\n");
    if config.peering_enabled() {
        out.push_str(&format!("  Bind:         {}\n", config.peering.bind));
    } else {
        out.push_str("  Bind:         disabled\n");
    }
    out.push_str(&format!(
        "  Timeouts:     connect {}ms, request {}ms\n\n",
        config.peering.connect_timeout_ms, config.peering.request_timeout_ms
    ));

    out.push_str("Name service:\n");
    out.push_str(&format!("  Mode:         {}\n", config.nameservice.mode));
    if !config.nameservice.endpoints.is_empty() {
        out.push_str(&format!(
            "  Endpoints:    {}\n",
            config.nameservice.endpoints.join(", ")
        ));
    }
    out.push('\n');

    out.push_str(&format!("Storage:        {}\n", config.storage.adaptor));
    out.push_str(&format!("Log level:      {}\n", config.telemetry.log_level));
    Ok(out)
}

fn status_json(config: &Config) -> Result<String> {
    let node = self_node(config)?;
    let status = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "node": {
            "id": node.id,
            "address": node.address,
            "port": node.port,
            "seed": config.node.seed,
        },
        "peering": {
            "enabled": config.peering_enabled(),
            "bind": config.peering.bind,
        },
        "nameservice": {
            "mode": config.nameservice.mode,
            "endpoints": config.nameservice.endpoints,
        },
        "storage": config.storage.adaptor,
    });
    serde_json::to_string_pretty(&status).context("failed to render status")
}
