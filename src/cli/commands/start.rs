//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// Start the node.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Override the peering bind address.
    #[arg(long)]
    pub bind: Option<String>,

    /// Override the node id.
    #[arg(long)]
    pub node_id: Option<String>,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` wins over the configured level.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Run the start command with the given config path and overrides.
pub async fn run_start_with_config(config_path: &PathBuf, overrides: ConfigOverrides) -> Result<()> {
    let mut config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    config.apply_overrides(&overrides);

    init_tracing(&config.telemetry.log_level);

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}

impl StartArgs {
    /// Converts the flags into config overrides.
    pub fn overrides(&self, log_level: Option<String>) -> ConfigOverrides {
        ConfigOverrides {
            log_level,
            peering_bind: self.bind.clone(),
            node_id: self.node_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_from_args() {
        let args = StartArgs {
            bind: Some("127.0.0.1:7000".into()),
            node_id: None,
        };
        let overrides = args.overrides(Some("debug".into()));
        assert_eq!(overrides.peering_bind.as_deref(), Some("127.0.0.1:7000"));
        assert_eq!(overrides.log_level.as_deref(), Some("debug"));
        assert!(overrides.node_id.is_none());
    }
}
