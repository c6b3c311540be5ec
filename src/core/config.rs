//! Configuration parsing and validation.
//!
//! FReD node configuration is loaded from TOML files with CLI overrides.
//! Every section except `[node]` is optional and falls back to defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level FReD configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local node identity.
    pub node: NodeConfig,

    /// Peering listener and client settings.
    #[serde(default)]
    pub peering: PeeringConfig,

    /// Membership authority (name service) settings.
    #[serde(default)]
    pub nameservice: NameServiceConfig,

    /// Item storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Telemetry and observability configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Local node identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node id announced to peers.
    pub id: String,

    /// Host peers use to reach this node (IP literal or hostname).
    #[serde(default = "default_host")]
    pub host: String,

    /// Port peers use to reach this node.
    #[serde(default = "default_peering_port")]
    pub peering_port: u16,

    /// Seed the self identity at startup.
    #[serde(default = "default_seed")]
    pub seed: bool,
}

/// Peering listener and client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeeringConfig {
    /// Listener bind address. Empty disables the listener.
    #[serde(default = "default_peering_bind")]
    pub bind: String,

    /// Outbound connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Outbound request timeout (send + ack) in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Largest accepted frame body in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            bind: default_peering_bind(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl PeeringConfig {
    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Name service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameServiceConfig {
    /// Mode: "none", "memory" or "etcd".
    #[serde(default = "default_nameservice_mode")]
    pub mode: String,

    /// etcd v3 JSON gateway endpoints (e.g. "http://127.0.0.1:2379").
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_nameservice_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for NameServiceConfig {
    fn default() -> Self {
        Self {
            mode: default_nameservice_mode(),
            endpoints: Vec::new(),
            request_timeout_ms: default_nameservice_timeout_ms(),
        }
    }
}

/// Item storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage adaptor. Only "memory" ships with this crate.
    #[serde(default = "default_storage_adaptor")]
    pub adaptor: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            adaptor: default_storage_adaptor(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_host() -> String {
    "localhost".to_string()
}

fn default_peering_port() -> u16 {
    5555
}

fn default_seed() -> bool {
    true
}

fn default_peering_bind() -> String {
    "0.0.0.0:5555".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_max_frame_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_nameservice_mode() -> String {
    "none".to_string()
}

fn default_nameservice_timeout_ms() -> u64 {
    3_000
}

fn default_storage_adaptor() -> String {
    "memory".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref bind) = overrides.peering_bind {
            self.peering.bind = bind.clone();
        }
        if let Some(ref node_id) = overrides.node_id {
            self.node.id = node_id.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_node()?;
        self.validate_peering()?;
        self.validate_nameservice()?;
        self.validate_storage()?;
        self.validate_telemetry()?;
        Ok(())
    }

    /// Whether the peering listener is enabled.
    pub fn peering_enabled(&self) -> bool {
        !self.peering.bind.is_empty()
    }

    fn validate_node(&self) -> Result<()> {
        crate::replication::node::NodeId::new(self.node.id.as_str())
            .map_err(|e| anyhow::anyhow!("node.id: {}", e))?;
        crate::replication::node::Address::parse(&self.node.host)
            .map_err(|e| anyhow::anyhow!("node.host: {}", e))?;
        if self.node.peering_port == 0 {
            anyhow::bail!("node.peering_port must be > 0");
        }
        Ok(())
    }

    fn validate_peering(&self) -> Result<()> {
        if self.peering_enabled() {
            self.peering
                .bind
                .parse::<SocketAddr>()
                .with_context(|| format!("peering.bind is not a socket address: {}", self.peering.bind))?;
        }

        if self.peering.connect_timeout_ms == 0 {
            anyhow::bail!("peering.connect_timeout_ms must be > 0");
        }
        if self.peering.request_timeout_ms == 0 {
            anyhow::bail!("peering.request_timeout_ms must be > 0");
        }
        if self.peering.max_frame_bytes < 1024 {
            anyhow::bail!(
                "peering.max_frame_bytes must be at least 1024, got: {}",
                self.peering.max_frame_bytes
            );
        }
        Ok(())
    }

    fn validate_nameservice(&self) -> Result<()> {
        let valid_modes = ["none", "memory", "etcd"];
        if !valid_modes.contains(&self.nameservice.mode.as_str()) {
            anyhow::bail!(
                "nameservice.mode must be one of {:?}, got: {}",
                valid_modes,
                self.nameservice.mode
            );
        }

        if self.nameservice.mode == "etcd" {
            if self.nameservice.endpoints.is_empty() {
                anyhow::bail!("nameservice.endpoints required for etcd mode");
            }
            if cfg!(not(feature = "etcd")) {
                anyhow::bail!("nameservice.mode = 'etcd' requires the 'etcd' feature");
            }
        }

        if self.nameservice.request_timeout_ms == 0 {
            anyhow::bail!("nameservice.request_timeout_ms must be > 0");
        }
        Ok(())
    }

    fn validate_storage(&self) -> Result<()> {
        if self.storage.adaptor != "memory" {
            anyhow::bail!(
                "storage.adaptor must be 'memory', got: {}",
                self.storage.adaptor
            );
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override peering bind address.
    pub peering_bind: Option<String>,
    /// Override node id.
    pub node_id: Option<String>,
}
