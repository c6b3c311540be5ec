//! Main runtime orchestration.
//!
//! The runtime wires the node together and coordinates component lifecycle:
//! - Start order: storage → name service → replication → peering listener
//! - Shutdown order: peering listener → replication → name service → storage

use crate::core::config::Config;
use crate::data::DataService;
use crate::handler::{ExternalHandler, InternalHandler};
use crate::nameservice::{CoordinationStore, MemoryCoordinationStore, NameService};
use crate::peering::{MessageHandler, PeeringClient, PeeringServer, TcpPeeringClient};
use crate::replication::node::{Node, NodeId};
use crate::replication::registry::ReplicaRegistry;
use crate::replication::service::ReplicationService;
use crate::storage::{ItemStore, MemoryItemStore};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component is degraded but functional.
    Degraded,
    /// Component is not configured.
    Disabled,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Item storage health.
    pub storage: ComponentHealth,
    /// Name service health.
    pub nameservice: ComponentHealth,
    /// Replication service health (degraded while unseeded).
    pub replication: ComponentHealth,
    /// Peering listener health.
    pub peering: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            storage: ComponentHealth::Starting,
            nameservice: ComponentHealth::Starting,
            replication: ComponentHealth::Starting,
            peering: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        let usable = |h: ComponentHealth| {
            matches!(h, ComponentHealth::Healthy | ComponentHealth::Disabled)
        };
        self.storage == ComponentHealth::Healthy
            && usable(self.nameservice)
            && self.replication == ComponentHealth::Healthy
            && usable(self.peering)
    }

    /// Check if the runtime is alive (not failed).
    pub fn is_alive(&self) -> bool {
        ![
            self.storage,
            self.nameservice,
            self.replication,
            self.peering,
        ]
        .contains(&ComponentHealth::Failed)
    }
}

/// Services shared by the runtime once started.
#[derive(Clone)]
pub struct NodeServices {
    /// Replica registry.
    pub registry: Arc<ReplicaRegistry>,
    /// Data service.
    pub data: DataService,
    /// Replication service.
    pub replication: ReplicationService,
    /// Client-facing handler.
    pub external: ExternalHandler,
    /// Peer-facing handler.
    pub internal: Arc<InternalHandler>,
}

impl NodeServices {
    /// Wire services around a store, transport and optional name service.
    pub fn build(
        port: u16,
        store: Arc<dyn ItemStore>,
        client: Arc<dyn PeeringClient>,
        nameservice: Option<NameService>,
    ) -> Self {
        let registry = Arc::new(ReplicaRegistry::new(port));
        let data = DataService::new(store);
        let replication = ReplicationService::new(Arc::clone(&registry), client, nameservice);
        let external = ExternalHandler::new(data.clone(), replication.clone());
        let internal = Arc::new(InternalHandler::new(data.clone(), replication.clone()));

        Self {
            registry,
            data,
            replication,
            external,
            internal,
        }
    }
}

/// FReD runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Item store (created at start).
    store: Option<Arc<dyn ItemStore>>,

    /// Coordination store (created at start when configured).
    coordination: Option<Arc<dyn CoordinationStore>>,

    /// Wired services.
    services: Option<NodeServices>,

    /// Peering listener.
    server: Option<Arc<PeeringServer>>,

    /// Peering listener task handle.
    server_handle: Option<JoinHandle<crate::core::error::FredResult<()>>>,

    /// Runtime health status.
    health: RuntimeHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            store: None,
            coordination: None,
            services: None,
            server: None,
            server_handle: None,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wired services (after start).
    pub fn services(&self) -> Option<&NodeServices> {
        self.services.as_ref()
    }

    /// Address the peering listener is bound to (after start).
    pub fn peering_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().and_then(|s| s.local_addr())
    }

    /// Get the current health status.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Check if the runtime is alive.
    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Initialize and start all runtime components.
    ///
    /// Components are started in order:
    /// 1. Item storage
    /// 2. Name service
    /// 3. Replication (registry, handlers, self seed)
    /// 4. Peering listener
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(node = %self.config.node.id, "starting FReD runtime");

        self.init_storage().await?;
        self.init_nameservice().await?;
        self.init_replication().await?;
        self.start_peering().await?;

        self.running.store(true, Ordering::Release);
        tracing::info!(node = %self.config.node.id, "FReD runtime started");
        Ok(())
    }

    async fn init_storage(&mut self) -> Result<()> {
        tracing::debug!(adaptor = %self.config.storage.adaptor, "initializing item storage");

        let store: Arc<dyn ItemStore> = match self.config.storage.adaptor.as_str() {
            "memory" => Arc::new(MemoryItemStore::new()),
            other => anyhow::bail!("unsupported storage adaptor: {}", other),
        };

        self.store = Some(store);
        self.health.storage = ComponentHealth::Healthy;
        tracing::info!(adaptor = %self.config.storage.adaptor, "item storage initialized");
        Ok(())
    }

    async fn init_nameservice(&mut self) -> Result<()> {
        let ns = &self.config.nameservice;
        tracing::debug!(mode = %ns.mode, "initializing name service");

        let store: Option<Arc<dyn CoordinationStore>> = match ns.mode.as_str() {
            "none" => None,
            "memory" => Some(Arc::new(MemoryCoordinationStore::new())),
            #[cfg(feature = "etcd")]
            "etcd" => Some(Arc::new(
                crate::nameservice::EtcdGatewayStore::new(
                    ns.endpoints.clone(),
                    Duration::from_millis(ns.request_timeout_ms),
                )
                .context("failed to create etcd client")?,
            )),
            other => anyhow::bail!("unsupported name service mode: {}", other),
        };

        self.health.nameservice = if store.is_some() {
            ComponentHealth::Healthy
        } else {
            ComponentHealth::Disabled
        };
        self.coordination = store;

        tracing::info!(mode = %ns.mode, "name service initialized");
        Ok(())
    }

    async fn init_replication(&mut self) -> Result<()> {
        tracing::debug!("initializing replication");

        let store = self
            .store
            .clone()
            .context("storage must be initialized before replication")?;

        let node_id = NodeId::new(self.config.node.id.as_str())
            .map_err(|e| anyhow::anyhow!("invalid node id: {}", e))?;
        let nameservice = self
            .coordination
            .clone()
            .map(|store| NameService::new(store, node_id));

        let client: Arc<dyn PeeringClient> = Arc::new(TcpPeeringClient::new(
            self.config.peering.max_frame_bytes,
            self.config.peering.connect_timeout(),
            self.config.peering.request_timeout(),
        ));

        let services =
            NodeServices::build(self.config.node.peering_port, store, client, nameservice);

        if self.config.node.seed {
            let me = Node::parse(
                &self.config.node.id,
                &self.config.node.host,
                self.config.node.peering_port,
            )
            .map_err(|e| anyhow::anyhow!("invalid self node: {}", e))?;
            services
                .replication
                .seed(me)
                .await
                .map_err(|e| anyhow::anyhow!("failed to seed self: {}", e))?;
            self.health.replication = ComponentHealth::Healthy;
        } else {
            tracing::warn!("starting unseeded; waiting for an introduction");
            self.health.replication = ComponentHealth::Degraded;
        }

        self.services = Some(services);
        tracing::info!(seeded = self.config.node.seed, "replication initialized");
        Ok(())
    }

    async fn start_peering(&mut self) -> Result<()> {
        if !self.config.peering_enabled() {
            self.health.peering = ComponentHealth::Disabled;
            tracing::info!("peering listener disabled");
            return Ok(());
        }

        let services = self
            .services
            .as_ref()
            .context("replication must be initialized before peering")?;

        let bind_addr: SocketAddr = self
            .config
            .peering
            .bind
            .parse()
            .context("invalid peering bind address")?;

        let handler: Arc<dyn MessageHandler> = services.internal.clone();
        let server = Arc::new(PeeringServer::new(
            bind_addr,
            self.config.peering.max_frame_bytes,
            handler,
            self.shutdown_rx.clone(),
        ));

        let listener = server
            .bind()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start peering listener: {}", e))?;
        let handle = tokio::spawn(Arc::clone(&server).serve(listener));

        self.server = Some(server);
        self.server_handle = Some(handle);
        self.health.peering = ComponentHealth::Healthy;
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for shutdown signal.
    pub async fn wait_for_shutdown(&mut self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run the runtime until SIGINT or a shutdown request.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop all runtime components in reverse start order.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping FReD runtime");
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        self.stop_peering().await;

        self.health.replication = ComponentHealth::Stopping;
        self.services = None;
        self.health.replication = ComponentHealth::Stopped;

        self.health.nameservice = ComponentHealth::Stopping;
        self.coordination = None;
        self.health.nameservice = ComponentHealth::Stopped;

        self.health.storage = ComponentHealth::Stopping;
        self.store = None;
        self.health.storage = ComponentHealth::Stopped;

        tracing::info!("FReD runtime stopped");
        Ok(())
    }

    async fn stop_peering(&mut self) {
        self.health.peering = ComponentHealth::Stopping;

        if let Some(handle) = self.server_handle.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(Ok(()))) => tracing::info!("peering listener stopped"),
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "peering listener stopped with error"),
                Ok(Err(e)) => tracing::warn!(error = %e, "peering listener task panicked"),
                Err(_) => tracing::warn!("peering listener stop timed out"),
            }
        }
        self.server = None;
        self.health.peering = ComponentHealth::Stopped;
    }

    /// Start the runtime for tests (without the peering listener).
    pub async fn start_for_tests(&mut self) -> Result<()> {
        self.init_storage().await?;
        self.init_nameservice().await?;
        self.init_replication().await?;
        self.health.peering = ComponentHealth::Disabled;
        self.running.store(true, Ordering::Release);
        Ok(())
    }
}
