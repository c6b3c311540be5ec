//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use async_trait::async_trait;
use fred::core::error::{FredError, FredResult};
use fred::core::runtime::NodeServices;
use fred::nameservice::{CoordinationStore, MemoryCoordinationStore, NameService};
use fred::peering::{MemoryNetwork, MessageType, PeerMessage, PeeringClient};
use fred::replication::{Address, KeygroupName, Node, NodeId};
use fred::storage::MemoryItemStore;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    write_config(
        r#"
[node]
id = "nodeA"
"#,
    )
}

/// Create a configuration for a node listening on an ephemeral local port.
pub fn create_local_config(id: &str, seed: bool, nameservice: &str) -> NamedTempFile {
    write_config(&format!(
        r#"
[node]
id = "{}"
host = "127.0.0.1"
peering_port = 5555
seed = {}

[peering]
bind = "127.0.0.1:0"
connect_timeout_ms = 500
request_timeout_ms = 1000

[nameservice]
mode = "{}"

[telemetry]
log_level = "debug"
"#,
        id, seed, nameservice
    ))
}

/// Write configuration text to a temp file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

pub fn kg(name: &str) -> KeygroupName {
    KeygroupName::new(name).unwrap()
}

pub fn nid(id: &str) -> NodeId {
    NodeId::new(id).unwrap()
}

/// A node at `localhost:port`.
pub fn local_node(id: &str, port: u16) -> Node {
    Node::parse(id, "localhost", port).unwrap()
}

// ============================================================================
// Recording transport
// ============================================================================

/// A send attempt seen by [`CountingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub endpoint: String,
    pub kind: MessageType,
}

/// Transport that records every attempt and fails for selected endpoints.
#[derive(Default)]
pub struct CountingTransport {
    attempts: Mutex<Vec<Attempt>>,
    failing: Mutex<HashSet<String>>,
}

impl CountingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every send to `node` fail.
    pub fn fail_for(&self, node: &Node) {
        self.failing.lock().insert(node.endpoint());
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.attempts().into_iter().map(|a| a.endpoint).collect()
    }

    pub fn attempts_to(&self, node: &Node) -> Vec<MessageType> {
        let endpoint = node.endpoint();
        self.attempts()
            .into_iter()
            .filter(|a| a.endpoint == endpoint)
            .map(|a| a.kind)
            .collect()
    }

    pub fn clear(&self) {
        self.attempts.lock().clear();
    }
}

#[async_trait]
impl PeeringClient for CountingTransport {
    async fn send(&self, address: &Address, port: u16, message: PeerMessage) -> FredResult<()> {
        let endpoint = address.with_port(port);
        self.attempts.lock().push(Attempt {
            endpoint: endpoint.clone(),
            kind: message.message_type(),
        });
        if self.failing.lock().contains(&endpoint) {
            return Err(FredError::transport(endpoint, "connection refused"));
        }
        Ok(())
    }
}

// ============================================================================
// In-memory clusters
// ============================================================================

/// One node attached to a [`MemoryNetwork`].
pub struct TestNode {
    pub node: Node,
    pub services: NodeServices,
}

impl TestNode {
    pub fn id(&self) -> NodeId {
        self.node.id.clone()
    }
}

/// Builds nodes that share a network and, optionally, a name service store.
pub struct TestCluster {
    pub network: MemoryNetwork,
    pub coordination: Option<Arc<MemoryCoordinationStore>>,
}

impl TestCluster {
    /// Cluster without a name service.
    pub fn new() -> Self {
        Self {
            network: MemoryNetwork::new(),
            coordination: None,
        }
    }

    /// Cluster whose nodes share one in-memory name service.
    pub fn with_nameservice() -> Self {
        Self {
            network: MemoryNetwork::new(),
            coordination: Some(Arc::new(MemoryCoordinationStore::new())),
        }
    }

    fn build(&self, node: &Node) -> NodeServices {
        let nameservice = self.coordination.as_ref().map(|store| {
            let store: Arc<dyn CoordinationStore> = store.clone();
            NameService::new(store, node.id.clone())
        });
        let services = NodeServices::build(
            node.port,
            Arc::new(MemoryItemStore::new()),
            Arc::new(self.network.clone()),
            nameservice,
        );
        self.network
            .register(&node.address, node.port, services.internal.clone());
        services
    }

    /// A seeded node.
    pub async fn seeded(&self, id: &str, port: u16) -> TestNode {
        let node = local_node(id, port);
        let services = self.build(&node);
        services.replication.seed(node.clone()).await.unwrap();
        TestNode { node, services }
    }

    /// A node that waits for an introduction to learn its identity.
    pub fn unseeded(&self, id: &str, port: u16) -> TestNode {
        let node = local_node(id, port);
        let services = self.build(&node);
        TestNode { node, services }
    }
}
