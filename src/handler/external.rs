//! Client-facing operations.
//!
//! Each operation validates against the local registry, applies the change
//! locally and then relays it through the replication service.

use crate::core::error::{FredError, FredResult};
use crate::data::DataService;
use crate::replication::keygroup::{Item, KeygroupName};
use crate::replication::node::{Node, NodeId};
use crate::replication::service::ReplicationService;
use crate::replication::vector::VectorClock;

/// Handler for client requests.
#[derive(Clone)]
pub struct ExternalHandler {
    data: DataService,
    replication: ReplicationService,
}

impl ExternalHandler {
    /// Create a handler.
    pub fn new(data: DataService, replication: ReplicationService) -> Self {
        Self { data, replication }
    }

    /// Replication service.
    pub fn replication(&self) -> &ReplicationService {
        &self.replication
    }

    fn self_id(&self) -> FredResult<NodeId> {
        self.replication
            .registry()
            .self_id()
            .ok_or_else(|| FredError::not_ready("self is not seeded"))
    }

    fn require_keygroup(&self, kg: &KeygroupName) -> FredResult<()> {
        if self.replication.registry().exists_keygroup(kg) {
            Ok(())
        } else {
            Err(FredError::not_found(format!("keygroup {} not found", kg)))
        }
    }

    /// Create a keygroup with this node as its first replica.
    pub async fn create_keygroup(&self, kg: &KeygroupName) -> FredResult<()> {
        if let Some(ns) = self.replication.nameservice() {
            ns.create_keygroup(kg).await?;
        }

        self.replication.create_keygroup(kg)?;
        self.data.create_keygroup(kg)?;

        if let Some(me) = self.replication.registry().self_id() {
            match self.replication.add_replica(kg, &me, false).await {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!(keygroup = %kg, "keygroup created");
        Ok(())
    }

    /// Delete a keygroup here and on every other replica.
    pub async fn delete_keygroup(&self, kg: &KeygroupName) -> FredResult<()> {
        self.require_keygroup(kg)?;
        match self.data.delete_keygroup(kg) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.replication.relay_delete_keygroup(kg).await
    }

    /// Every live version of an item.
    pub fn read(&self, kg: &KeygroupName, id: &str) -> FredResult<Vec<Item>> {
        self.require_keygroup(kg)?;
        self.data.read(kg, id)
    }

    /// Every live item in a keygroup.
    pub fn scan(&self, kg: &KeygroupName) -> FredResult<Vec<Item>> {
        self.require_keygroup(kg)?;
        self.data.read_all(kg)
    }

    /// Write a value superseding every stored version, then relay it.
    pub async fn update(&self, kg: &KeygroupName, id: &str, value: &str) -> FredResult<Item> {
        self.require_keygroup(kg)?;
        let me = self.self_id()?;
        let item = self.data.update_local(&me, kg, id, value)?;
        self.replication.relay_update(&item).await?;
        Ok(item)
    }

    /// Write a value superseding only `seen`, then relay it.
    pub async fn update_versions(
        &self,
        kg: &KeygroupName,
        id: &str,
        value: &str,
        seen: &[VectorClock],
    ) -> FredResult<Item> {
        self.require_keygroup(kg)?;
        let me = self.self_id()?;
        let item = self.data.update_local_versions(&me, kg, id, value, seen)?;
        self.replication.relay_update(&item).await?;
        Ok(item)
    }

    /// Delete an item, then relay the tombstone.
    pub async fn delete(&self, kg: &KeygroupName, id: &str) -> FredResult<Item> {
        self.require_keygroup(kg)?;
        let me = self.self_id()?;
        let tombstone = self.data.delete_local(&me, kg, id)?;
        self.replication.relay_delete(&tombstone).await?;
        Ok(tombstone)
    }

    /// Add a replica and fill it with the keygroup's current items.
    pub async fn add_keygroup_replica(&self, kg: &KeygroupName, id: &NodeId) -> FredResult<()> {
        self.replication.add_replica(kg, id, true).await?;

        if self.replication.registry().self_id().as_ref() == Some(id) {
            return Ok(());
        }

        let items = self.data.read_all(kg)?;
        self.replication.send_items(id, &items).await
    }

    /// Remove a replica.
    pub async fn remove_keygroup_replica(&self, kg: &KeygroupName, id: &NodeId) -> FredResult<()> {
        self.replication.remove_replica(kg, id, true).await
    }

    /// Replicas of a keygroup.
    pub fn get_keygroup_replica(&self, kg: &KeygroupName) -> FredResult<Vec<Node>> {
        self.replication.get_replica(kg)
    }

    /// Introduce nodes to the cluster, in order.
    pub async fn add_nodes(&self, nodes: Vec<Node>) -> FredResult<()> {
        for node in nodes {
            self.replication.add_node(node, true).await?;
        }
        Ok(())
    }

    /// All known nodes.
    pub fn get_nodes(&self) -> Vec<Node> {
        self.replication.get_nodes()
    }

    /// One node.
    pub fn get_node(&self, id: &NodeId) -> FredResult<Node> {
        self.replication.get_node(id)
    }

    /// Remove a node from the cluster.
    pub async fn remove_node(&self, id: &NodeId) -> FredResult<()> {
        self.replication.remove_node(id, true).await
    }

    /// Seed the self identity.
    pub async fn seed(&self, node: Node) -> FredResult<()> {
        self.replication.seed(node).await
    }

    /// Clear the self identity.
    pub fn unseed(&self) -> FredResult<()> {
        self.replication.unseed()
    }
}
