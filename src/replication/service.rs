//! Replication service.
//!
//! Orchestrates keygroup lifecycle, replica-set changes and the relay of
//! data mutations to the other members of a keygroup.
//!
//! Registry access is a short critical section that captures a snapshot;
//! every relay send happens afterwards, outside any lock. Fan-out contacts
//! members sequentially in ascending id order and stops at the first
//! failure. Nothing already sent is rolled back; later writes or
//! [`reconcile_keygroup`](ReplicationService::reconcile_keygroup) heal the
//! divergence.

use crate::core::error::{FredError, FredResult};
use crate::nameservice::NameService;
use crate::peering::PeeringClient;
use crate::replication::keygroup::{Item, KeygroupName};
use crate::replication::node::{Node, NodeId};
use crate::replication::registry::ReplicaRegistry;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Changes applied by a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Nodes learned from the authority.
    pub nodes_created: Vec<NodeId>,
    /// Replicas added to the local set.
    pub replicas_added: Vec<NodeId>,
    /// Replicas dropped from the local set.
    pub replicas_removed: Vec<NodeId>,
    /// The authority no longer has the keygroup and the local copy was dropped.
    pub keygroup_deleted: bool,
}

impl ReconcileReport {
    /// Whether the pass changed nothing.
    pub fn is_empty(&self) -> bool {
        self.nodes_created.is_empty()
            && self.replicas_added.is_empty()
            && self.replicas_removed.is_empty()
            && !self.keygroup_deleted
    }
}

/// Replica-set management and relay.
#[derive(Clone)]
pub struct ReplicationService {
    registry: Arc<ReplicaRegistry>,
    client: Arc<dyn PeeringClient>,
    nameservice: Option<NameService>,
}

impl ReplicationService {
    /// Create a service. `nameservice` is optional; without it membership
    /// is purely local and reconciliation is unavailable.
    pub fn new(
        registry: Arc<ReplicaRegistry>,
        client: Arc<dyn PeeringClient>,
        nameservice: Option<NameService>,
    ) -> Self {
        Self {
            registry,
            client,
            nameservice,
        }
    }

    /// Shared registry.
    pub fn registry(&self) -> &Arc<ReplicaRegistry> {
        &self.registry
    }

    /// Configured name service, if any.
    pub fn nameservice(&self) -> Option<&NameService> {
        self.nameservice.as_ref()
    }

    fn is_self(&self, id: &NodeId) -> bool {
        self.registry.self_id().as_ref() == Some(id)
    }

    /// Replicas of `kg` other than self, ascending by id.
    fn peers_of(&self, kg: &KeygroupName) -> FredResult<Vec<Node>> {
        let me = self.registry.self_id();
        Ok(self
            .registry
            .get_replica(kg)?
            .into_iter()
            .filter(|n| Some(&n.id) != me.as_ref())
            .collect())
    }

    // ---- keygroups ----

    /// Create a keygroup locally. Idempotent.
    pub fn create_keygroup(&self, kg: &KeygroupName) -> FredResult<()> {
        self.registry.create_keygroup(kg);
        Ok(())
    }

    /// Delete a keygroup locally without relaying.
    pub fn delete_keygroup(&self, kg: &KeygroupName) -> FredResult<()> {
        self.registry.delete_keygroup(kg)
    }

    /// Delete a keygroup locally and on every other member.
    pub async fn relay_delete_keygroup(&self, kg: &KeygroupName) -> FredResult<()> {
        let peers = self.peers_of(kg)?;
        self.registry.delete_keygroup(kg)?;

        if let Some(ns) = &self.nameservice {
            ns.delete_keygroup(kg).await?;
        }

        for peer in &peers {
            self.client
                .send_delete_keygroup(&peer.address, peer.port, kg)
                .await?;
        }

        tracing::info!(keygroup = %kg, peers = peers.len(), "keygroup deleted");
        Ok(())
    }

    // ---- data relay ----

    /// Relay a stored version to every other member.
    pub async fn relay_update(&self, item: &Item) -> FredResult<()> {
        let peers = self.peers_of(&item.keygroup)?;
        for peer in &peers {
            self.client
                .send_update(&peer.address, peer.port, item)
                .await?;
        }
        tracing::debug!(keygroup = %item.keygroup, id = %item.id, peers = peers.len(), "relayed update");
        Ok(())
    }

    /// Relay a tombstone to every other member.
    pub async fn relay_delete(&self, item: &Item) -> FredResult<()> {
        let peers = self.peers_of(&item.keygroup)?;
        for peer in &peers {
            self.client
                .send_delete(&peer.address, peer.port, item)
                .await?;
        }
        tracing::debug!(keygroup = %item.keygroup, id = %item.id, peers = peers.len(), "relayed delete");
        Ok(())
    }

    /// Send stored versions to one node, e.g. to fill a new replica.
    pub async fn send_items(&self, id: &NodeId, items: &[Item]) -> FredResult<()> {
        let node = self.registry.get_node(id)?;
        for item in items {
            if item.tombstoned {
                self.client.send_delete(&node.address, node.port, item).await?;
            } else {
                self.client.send_update(&node.address, node.port, item).await?;
            }
        }
        tracing::debug!(node = %id, items = items.len(), "streamed items");
        Ok(())
    }

    // ---- replicas ----

    /// Add `id` to the replica set of `kg`.
    ///
    /// With `relay`, the new replica receives the keygroup (with the
    /// resulting replica list) and every other existing member is told
    /// about the new replica before the change is recorded locally.
    pub async fn add_replica(&self, kg: &KeygroupName, id: &NodeId, relay: bool) -> FredResult<()> {
        if !relay {
            return self.registry.add_replica(kg, id);
        }

        let keygroup = self.registry.get_keygroup(kg)?;
        let node = self.registry.get_node(id)?;
        if keygroup.replicas.contains(id) {
            return Err(FredError::conflict(format!(
                "node {} is already a replica of keygroup {}",
                id, kg
            )));
        }

        let existing = self.registry.get_replica(kg)?;
        let mut replicas = existing.clone();
        replicas.push(node.clone());
        replicas.sort_by(|a, b| a.id.cmp(&b.id));

        if !self.is_self(id) {
            self.client
                .send_create_keygroup(&node.address, node.port, kg, &replicas)
                .await?;
        }

        for member in existing.iter().filter(|m| !self.is_self(&m.id) && &m.id != id) {
            self.client
                .send_add_replica(&member.address, member.port, kg, &node)
                .await?;
        }

        self.registry.add_replica(kg, id)?;

        if let Some(ns) = &self.nameservice {
            ns.join_other_node_into_keygroup(kg, id).await?;
        }

        tracing::info!(keygroup = %kg, node = %id, "replica added");
        Ok(())
    }

    /// Remove `id` from the replica set of `kg`.
    ///
    /// The local change happens first. With `relay`, the removed node is
    /// told to drop the keygroup and the remaining members are told about
    /// the removal.
    pub async fn remove_replica(
        &self,
        kg: &KeygroupName,
        id: &NodeId,
        relay: bool,
    ) -> FredResult<()> {
        self.registry.remove_replica(kg, id)?;
        if !relay {
            return Ok(());
        }

        if let Some(ns) = &self.nameservice {
            ns.exit_other_node_from_keygroup(kg, id).await?;
        }

        if !self.is_self(id) {
            let node = self.registry.get_node(id)?;
            self.client
                .send_delete_keygroup(&node.address, node.port, kg)
                .await?;
        }

        for member in self.peers_of(kg)? {
            self.client
                .send_remove_replica(&member.address, member.port, kg, id)
                .await?;
        }

        tracing::info!(keygroup = %kg, node = %id, "replica removed");
        Ok(())
    }

    /// Replica set of `kg` resolved to nodes.
    pub fn get_replica(&self, kg: &KeygroupName) -> FredResult<Vec<Node>> {
        self.registry.get_replica(kg)
    }

    // ---- nodes ----

    /// Add a node to the cluster.
    ///
    /// With `relay` (requires a seeded self), the new node is introduced to
    /// the cluster and every existing peer learns about it before the node
    /// is committed locally.
    pub async fn add_node(&self, node: Node, relay: bool) -> FredResult<()> {
        if !relay {
            self.registry.create_node(node);
            return Ok(());
        }

        let me = self.registry.get_self()?;
        let known: Vec<Node> = self
            .registry
            .get_nodes()
            .into_iter()
            .filter(|n| n.id != me.id && n.id != node.id)
            .collect();

        self.client
            .send_introduce(&node.address, node.port, &me, &node, &known)
            .await?;

        for peer in &known {
            self.client
                .send_add_node(&peer.address, peer.port, &node)
                .await?;
        }

        if let Some(ns) = &self.nameservice {
            ns.register_other_node(&node).await?;
        }

        let (id, endpoint) = (node.id.clone(), node.endpoint());
        self.registry.create_node(node);
        tracing::info!(node = %id, endpoint = %endpoint, "node added");
        Ok(())
    }

    /// Remove a node from the cluster.
    pub async fn remove_node(&self, id: &NodeId, relay: bool) -> FredResult<()> {
        if relay {
            self.registry.get_node(id)?;
            if let Some(kg) = self
                .registry
                .keygroups()
                .into_iter()
                .find(|kg| self.registry.is_replica(kg, id))
            {
                return Err(FredError::conflict(format!(
                    "node {} is still a replica of keygroup {}",
                    id, kg
                )));
            }

            let me = self.registry.self_id();
            let peers: Vec<Node> = self
                .registry
                .get_nodes()
                .into_iter()
                .filter(|n| &n.id != id && Some(&n.id) != me.as_ref())
                .collect();

            for peer in &peers {
                self.client
                    .send_remove_node(&peer.address, peer.port, id)
                    .await?;
            }
        }

        self.registry.delete_node(id)?;
        tracing::info!(node = %id, "node removed");
        Ok(())
    }

    /// Get a node.
    pub fn get_node(&self, id: &NodeId) -> FredResult<Node> {
        self.registry.get_node(id)
    }

    /// All known nodes.
    pub fn get_nodes(&self) -> Vec<Node> {
        self.registry.get_nodes()
    }

    // ---- self ----

    /// Seed the self identity and register it with the authority.
    pub async fn seed(&self, node: Node) -> FredResult<()> {
        self.registry.seed(node.clone())?;
        if let Some(ns) = &self.nameservice {
            ns.register_self(&node.address, node.port).await?;
        }
        Ok(())
    }

    /// Clear the self identity.
    pub fn unseed(&self) -> FredResult<()> {
        self.registry.unseed()
    }

    /// The self node.
    pub fn get_self(&self) -> FredResult<Node> {
        self.registry.get_self()
    }

    /// Inbound side of an introduction.
    ///
    /// Seeds self from `target` when unseeded, then records the introducer
    /// and every other known node. `Conflict` when unseeded and `target`
    /// differs from the id the name service registers under.
    pub fn handle_introduction(
        &self,
        introducer: Node,
        target: Node,
        known: Vec<Node>,
    ) -> FredResult<()> {
        match self.registry.get_self() {
            Ok(me) if me.id != target.id => {
                tracing::warn!(
                    self_id = %me.id,
                    introduced_as = %target.id,
                    "introduced under a different id; keeping current identity"
                );
            }
            Ok(_) => {}
            Err(e) if e.is_not_ready() => {
                let acts_as = self.nameservice.as_ref().map(NameService::node_id);
                if let Some(ns_id) = acts_as.filter(|ns_id| *ns_id != &target.id) {
                    return Err(FredError::conflict(format!(
                        "introduced as {} but the name service acts as {}",
                        target.id, ns_id
                    )));
                }
                self.registry.seed(target)?;
            }
            Err(e) => return Err(e),
        }

        let me = self.registry.self_id();
        for node in std::iter::once(introducer).chain(known) {
            if Some(&node.id) != me.as_ref() {
                self.registry.create_node(node);
            }
        }
        Ok(())
    }

    /// Bring the local replica set of `kg` in line with the authority.
    ///
    /// A keygroup the authority does not mark created is dropped locally
    /// and never recreated. `NotReady` without a name service.
    pub async fn reconcile_keygroup(&self, kg: &KeygroupName) -> FredResult<ReconcileReport> {
        let ns = self
            .nameservice
            .as_ref()
            .ok_or_else(|| FredError::not_ready("no name service configured"))?;

        let mut report = ReconcileReport::default();
        if !ns.exists_keygroup(kg).await? {
            if self.registry.exists_keygroup(kg) {
                self.registry.delete_keygroup(kg)?;
                report.keygroup_deleted = true;
                tracing::info!(keygroup = %kg, "dropped keygroup deleted at the authority");
            }
            return Ok(report);
        }

        let authoritative: BTreeSet<NodeId> =
            ns.get_keygroup_members(kg, false).await?.into_iter().collect();

        self.registry.create_keygroup(kg);

        for id in &authoritative {
            if !self.registry.exists_node(id) {
                let (address, port) = ns.get_node_address(id).await?;
                self.registry.create_node(Node::new(id.clone(), address, port));
                report.nodes_created.push(id.clone());
            }
        }

        let local = self.registry.get_keygroup(kg)?.replicas;

        for id in authoritative.difference(&local) {
            match self.registry.add_replica(kg, id) {
                Ok(()) => report.replicas_added.push(id.clone()),
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }

        for id in local.difference(&authoritative) {
            match self.registry.remove_replica(kg, id) {
                Ok(()) => report.replicas_removed.push(id.clone()),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        if !report.is_empty() {
            tracing::info!(
                keygroup = %kg,
                added = report.replicas_added.len(),
                removed = report.replicas_removed.len(),
                "reconciled replica set"
            );
        }
        Ok(report)
    }

    /// All locally known keygroups.
    pub fn keygroups(&self) -> Vec<KeygroupName> {
        self.registry.keygroups()
    }
}
