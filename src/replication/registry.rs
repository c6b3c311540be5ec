//! In-memory replica registry.
//!
//! Tracks known peer nodes, the replica set of every keygroup and the local
//! bootstrap identity. The three tables are locked independently; every
//! check-then-act runs inside one exclusive critical section on its table.
//!
//! Lock order for operations touching more than one table:
//! `nodes` -> `keygroups` -> `me`.

use crate::core::error::{FredError, FredResult};
use crate::replication::keygroup::{Keygroup, KeygroupName};
use crate::replication::node::{Address, Node, NodeId, SelfIdentity};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// Registry of nodes, keygroup replica sets and the self identity.
#[derive(Debug)]
pub struct ReplicaRegistry {
    nodes: RwLock<BTreeMap<NodeId, Node>>,
    keygroups: RwLock<BTreeMap<KeygroupName, BTreeSet<NodeId>>>,
    me: RwLock<SelfIdentity>,
}

impl ReplicaRegistry {
    /// Create an empty registry. `port` is the configured peering port
    /// reported for the self node once seeded.
    pub fn new(port: u16) -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            keygroups: RwLock::new(BTreeMap::new()),
            me: RwLock::new(SelfIdentity::unseeded(port)),
        }
    }

    // ---- nodes ----

    /// Record a node. Re-creating an existing id overwrites its address.
    pub fn create_node(&self, node: Node) {
        tracing::debug!(node = %node.id, endpoint = %node.endpoint(), "registry: create node");
        self.nodes.write().insert(node.id.clone(), node);
    }

    /// Delete a node.
    ///
    /// `NotFound` if unknown, `Conflict` while the node still replicates
    /// any keygroup.
    pub fn delete_node(&self, id: &NodeId) -> FredResult<()> {
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(id) {
            return Err(FredError::not_found(format!("node {} not found", id)));
        }

        let keygroups = self.keygroups.read();
        if let Some((kg, _)) = keygroups.iter().find(|(_, members)| members.contains(id)) {
            return Err(FredError::conflict(format!(
                "node {} is still a replica of keygroup {}",
                id, kg
            )));
        }
        drop(keygroups);

        nodes.remove(id);
        tracing::debug!(node = %id, "registry: delete node");
        Ok(())
    }

    /// Get a node by id.
    pub fn get_node(&self, id: &NodeId) -> FredResult<Node> {
        self.nodes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| FredError::not_found(format!("node {} not found", id)))
    }

    /// Check if a node is known.
    pub fn exists_node(&self, id: &NodeId) -> bool {
        self.nodes.read().contains_key(id)
    }

    /// All known nodes, ascending by id.
    pub fn get_nodes(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }

    // ---- keygroups ----

    /// Create a keygroup with an empty replica set. No-op if it exists.
    pub fn create_keygroup(&self, name: &KeygroupName) {
        let mut keygroups = self.keygroups.write();
        if !keygroups.contains_key(name) {
            keygroups.insert(name.clone(), BTreeSet::new());
            tracing::debug!(keygroup = %name, "registry: create keygroup");
        }
    }

    /// Delete a keygroup and its replica set.
    pub fn delete_keygroup(&self, name: &KeygroupName) -> FredResult<()> {
        match self.keygroups.write().remove(name) {
            Some(_) => {
                tracing::debug!(keygroup = %name, "registry: delete keygroup");
                Ok(())
            }
            None => Err(keygroup_not_found(name)),
        }
    }

    /// Get a keygroup with a snapshot of its replica set.
    pub fn get_keygroup(&self, name: &KeygroupName) -> FredResult<Keygroup> {
        self.keygroups
            .read()
            .get(name)
            .map(|replicas| Keygroup {
                name: name.clone(),
                replicas: replicas.clone(),
            })
            .ok_or_else(|| keygroup_not_found(name))
    }

    /// Check if a keygroup exists.
    pub fn exists_keygroup(&self, name: &KeygroupName) -> bool {
        self.keygroups.read().contains_key(name)
    }

    /// All keygroup names, ascending.
    pub fn keygroups(&self) -> Vec<KeygroupName> {
        self.keygroups.read().keys().cloned().collect()
    }

    // ---- replicas ----

    /// Add a node to a keygroup's replica set.
    ///
    /// `NotFound` for an unknown keygroup or node, `Conflict` if the node is
    /// already a member.
    pub fn add_replica(&self, name: &KeygroupName, id: &NodeId) -> FredResult<()> {
        let nodes = self.nodes.read();
        let mut keygroups = self.keygroups.write();

        let members = keygroups
            .get_mut(name)
            .ok_or_else(|| keygroup_not_found(name))?;

        if !nodes.contains_key(id) {
            return Err(FredError::not_found(format!("node {} not found", id)));
        }

        if !members.insert(id.clone()) {
            return Err(FredError::conflict(format!(
                "node {} is already a replica of keygroup {}",
                id, name
            )));
        }

        tracing::debug!(keygroup = %name, node = %id, "registry: add replica");
        Ok(())
    }

    /// Remove a node from a keygroup's replica set.
    pub fn remove_replica(&self, name: &KeygroupName, id: &NodeId) -> FredResult<()> {
        let mut keygroups = self.keygroups.write();
        let members = keygroups
            .get_mut(name)
            .ok_or_else(|| keygroup_not_found(name))?;

        if !members.remove(id) {
            return Err(FredError::not_found(format!(
                "node {} is not a replica of keygroup {}",
                id, name
            )));
        }

        tracing::debug!(keygroup = %name, node = %id, "registry: remove replica");
        Ok(())
    }

    /// Check if a node replicates a keygroup.
    pub fn is_replica(&self, name: &KeygroupName, id: &NodeId) -> bool {
        self.keygroups
            .read()
            .get(name)
            .is_some_and(|members| members.contains(id))
    }

    /// Resolve a keygroup's replica set to nodes, ascending by id.
    pub fn get_replica(&self, name: &KeygroupName) -> FredResult<Vec<Node>> {
        let nodes = self.nodes.read();
        let keygroups = self.keygroups.read();

        let members = keygroups.get(name).ok_or_else(|| keygroup_not_found(name))?;

        members
            .iter()
            .map(|id| {
                nodes.get(id).cloned().ok_or_else(|| {
                    FredError::internal(format!(
                        "replica {} of keygroup {} has no node record",
                        id, name
                    ))
                })
            })
            .collect()
    }

    // ---- self ----

    /// Seed the self identity and record the self node.
    ///
    /// `Conflict` if already seeded.
    pub fn seed(&self, node: Node) -> FredResult<()> {
        let mut nodes = self.nodes.write();
        let mut me = self.me.write();

        me.seed(node.id.clone(), node.address.clone())?;
        let me_node = me.node()?;
        nodes.insert(me_node.id.clone(), me_node);

        tracing::info!(node = %node.id, address = %node.address, "registry: seeded self");
        Ok(())
    }

    /// Seed from an id and address using the configured port.
    pub fn seed_with(&self, id: NodeId, address: Address) -> FredResult<()> {
        let port = self.me.read().port();
        self.seed(Node::new(id, address, port))
    }

    /// Clear the self identity. The self node record stays in the node table.
    ///
    /// `Conflict` if not seeded.
    pub fn unseed(&self) -> FredResult<()> {
        self.me.write().unseed()?;
        tracing::info!("registry: unseeded self");
        Ok(())
    }

    /// The self node. `NotReady` while unseeded.
    pub fn get_self(&self) -> FredResult<Node> {
        self.me.read().node()
    }

    /// The self id, if seeded.
    pub fn self_id(&self) -> Option<NodeId> {
        self.me.read().id().cloned()
    }

    /// Whether the self identity is seeded.
    pub fn is_seeded(&self) -> bool {
        self.me.read().is_seeded()
    }
}

fn keygroup_not_found(name: &KeygroupName) -> FredError {
    FredError::not_found(format!("keygroup {} not found", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn kg(name: &str) -> KeygroupName {
        KeygroupName::new(name).unwrap()
    }

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn node(s: &str, port: u16) -> Node {
        Node::parse(s, "127.0.0.1", port).unwrap()
    }

    #[test]
    fn test_create_keygroup_idempotent() {
        let reg = ReplicaRegistry::new(5555);
        reg.create_node(node("B", 1));
        reg.create_keygroup(&kg("kg1"));
        reg.add_replica(&kg("kg1"), &id("B")).unwrap();

        reg.create_keygroup(&kg("kg1"));
        assert!(reg.exists_keygroup(&kg("kg1")));
        assert_eq!(reg.get_keygroup(&kg("kg1")).unwrap().replicas.len(), 1);
    }

    #[test]
    fn test_add_replica_conflict_keeps_size() {
        let reg = ReplicaRegistry::new(5555);
        reg.create_node(node("B", 1));
        reg.create_keygroup(&kg("kg1"));

        reg.add_replica(&kg("kg1"), &id("B")).unwrap();
        let err = reg.add_replica(&kg("kg1"), &id("B")).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(reg.get_replica(&kg("kg1")).unwrap().len(), 1);
    }

    #[test]
    fn test_add_replica_not_found() {
        let reg = ReplicaRegistry::new(5555);
        reg.create_node(node("B", 1));
        assert!(reg.add_replica(&kg("nope"), &id("B")).unwrap_err().is_not_found());

        reg.create_keygroup(&kg("kg1"));
        assert!(reg.add_replica(&kg("kg1"), &id("Z")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_replica() {
        let reg = ReplicaRegistry::new(5555);
        reg.create_node(node("B", 1));
        reg.create_keygroup(&kg("kg1"));
        assert!(reg.remove_replica(&kg("kg1"), &id("B")).unwrap_err().is_not_found());

        reg.add_replica(&kg("kg1"), &id("B")).unwrap();
        reg.remove_replica(&kg("kg1"), &id("B")).unwrap();
        assert!(!reg.is_replica(&kg("kg1"), &id("B")));
    }

    #[test]
    fn test_delete_node_while_replica() {
        let reg = ReplicaRegistry::new(5555);
        reg.create_node(node("B", 1));
        reg.create_keygroup(&kg("kg1"));
        reg.add_replica(&kg("kg1"), &id("B")).unwrap();

        assert!(reg.delete_node(&id("B")).unwrap_err().is_conflict());
        reg.remove_replica(&kg("kg1"), &id("B")).unwrap();
        reg.delete_node(&id("B")).unwrap();
        assert!(reg.delete_node(&id("B")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_replica_sorted() {
        let reg = ReplicaRegistry::new(5555);
        for (name, port) in [("C", 3), ("A", 1), ("B", 2)] {
            reg.create_node(node(name, port));
        }
        reg.create_keygroup(&kg("kg1"));
        for name in ["C", "A", "B"] {
            reg.add_replica(&kg("kg1"), &id(name)).unwrap();
        }

        let ids: Vec<String> = reg
            .get_replica(&kg("kg1"))
            .unwrap()
            .into_iter()
            .map(|n| n.id.to_string())
            .collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_seed_lifecycle() {
        let reg = ReplicaRegistry::new(6000);
        assert!(reg.get_self().unwrap_err().is_not_ready());
        assert!(reg.unseed().unwrap_err().is_conflict());

        reg.seed_with(id("A"), Address::parse("localhost").unwrap())
            .unwrap();
        let me = reg.get_self().unwrap();
        assert_eq!(me.port, 6000);
        assert!(reg.exists_node(&id("A")));

        assert!(reg.seed(node("A", 6000)).unwrap_err().is_conflict());
        reg.unseed().unwrap();
        assert!(reg.self_id().is_none());
    }

    #[test]
    fn test_concurrent_add_replica_single_winner() {
        let reg = Arc::new(ReplicaRegistry::new(5555));
        reg.create_node(node("B", 1));
        reg.create_keygroup(&kg("kg1"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || reg.add_replica(&kg("kg1"), &id("B")).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
    }
}
