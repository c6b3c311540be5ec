//! Membership authority (name service).
//!
//! The name service is the authoritative record of keygroup membership,
//! kept in an external linearizable key-value store. It never touches the
//! local registry; the replication service reconciles against it.
//!
//! # Key layout
//!
//! | Key                       | Value                  |
//! |---------------------------|------------------------|
//! | `kg-<name>-status`        | `created` / `deleted`  |
//! | `kg-<name>-node-<id>`     | `ok` / `removed`       |
//! | `node-<id>-address`       | `<addr>:<port>`        |
//!
//! Keygroup names cannot contain `-`, so `kg-<name>-` prefixes never
//! overlap between keygroups.

pub mod memory;

#[cfg(feature = "etcd")]
pub mod etcd;

#[cfg(feature = "etcd")]
pub use etcd::EtcdGatewayStore;
pub use memory::MemoryCoordinationStore;

use crate::core::error::{FredError, FredResult};
use crate::replication::keygroup::KeygroupName;
use crate::replication::node::{Address, Node, NodeId};
use async_trait::async_trait;
use std::sync::Arc;

const STATUS_CREATED: &str = "created";
const STATUS_DELETED: &str = "deleted";
const MEMBER_OK: &str = "ok";
const MEMBER_REMOVED: &str = "removed";

/// Linearizable key-value store used for coordination.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Write a key.
    async fn put(&self, key: &str, value: &str) -> FredResult<()>;

    /// Read a key.
    async fn get(&self, key: &str) -> FredResult<Option<String>>;

    /// All keys with a prefix, ascending by key.
    async fn get_prefix(&self, prefix: &str) -> FredResult<Vec<(String, String)>>;

    /// Delete all keys with a prefix, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> FredResult<usize>;
}

fn status_key(kg: &KeygroupName) -> String {
    format!("kg-{}-status", kg)
}

fn members_prefix(kg: &KeygroupName) -> String {
    format!("kg-{}-node-", kg)
}

fn member_key(kg: &KeygroupName, id: &NodeId) -> String {
    format!("kg-{}-node-{}", kg, id)
}

fn address_key(id: &NodeId) -> String {
    format!("node-{}-address", id)
}

/// Parse an `<addr>:<port>` record. IPv6 literals may be bracketed.
fn parse_address_record(id: &NodeId, record: &str) -> FredResult<(Address, u16)> {
    let malformed = |why: &str| {
        FredError::decode(format!(
            "address record for node {} is malformed ({}): {:?}",
            id, why, record
        ))
    };

    let (host, port) = record.rsplit_once(':').ok_or_else(|| malformed("no port"))?;
    let port: u16 = port.parse().map_err(|_| malformed("bad port"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let address = Address::parse(host).map_err(|_| malformed("bad address"))?;
    Ok((address, port))
}

/// Name service client for one node.
#[derive(Clone)]
pub struct NameService {
    store: Arc<dyn CoordinationStore>,
    node_id: NodeId,
}

impl NameService {
    /// Create a name service acting as `node_id`.
    pub fn new(store: Arc<dyn CoordinationStore>, node_id: NodeId) -> Self {
        Self { store, node_id }
    }

    /// The node this client acts as.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Record this node's address.
    pub async fn register_self(&self, address: &Address, port: u16) -> FredResult<()> {
        self.store
            .put(&address_key(&self.node_id), &address.with_port(port))
            .await
    }

    /// Record another node's address.
    pub async fn register_other_node(&self, node: &Node) -> FredResult<()> {
        self.store
            .put(&address_key(&node.id), &node.endpoint())
            .await
    }

    /// Whether the keygroup's status is `created`.
    pub async fn exists_keygroup(&self, kg: &KeygroupName) -> FredResult<bool> {
        Ok(self.store.get(&status_key(kg)).await?.as_deref() == Some(STATUS_CREATED))
    }

    /// Create a keygroup and join it.
    ///
    /// `Conflict` if already created. Membership left over from an earlier
    /// incarnation of the name is purged.
    pub async fn create_keygroup(&self, kg: &KeygroupName) -> FredResult<()> {
        if self.exists_keygroup(kg).await? {
            return Err(FredError::conflict(format!(
                "keygroup {} already exists in the name service",
                kg
            )));
        }

        self.store.put(&status_key(kg), STATUS_CREATED).await?;
        let purged = self.store.delete_prefix(&members_prefix(kg)).await?;
        if purged > 0 {
            tracing::debug!(keygroup = %kg, purged, "purged stale membership records");
        }
        self.store
            .put(&member_key(kg, &self.node_id), MEMBER_OK)
            .await
    }

    /// Join this node into a keygroup. `NotFound` if not created.
    pub async fn join_keygroup(&self, kg: &KeygroupName) -> FredResult<()> {
        self.require_created(kg).await?;
        self.store
            .put(&member_key(kg, &self.node_id), MEMBER_OK)
            .await
    }

    /// Join another node into a keygroup.
    ///
    /// `NotFound` if the keygroup is not created or the node has no
    /// address record.
    pub async fn join_other_node_into_keygroup(
        &self,
        kg: &KeygroupName,
        id: &NodeId,
    ) -> FredResult<()> {
        self.require_created(kg).await?;
        self.get_node_address(id).await?;
        self.store.put(&member_key(kg, id), MEMBER_OK).await
    }

    /// Mark this node as removed from a keygroup.
    pub async fn exit_keygroup(&self, kg: &KeygroupName) -> FredResult<()> {
        self.store
            .put(&member_key(kg, &self.node_id), MEMBER_REMOVED)
            .await
    }

    /// Mark another node as removed from a keygroup.
    pub async fn exit_other_node_from_keygroup(
        &self,
        kg: &KeygroupName,
        id: &NodeId,
    ) -> FredResult<()> {
        self.store.put(&member_key(kg, id), MEMBER_REMOVED).await
    }

    /// Mark a keygroup deleted.
    pub async fn delete_keygroup(&self, kg: &KeygroupName) -> FredResult<()> {
        self.store.put(&status_key(kg), STATUS_DELETED).await
    }

    /// Ids of active members, ascending. Empty unless the keygroup is created.
    pub async fn get_keygroup_members(
        &self,
        kg: &KeygroupName,
        exclude_self: bool,
    ) -> FredResult<Vec<NodeId>> {
        if !self.exists_keygroup(kg).await? {
            return Ok(Vec::new());
        }

        let prefix = members_prefix(kg);
        let mut members = Vec::new();

        for (key, status) in self.store.get_prefix(&prefix).await? {
            if status != MEMBER_OK {
                continue;
            }
            let raw = &key[prefix.len()..];
            let id = NodeId::new(raw).map_err(|_| {
                FredError::decode(format!("membership key {:?} has an invalid node id", key))
            })?;
            if exclude_self && id == self.node_id {
                continue;
            }
            members.push(id);
        }

        members.sort();
        Ok(members)
    }

    /// Whether a node is an active member of a keygroup.
    pub async fn is_keygroup_member(&self, id: &NodeId, kg: &KeygroupName) -> FredResult<bool> {
        Ok(self.store.get(&member_key(kg, id)).await?.as_deref() == Some(MEMBER_OK))
    }

    /// A node's recorded address. `NotFound` if absent, `Decode` if malformed.
    pub async fn get_node_address(&self, id: &NodeId) -> FredResult<(Address, u16)> {
        let record = self
            .store
            .get(&address_key(id))
            .await?
            .ok_or_else(|| FredError::not_found(format!("node {} has no address record", id)))?;
        parse_address_record(id, &record)
    }

    /// Every node with an address record, ascending by id.
    pub async fn get_all_nodes(&self) -> FredResult<Vec<Node>> {
        let mut nodes = Vec::new();

        for (key, record) in self.store.get_prefix("node-").await? {
            let raw = match key
                .strip_prefix("node-")
                .and_then(|rest| rest.strip_suffix("-address"))
            {
                Some(raw) => raw,
                None => continue,
            };
            let id = NodeId::new(raw).map_err(|_| {
                FredError::decode(format!("address key {:?} has an invalid node id", key))
            })?;
            let (address, port) = parse_address_record(&id, &record)?;
            nodes.push(Node::new(id, address, port));
        }

        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn require_created(&self, kg: &KeygroupName) -> FredResult<()> {
        if self.exists_keygroup(kg).await? {
            Ok(())
        } else {
            Err(FredError::not_found(format!(
                "keygroup {} does not exist in the name service",
                kg
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kg(name: &str) -> KeygroupName {
        KeygroupName::new(name).unwrap()
    }

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn setup() -> (Arc<MemoryCoordinationStore>, NameService) {
        let store = Arc::new(MemoryCoordinationStore::new());
        let ns = NameService::new(store.clone(), id("A"));
        (store, ns)
    }

    #[test]
    fn test_parse_address_record() {
        let (addr, port) = parse_address_record(&id("A"), "10.0.0.1:5555").unwrap();
        assert_eq!(addr.as_str(), "10.0.0.1");
        assert_eq!(port, 5555);

        let (addr, _) = parse_address_record(&id("A"), "[::1]:80").unwrap();
        assert_eq!(addr.as_str(), "::1");

        for bad in ["10.0.0.1", "10.0.0.1:port", "bad host:1"] {
            let err = parse_address_record(&id("A"), bad).unwrap_err();
            assert!(matches!(err, FredError::Decode { .. }), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_create_keygroup_layout() {
        let (store, ns) = setup();
        ns.create_keygroup(&kg("kg1")).await.unwrap();

        assert_eq!(
            store.get("kg-kg1-status").await.unwrap().as_deref(),
            Some("created")
        );
        assert_eq!(
            store.get("kg-kg1-node-A").await.unwrap().as_deref(),
            Some("ok")
        );
        assert!(ns.create_keygroup(&kg("kg1")).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_recreate_purges_membership() {
        let (store, ns) = setup();
        ns.register_other_node(&Node::parse("B", "127.0.0.1", 2).unwrap())
            .await
            .unwrap();
        ns.create_keygroup(&kg("kg1")).await.unwrap();
        ns.join_other_node_into_keygroup(&kg("kg1"), &id("B"))
            .await
            .unwrap();

        ns.delete_keygroup(&kg("kg1")).await.unwrap();
        assert!(!ns.exists_keygroup(&kg("kg1")).await.unwrap());

        ns.create_keygroup(&kg("kg1")).await.unwrap();
        assert_eq!(store.get("kg-kg1-node-B").await.unwrap(), None);
        assert_eq!(
            ns.get_keygroup_members(&kg("kg1"), false).await.unwrap(),
            vec![id("A")]
        );
    }

    #[tokio::test]
    async fn test_join_requires_created_and_registered() {
        let (_store, ns) = setup();
        assert!(ns.join_keygroup(&kg("kg1")).await.unwrap_err().is_not_found());

        ns.create_keygroup(&kg("kg1")).await.unwrap();
        assert!(ns
            .join_other_node_into_keygroup(&kg("kg1"), &id("B"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_members_exclude_self_and_removed() {
        let (_store, ns) = setup();
        for (name, port) in [("C", 3), ("B", 2)] {
            ns.register_other_node(&Node::parse(name, "127.0.0.1", port).unwrap())
                .await
                .unwrap();
        }
        ns.create_keygroup(&kg("kg1")).await.unwrap();
        ns.join_other_node_into_keygroup(&kg("kg1"), &id("C"))
            .await
            .unwrap();
        ns.join_other_node_into_keygroup(&kg("kg1"), &id("B"))
            .await
            .unwrap();
        ns.exit_other_node_from_keygroup(&kg("kg1"), &id("C"))
            .await
            .unwrap();

        assert_eq!(
            ns.get_keygroup_members(&kg("kg1"), true).await.unwrap(),
            vec![id("B")]
        );
        assert!(ns.is_keygroup_member(&id("A"), &kg("kg1")).await.unwrap());
        assert!(!ns.is_keygroup_member(&id("C"), &kg("kg1")).await.unwrap());

        ns.exit_keygroup(&kg("kg1")).await.unwrap();
        assert!(!ns.is_keygroup_member(&id("A"), &kg("kg1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleted_keygroup_has_no_members() {
        let (_store, ns) = setup();
        ns.create_keygroup(&kg("kg1")).await.unwrap();
        assert_eq!(
            ns.get_keygroup_members(&kg("kg1"), false).await.unwrap(),
            vec![id("A")]
        );

        ns.delete_keygroup(&kg("kg1")).await.unwrap();
        assert!(ns
            .get_keygroup_members(&kg("kg1"), false)
            .await
            .unwrap()
            .is_empty());
        assert!(ns
            .get_keygroup_members(&kg("never"), false)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_node_addresses() {
        let (store, ns) = setup();
        ns.register_self(&Address::parse("localhost").unwrap(), 5555)
            .await
            .unwrap();
        ns.register_other_node(&Node::parse("node-b", "10.0.0.2", 6000).unwrap())
            .await
            .unwrap();

        let (addr, port) = ns.get_node_address(&id("node-b")).await.unwrap();
        assert_eq!((addr.as_str(), port), ("10.0.0.2", 6000));
        assert!(ns.get_node_address(&id("Z")).await.unwrap_err().is_not_found());

        let ids: Vec<String> = ns
            .get_all_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id.to_string())
            .collect();
        assert_eq!(ids, vec!["A", "node-b"]);

        store.put("node-X-address", "garbage").await.unwrap();
        assert!(matches!(
            ns.get_node_address(&id("X")).await.unwrap_err(),
            FredError::Decode { .. }
        ));
    }
}
