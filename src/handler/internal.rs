//! Inbound peering messages.
//!
//! Applies relayed changes locally. Nothing here relays further.

use crate::core::error::FredResult;
use crate::data::DataService;
use crate::peering::message::PeerMessage;
use crate::peering::MessageHandler;
use crate::replication::keygroup::{Item, KeygroupName};
use crate::replication::node::Node;
use crate::replication::service::ReplicationService;
use async_trait::async_trait;

/// Handler for messages from peers.
#[derive(Clone)]
pub struct InternalHandler {
    data: DataService,
    replication: ReplicationService,
}

impl InternalHandler {
    /// Create a handler.
    pub fn new(data: DataService, replication: ReplicationService) -> Self {
        Self { data, replication }
    }

    fn learn_node(&self, node: &Node) {
        let registry = self.replication.registry();
        if registry.self_id().as_ref() != Some(&node.id) {
            registry.create_node(node.clone());
        }
    }

    async fn create_keygroup(&self, kg: &KeygroupName, replicas: &[Node]) -> FredResult<()> {
        self.replication.create_keygroup(kg)?;
        self.data.create_keygroup(kg)?;

        for node in replicas {
            self.learn_node(node);
            match self.replication.add_replica(kg, &node.id, false).await {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(keygroup = %kg, replicas = replicas.len(), "peer created keygroup");
        Ok(())
    }

    fn delete_keygroup(&self, kg: &KeygroupName) -> FredResult<()> {
        match self.data.delete_keygroup(kg) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.replication.delete_keygroup(kg)?;
        tracing::debug!(keygroup = %kg, "peer deleted keygroup");
        Ok(())
    }

    fn apply(&self, item: Item) -> FredResult<()> {
        let outcome = self.data.apply_remote_update(item)?;
        if outcome.has_conflict() {
            tracing::debug!("relayed write stored as concurrent version");
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for InternalHandler {
    async fn handle(&self, message: PeerMessage) -> FredResult<()> {
        match message {
            PeerMessage::CreateKeygroup(body) => {
                self.create_keygroup(&body.keygroup, &body.replicas).await
            }
            PeerMessage::DeleteKeygroup(body) => self.delete_keygroup(&body.keygroup),
            PeerMessage::PutItem(body) => self.apply(Item::new(
                body.keygroup,
                body.id,
                body.value,
                body.version,
            )),
            PeerMessage::DeleteItem(body) => {
                self.apply(Item::tombstone(body.keygroup, body.id, body.version))
            }
            PeerMessage::AddReplica(body) => {
                self.learn_node(&body.node);
                self.replication
                    .add_replica(&body.keygroup, &body.node.id, false)
                    .await
            }
            PeerMessage::RemoveReplica(body) => {
                self.replication
                    .remove_replica(&body.keygroup, &body.node, false)
                    .await
            }
            PeerMessage::AddNode(body) => self.replication.add_node(body.node, false).await,
            PeerMessage::RemoveNode(body) => self.replication.remove_node(&body.node, false).await,
            PeerMessage::Introduce(body) => {
                self.replication
                    .handle_introduction(body.introducer, body.target, body.known)
            }
        }
    }
}
