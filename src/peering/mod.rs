//! Peer-to-peer transport.
//!
//! Relay messages are addressed by `(address, port)`. Implementations only
//! provide [`PeeringClient::send`]; the typed `send_*` helpers build the
//! message bodies.
//!
//! # Modules
//!
//! - [`message`] - Message types and frame codec
//! - [`client`] - TCP client
//! - [`server`] - TCP accept loop dispatching to a [`MessageHandler`]
//! - [`memory`] - In-process network for tests and single-process clusters

pub mod client;
pub mod memory;
pub mod message;
pub mod server;

pub use client::TcpPeeringClient;
pub use memory::MemoryNetwork;
pub use message::{Ack, Frame, FrameCodec, MessageType, PeerMessage};
pub use server::PeeringServer;

use crate::core::error::FredResult;
use crate::replication::keygroup::{Item, KeygroupName};
use crate::replication::node::{Address, Node, NodeId};
use async_trait::async_trait;
use message::{
    AddNodeBody, AddReplicaBody, CreateKeygroupBody, IntroduceBody, KeygroupBody,
    RemoveNodeBody, RemoveReplicaBody,
};

/// Outbound peering transport.
#[async_trait]
pub trait PeeringClient: Send + Sync {
    /// Deliver one message and wait for its acknowledgement.
    ///
    /// Fails with `Transport` when the peer is unreachable, times out or
    /// acknowledges with an error.
    async fn send(&self, address: &Address, port: u16, message: PeerMessage) -> FredResult<()>;

    async fn send_create_keygroup(
        &self,
        address: &Address,
        port: u16,
        keygroup: &KeygroupName,
        replicas: &[Node],
    ) -> FredResult<()> {
        let message = PeerMessage::CreateKeygroup(CreateKeygroupBody {
            keygroup: keygroup.clone(),
            replicas: replicas.to_vec(),
        });
        self.send(address, port, message).await
    }

    async fn send_delete_keygroup(
        &self,
        address: &Address,
        port: u16,
        keygroup: &KeygroupName,
    ) -> FredResult<()> {
        let message = PeerMessage::DeleteKeygroup(KeygroupBody {
            keygroup: keygroup.clone(),
        });
        self.send(address, port, message).await
    }

    async fn send_update(&self, address: &Address, port: u16, item: &Item) -> FredResult<()> {
        self.send(address, port, PeerMessage::put_item(item)).await
    }

    async fn send_delete(&self, address: &Address, port: u16, item: &Item) -> FredResult<()> {
        self.send(address, port, PeerMessage::delete_item(item)).await
    }

    async fn send_add_replica(
        &self,
        address: &Address,
        port: u16,
        keygroup: &KeygroupName,
        node: &Node,
    ) -> FredResult<()> {
        let message = PeerMessage::AddReplica(AddReplicaBody {
            keygroup: keygroup.clone(),
            node: node.clone(),
        });
        self.send(address, port, message).await
    }

    async fn send_remove_replica(
        &self,
        address: &Address,
        port: u16,
        keygroup: &KeygroupName,
        node: &NodeId,
    ) -> FredResult<()> {
        let message = PeerMessage::RemoveReplica(RemoveReplicaBody {
            keygroup: keygroup.clone(),
            node: node.clone(),
        });
        self.send(address, port, message).await
    }

    async fn send_add_node(&self, address: &Address, port: u16, node: &Node) -> FredResult<()> {
        let message = PeerMessage::AddNode(AddNodeBody { node: node.clone() });
        self.send(address, port, message).await
    }

    async fn send_remove_node(
        &self,
        address: &Address,
        port: u16,
        node: &NodeId,
    ) -> FredResult<()> {
        let message = PeerMessage::RemoveNode(RemoveNodeBody { node: node.clone() });
        self.send(address, port, message).await
    }

    async fn send_introduce(
        &self,
        address: &Address,
        port: u16,
        introducer: &Node,
        target: &Node,
        known: &[Node],
    ) -> FredResult<()> {
        let message = PeerMessage::Introduce(IntroduceBody {
            introducer: introducer.clone(),
            target: target.clone(),
            known: known.to_vec(),
        });
        self.send(address, port, message).await
    }
}

/// Inbound message sink, implemented by the internal handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Apply one inbound message.
    async fn handle(&self, message: PeerMessage) -> FredResult<()>;
}
