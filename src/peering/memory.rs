//! In-process peering network.
//!
//! Routes messages by `host:port` directly to registered handlers. Messages
//! still pass through the frame codec so that body serialization is
//! exercised exactly as on the wire.

use crate::core::error::{FredError, FredResult};
use crate::peering::message::{DecodeResult, Frame, FrameCodec, MessageType, PeerMessage};
use crate::peering::{MessageHandler, PeeringClient};
use crate::replication::node::Address;
use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A delivered message, recorded for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Destination `host:port`.
    pub endpoint: String,
    /// Message type.
    pub kind: MessageType,
}

/// Shared in-memory network. Clone to hand to multiple nodes.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn MessageHandler>>>>,
    deliveries: Arc<RwLock<Vec<Delivery>>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a handler at `address:port`.
    pub fn register(&self, address: &Address, port: u16, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .insert(address.with_port(port), handler);
    }

    /// Detach the handler at `address:port`, making it unreachable.
    pub fn unregister(&self, address: &Address, port: u16) {
        self.handlers.write().remove(&address.with_port(port));
    }

    /// Messages successfully delivered so far, in order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.read().clone()
    }

    /// Deliveries to one endpoint.
    pub fn deliveries_to(&self, address: &Address, port: u16) -> Vec<MessageType> {
        let endpoint = address.with_port(port);
        self.deliveries
            .read()
            .iter()
            .filter(|d| d.endpoint == endpoint)
            .map(|d| d.kind)
            .collect()
    }

    fn round_trip(message: PeerMessage) -> FredResult<PeerMessage> {
        let codec = FrameCodec::new(usize::MAX);
        let bytes = codec.encode(&Frame::Request(message)).into_result()?;
        let mut buf = BytesMut::from(&bytes[..]);
        match codec.decode(&mut buf) {
            DecodeResult::Complete(Frame::Request(message)) => Ok(message),
            DecodeResult::Complete(_) => Err(FredError::internal("request decoded as ack")),
            DecodeResult::Incomplete => Err(FredError::internal("request frame incomplete")),
            DecodeResult::Invalid(reason) => Err(FredError::decode(reason)),
        }
    }
}

#[async_trait]
impl PeeringClient for MemoryNetwork {
    async fn send(&self, address: &Address, port: u16, message: PeerMessage) -> FredResult<()> {
        let endpoint = address.with_port(port);
        let handler = self
            .handlers
            .read()
            .get(&endpoint)
            .cloned()
            .ok_or_else(|| FredError::transport(&endpoint, "no node listening"))?;

        let kind = message.message_type();
        let message = Self::round_trip(message)?;

        match handler.handle(message).await {
            Ok(()) => {
                self.deliveries.write().push(Delivery { endpoint, kind });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(peer = %endpoint, message = %kind, error = %e, "peer rejected message");
                Err(FredError::transport(
                    &endpoint,
                    format!("peer rejected request ({}): {}", e.status_code(), e),
                ))
            }
        }
    }
}
