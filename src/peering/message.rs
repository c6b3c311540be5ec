//! Peering messages and frame codec.
//!
//! # Frame layout
//!
//! ```text
//! +--------+----------------+----------------------+
//! | type   | length (u32 BE)| body (JSON)          |
//! | 1 byte | 4 bytes        | `length` bytes       |
//! +--------+----------------+----------------------+
//! ```
//!
//! Every request frame is answered with exactly one [`Ack`] frame.
//! Vector clocks travel as their canonical byte encoding, base64 in JSON.

use crate::core::error::{FredError, FredResult};
use crate::replication::keygroup::{Item, KeygroupName};
use crate::replication::node::{Node, NodeId};
use crate::replication::vector::VectorClock;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame header size: type byte plus body length.
pub const HEADER_LEN: usize = 5;

/// Result of decoding a frame from the wire.
#[derive(Debug)]
pub enum DecodeResult<T> {
    /// A complete frame was decoded.
    Complete(T),
    /// More data is needed to complete the frame.
    Incomplete,
    /// The input is invalid.
    Invalid(String),
}

/// Result of encoding a frame to the wire.
#[derive(Debug)]
pub enum EncodeResult {
    /// Successfully encoded.
    Ok(Bytes),
    /// Encoding failed.
    Error(String),
}

impl EncodeResult {
    /// Convert to a `FredResult`.
    pub fn into_result(self) -> FredResult<Bytes> {
        match self {
            Self::Ok(bytes) => Ok(bytes),
            Self::Error(message) => Err(FredError::internal(message)),
        }
    }
}

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    CreateKeygroup = 0x10,
    DeleteKeygroup = 0x11,
    PutItem = 0x13,
    DeleteItem = 0x14,
    AddNode = 0x15,
    RemoveNode = 0x16,
    AddReplica = 0x17,
    RemoveReplica = 0x18,
    Introduce = 0x19,
    Ack = 0x20,
}

impl MessageType {
    /// Parse a type byte.
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x10 => Self::CreateKeygroup,
            0x11 => Self::DeleteKeygroup,
            0x13 => Self::PutItem,
            0x14 => Self::DeleteItem,
            0x15 => Self::AddNode,
            0x16 => Self::RemoveNode,
            0x17 => Self::AddReplica,
            0x18 => Self::RemoveReplica,
            0x19 => Self::Introduce,
            0x20 => Self::Ack,
            _ => return None,
        })
    }

    /// Wire name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateKeygroup => "create_keygroup",
            Self::DeleteKeygroup => "delete_keygroup",
            Self::PutItem => "put_item",
            Self::DeleteItem => "delete_item",
            Self::AddNode => "add_node",
            Self::RemoveNode => "remove_node",
            Self::AddReplica => "add_replica",
            Self::RemoveReplica => "remove_replica",
            Self::Introduce => "introduce",
            Self::Ack => "ack",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod clock_b64 {
    use crate::replication::vector::VectorClock;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(clock: &VectorClock, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(clock.encode()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<VectorClock, D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        VectorClock::decode(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Body of a create keygroup request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateKeygroupBody {
    pub keygroup: KeygroupName,
    /// Replica set the receiver should record, self included.
    #[serde(default)]
    pub replicas: Vec<Node>,
}

/// Body of a delete keygroup request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeygroupBody {
    pub keygroup: KeygroupName,
}

/// Body of a put item request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutItemBody {
    pub keygroup: KeygroupName,
    pub id: String,
    pub value: String,
    #[serde(with = "clock_b64")]
    pub version: VectorClock,
}

/// Body of a delete item request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteItemBody {
    pub keygroup: KeygroupName,
    pub id: String,
    #[serde(with = "clock_b64")]
    pub version: VectorClock,
}

/// Body of an add node request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddNodeBody {
    pub node: Node,
}

/// Body of a remove node request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveNodeBody {
    pub node: NodeId,
}

/// Body of an add replica request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddReplicaBody {
    pub keygroup: KeygroupName,
    pub node: Node,
}

/// Body of a remove replica request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveReplicaBody {
    pub keygroup: KeygroupName,
    pub node: NodeId,
}

/// Body of an introduce request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroduceBody {
    /// The node doing the introducing.
    pub introducer: Node,
    /// The receiver's own identity as the introducer sees it.
    pub target: Node,
    /// Other nodes known to the introducer.
    #[serde(default)]
    pub known: Vec<Node>,
}

/// A peering request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    CreateKeygroup(CreateKeygroupBody),
    DeleteKeygroup(KeygroupBody),
    PutItem(PutItemBody),
    DeleteItem(DeleteItemBody),
    AddNode(AddNodeBody),
    RemoveNode(RemoveNodeBody),
    AddReplica(AddReplicaBody),
    RemoveReplica(RemoveReplicaBody),
    Introduce(IntroduceBody),
}

impl PeerMessage {
    /// Frame type for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::CreateKeygroup(_) => MessageType::CreateKeygroup,
            Self::DeleteKeygroup(_) => MessageType::DeleteKeygroup,
            Self::PutItem(_) => MessageType::PutItem,
            Self::DeleteItem(_) => MessageType::DeleteItem,
            Self::AddNode(_) => MessageType::AddNode,
            Self::RemoveNode(_) => MessageType::RemoveNode,
            Self::AddReplica(_) => MessageType::AddReplica,
            Self::RemoveReplica(_) => MessageType::RemoveReplica,
            Self::Introduce(_) => MessageType::Introduce,
        }
    }

    /// Build a put item message from an item.
    pub fn put_item(item: &Item) -> Self {
        Self::PutItem(PutItemBody {
            keygroup: item.keygroup.clone(),
            id: item.id.clone(),
            value: item.value.clone(),
            version: item.version.clone(),
        })
    }

    /// Build a delete item message from an item.
    pub fn delete_item(item: &Item) -> Self {
        Self::DeleteItem(DeleteItemBody {
            keygroup: item.keygroup.clone(),
            id: item.id.clone(),
            version: item.version.clone(),
        })
    }

    fn body_json(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Self::CreateKeygroup(b) => serde_json::to_vec(b),
            Self::DeleteKeygroup(b) => serde_json::to_vec(b),
            Self::PutItem(b) => serde_json::to_vec(b),
            Self::DeleteItem(b) => serde_json::to_vec(b),
            Self::AddNode(b) => serde_json::to_vec(b),
            Self::RemoveNode(b) => serde_json::to_vec(b),
            Self::AddReplica(b) => serde_json::to_vec(b),
            Self::RemoveReplica(b) => serde_json::to_vec(b),
            Self::Introduce(b) => serde_json::to_vec(b),
        }
    }

    fn from_body(ty: MessageType, body: &[u8]) -> serde_json::Result<Self> {
        Ok(match ty {
            MessageType::CreateKeygroup => Self::CreateKeygroup(serde_json::from_slice(body)?),
            MessageType::DeleteKeygroup => Self::DeleteKeygroup(serde_json::from_slice(body)?),
            MessageType::PutItem => Self::PutItem(serde_json::from_slice(body)?),
            MessageType::DeleteItem => Self::DeleteItem(serde_json::from_slice(body)?),
            MessageType::AddNode => Self::AddNode(serde_json::from_slice(body)?),
            MessageType::RemoveNode => Self::RemoveNode(serde_json::from_slice(body)?),
            MessageType::AddReplica => Self::AddReplica(serde_json::from_slice(body)?),
            MessageType::RemoveReplica => Self::RemoveReplica(serde_json::from_slice(body)?),
            MessageType::Introduce => Self::Introduce(serde_json::from_slice(body)?),
            MessageType::Ack => {
                return Err(serde::de::Error::custom("ack is not a request"));
            }
        })
    }
}

/// Acknowledgement for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    /// HTTP-style status code; 200 on success.
    pub code: u16,
    #[serde(default)]
    pub message: String,
}

impl Ack {
    /// Successful acknowledgement.
    pub fn success() -> Self {
        Self {
            ok: true,
            code: 200,
            message: String::new(),
        }
    }

    /// Failure acknowledgement carrying the error's status.
    pub fn failure(err: &FredError) -> Self {
        Self {
            ok: false,
            code: err.status_code(),
            message: err.to_string(),
        }
    }

    /// Build from a handler result.
    pub fn from_result(result: &FredResult<()>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(e) => Self::failure(e),
        }
    }

    /// The error the remote side reported, with its kind restored.
    pub fn remote_error(&self) -> Option<FredError> {
        (!self.ok).then(|| FredError::from_status(self.code, self.message.clone()))
    }

    /// Convert to a sender-side result. A failure ack is a transport error
    /// toward `target`.
    pub fn into_result(self, target: &str) -> FredResult<()> {
        if self.ok {
            return Ok(());
        }
        Err(FredError::transport(
            target,
            format!("peer rejected request ({}): {}", self.code, self.message),
        ))
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request(PeerMessage),
    Ack(Ack),
}

impl Frame {
    /// Frame type byte.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Request(m) => m.message_type(),
            Self::Ack(_) => MessageType::Ack,
        }
    }
}

/// Frame codec with a body size limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    /// Create a codec rejecting bodies above `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    /// Encode a frame.
    pub fn encode(&self, frame: &Frame) -> EncodeResult {
        let body = match frame {
            Frame::Request(m) => m.body_json(),
            Frame::Ack(a) => serde_json::to_vec(a),
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => return EncodeResult::Error(format!("failed to encode body: {}", e)),
        };

        if body.len() > self.max_frame_bytes {
            return EncodeResult::Error(format!(
                "frame body of {} bytes exceeds limit of {}",
                body.len(),
                self.max_frame_bytes
            ));
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
        buf.put_u8(frame.message_type() as u8);
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
        EncodeResult::Ok(buf.freeze())
    }

    /// Attempt to decode one frame, consuming its bytes on `Complete`.
    pub fn decode(&self, buffer: &mut BytesMut) -> DecodeResult<Frame> {
        if buffer.len() < HEADER_LEN {
            return DecodeResult::Incomplete;
        }

        let ty = match MessageType::from_u8(buffer[0]) {
            Some(ty) => ty,
            None => {
                return DecodeResult::Invalid(format!("unknown message type 0x{:02x}", buffer[0]))
            }
        };
        let len = u32::from_be_bytes([buffer[1], buffer[2], buffer[3], buffer[4]]) as usize;

        if len > self.max_frame_bytes {
            return DecodeResult::Invalid(format!(
                "frame body of {} bytes exceeds limit of {}",
                len, self.max_frame_bytes
            ));
        }
        if buffer.len() < HEADER_LEN + len {
            return DecodeResult::Incomplete;
        }

        buffer.advance(HEADER_LEN);
        let body = buffer.split_to(len);

        let frame = if ty == MessageType::Ack {
            serde_json::from_slice(&body).map(Frame::Ack)
        } else {
            PeerMessage::from_body(ty, &body).map(Frame::Request)
        };

        match frame {
            Ok(frame) => DecodeResult::Complete(frame),
            Err(e) => DecodeResult::Invalid(format!("malformed {} body: {}", ty, e)),
        }
    }
}
