//! Node identity types.
//!
//! Nodes reference each other by [`NodeId`] only; the registry resolves an id
//! to an [`Address`] and port.

use crate::core::error::{FredError, FredResult};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::net::IpAddr;

/// Unique node identifier. Non-empty, no whitespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Validate and wrap a node id.
    pub fn new(id: impl Into<String>) -> FredResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(FredError::invalid("node id must not be empty"));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(FredError::invalid(format!(
                "node id {:?} must not contain whitespace",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeId {
    type Error = FredError;

    fn try_from(value: String) -> FredResult<Self> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated network address: an IP literal or a hostname.
///
/// Hostnames are `localhost` or dot-separated labels of `[-A-Za-z0-9]`
/// ending in an alphabetic top-level label of at least two characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    addr: String,
    is_ip: bool,
}

impl Address {
    /// Parse and validate an address string.
    pub fn parse(addr: &str) -> FredResult<Self> {
        if addr.parse::<IpAddr>().is_ok() {
            return Ok(Self {
                addr: addr.to_string(),
                is_ip: true,
            });
        }

        if is_hostname(addr) {
            return Ok(Self {
                addr: addr.to_string(),
                is_ip: false,
            });
        }

        Err(FredError::invalid(format!(
            "{:?} is neither an IP address nor a hostname",
            addr
        )))
    }

    /// Whether this address is an IP literal.
    pub fn is_ip(&self) -> bool {
        self.is_ip
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.addr
    }

    /// Render `host:port`, bracketing IPv6 literals.
    pub fn with_port(&self, port: u16) -> String {
        if self.is_ip && self.addr.contains(':') {
            format!("[{}]:{}", self.addr, port)
        } else {
            format!("{}:{}", self.addr, port)
        }
    }
}

fn is_hostname(s: &str) -> bool {
    if s == "localhost" {
        return true;
    }

    let labels: Vec<&str> = s.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    let (tld, rest) = match labels.split_last() {
        Some(split) => split,
        None => return false,
    };

    tld.len() >= 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
        && rest.iter().all(|label| {
            !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

impl TryFrom<String> for Address {
    type Error = FredError;

    fn try_from(value: String) -> FredResult<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.addr
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

/// A cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier.
    pub id: NodeId,
    /// Peering address.
    pub address: Address,
    /// Peering port.
    pub port: u16,
}

impl Node {
    /// Create a node.
    pub fn new(id: NodeId, address: Address, port: u16) -> Self {
        Self { id, address, port }
    }

    /// Parse the id and address from strings.
    pub fn parse(id: &str, address: &str, port: u16) -> FredResult<Self> {
        Ok(Self {
            id: NodeId::new(id)?,
            address: Address::parse(address)?,
            port,
        })
    }

    /// `host:port` for this node.
    pub fn endpoint(&self) -> String {
        self.address.with_port(self.port)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.endpoint())
    }
}

/// The local node's bootstrap identity.
///
/// Starts unseeded; only the configured port is known until [`seed`](Self::seed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfIdentity {
    id: Option<NodeId>,
    address: Option<Address>,
    port: u16,
    seeded: bool,
}

impl SelfIdentity {
    /// Create an unseeded identity with the configured port.
    pub fn unseeded(port: u16) -> Self {
        Self {
            id: None,
            address: None,
            port,
            seeded: false,
        }
    }

    /// Whether the identity has been seeded.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Assign id and address. `Conflict` if already seeded.
    pub fn seed(&mut self, id: NodeId, address: Address) -> FredResult<()> {
        if self.seeded {
            return Err(FredError::conflict(format!(
                "self is already seeded as {}",
                self.id.as_ref().map(NodeId::as_str).unwrap_or_default()
            )));
        }
        self.id = Some(id);
        self.address = Some(address);
        self.seeded = true;
        Ok(())
    }

    /// Clear id and address, keeping the port. `Conflict` if not seeded.
    pub fn unseed(&mut self) -> FredResult<()> {
        if !self.seeded {
            return Err(FredError::conflict("self is not seeded"));
        }
        self.id = None;
        self.address = None;
        self.seeded = false;
        Ok(())
    }

    /// The self node. `NotReady` while unseeded.
    pub fn node(&self) -> FredResult<Node> {
        match (&self.id, &self.address) {
            (Some(id), Some(address)) if self.seeded => {
                Ok(Node::new(id.clone(), address.clone(), self.port))
            }
            _ => Err(FredError::not_ready("self is not seeded")),
        }
    }

    /// The self id, if seeded.
    pub fn id(&self) -> Option<&NodeId> {
        self.id.as_ref().filter(|_| self.seeded)
    }
}
