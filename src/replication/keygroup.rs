//! Keygroup and item types.

use crate::core::error::{FredError, FredResult};
use crate::replication::node::NodeId;
use crate::replication::vector::VectorClock;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

/// Keygroup name. ASCII alphanumerics, `_` and `.` only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeygroupName(String);

impl KeygroupName {
    /// Validate and wrap a keygroup name.
    pub fn new(name: impl Into<String>) -> FredResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(FredError::invalid("keygroup name must not be empty"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '.'))
        {
            return Err(FredError::invalid(format!(
                "keygroup name {:?} contains invalid character {:?}",
                name, c
            )));
        }
        Ok(Self(name))
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for KeygroupName {
    type Error = FredError;

    fn try_from(value: String) -> FredResult<Self> {
        Self::new(value)
    }
}

impl From<KeygroupName> for String {
    fn from(name: KeygroupName) -> Self {
        name.0
    }
}

impl AsRef<str> for KeygroupName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for KeygroupName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeygroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A keygroup and its replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keygroup {
    /// Keygroup name.
    pub name: KeygroupName,
    /// Replicating nodes, ascending by id.
    pub replicas: BTreeSet<NodeId>,
}

/// A versioned item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Owning keygroup.
    pub keygroup: KeygroupName,
    /// Item id within the keygroup.
    pub id: String,
    /// Payload.
    pub value: String,
    /// Version of this payload.
    pub version: VectorClock,
    /// Deletion marker; tombstones are never returned to readers.
    pub tombstoned: bool,
}

impl Item {
    /// Create a live item.
    pub fn new(
        keygroup: KeygroupName,
        id: impl Into<String>,
        value: impl Into<String>,
        version: VectorClock,
    ) -> Self {
        Self {
            keygroup,
            id: id.into(),
            value: value.into(),
            version,
            tombstoned: false,
        }
    }

    /// Create a tombstone.
    pub fn tombstone(keygroup: KeygroupName, id: impl Into<String>, version: VectorClock) -> Self {
        Self {
            keygroup,
            id: id.into(),
            value: String::new(),
            version,
            tombstoned: true,
        }
    }
}

/// Validate an item id (non-empty).
pub fn validate_item_id(id: &str) -> FredResult<()> {
    if id.is_empty() {
        return Err(FredError::invalid("item id must not be empty"));
    }
    Ok(())
}
