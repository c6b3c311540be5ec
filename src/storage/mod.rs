//! Item storage.
//!
//! The storage backend keeps every causally concurrent version of an item
//! side by side. Writes follow three rules:
//!
//! - a version dominated by (or equal to) a stored version is stale and dropped
//! - a version that dominates stored versions replaces them
//! - a version concurrent with stored versions is kept as a sibling
//!
//! Deletes are tombstone versions under the same rules, so a late stale
//! write cannot resurrect a deleted item.
//!
//! # Modules
//!
//! - [`memory`] - In-memory implementation

pub mod memory;

pub use memory::MemoryItemStore;

use crate::core::error::FredResult;
use crate::replication::keygroup::{Item, KeygroupName};
use crate::replication::node::NodeId;
use crate::replication::vector::VectorClock;

/// Result of applying a version to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The version was stored.
    Stored {
        /// Stored versions this one superseded.
        replaced: usize,
        /// Concurrent versions left alongside it.
        siblings: usize,
    },
    /// A stored version dominates or equals this one; nothing changed.
    Stale,
}

impl UpdateOutcome {
    /// Whether the version was stored.
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }

    /// Whether the stored item now has concurrent versions.
    pub fn has_conflict(&self) -> bool {
        matches!(self, Self::Stored { siblings, .. } if *siblings > 0)
    }
}

/// Storage backend contract.
pub trait ItemStore: Send + Sync {
    /// Live versions of an item. `NotFound` if the keygroup or item is missing.
    fn read(&self, keygroup: &KeygroupName, id: &str) -> FredResult<Vec<Item>>;

    /// Every stored version including tombstones. Empty if the item is unknown.
    fn versions(&self, keygroup: &KeygroupName, id: &str) -> FredResult<Vec<Item>>;

    /// Live versions of every item in a keygroup, ascending by id.
    fn read_all(&self, keygroup: &KeygroupName) -> FredResult<Vec<Item>>;

    /// Ids of live items in a keygroup, ascending.
    fn ids(&self, keygroup: &KeygroupName) -> FredResult<Vec<String>>;

    /// Whether an item has at least one live version.
    fn exists(&self, keygroup: &KeygroupName, id: &str) -> bool;

    /// Apply a version (live or tombstone) with the causal rules.
    fn update(&self, item: Item) -> FredResult<UpdateOutcome>;

    /// Stamp and apply a local write in one critical section.
    ///
    /// The new version merges `seen` (every stored version when `None`) and
    /// ticks `self_id`. A tombstone for an item with no live version is
    /// `NotFound`. Returns the stamped item and the outcome.
    fn update_local(
        &self,
        self_id: &NodeId,
        item: Item,
        seen: Option<&[VectorClock]>,
    ) -> FredResult<(Item, UpdateOutcome)>;

    /// Record a tombstone at `version`.
    fn delete(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        version: VectorClock,
    ) -> FredResult<UpdateOutcome> {
        self.update(Item::tombstone(keygroup.clone(), id, version))
    }

    /// Create a keygroup. No-op if it exists.
    fn create_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()>;

    /// Delete a keygroup and all of its items.
    fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()>;

    /// Whether a keygroup exists.
    fn exists_keygroup(&self, keygroup: &KeygroupName) -> bool;
}
