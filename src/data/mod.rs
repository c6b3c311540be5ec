//! Data service.
//!
//! Stamps local writes with vector clocks and applies relayed writes to the
//! item store. A local write supersedes the versions the writer has seen:
//! their clocks are merged and the local node's counter is ticked.

use crate::core::error::{FredError, FredResult};
use crate::replication::keygroup::{validate_item_id, Item, KeygroupName};
use crate::replication::node::NodeId;
use crate::replication::vector::VectorClock;
use crate::storage::{ItemStore, UpdateOutcome};
use std::sync::Arc;

/// Versioned access to the item store.
#[derive(Clone)]
pub struct DataService {
    store: Arc<dyn ItemStore>,
}

impl DataService {
    /// Create a data service over a store.
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    /// Live versions of an item.
    pub fn read(&self, keygroup: &KeygroupName, id: &str) -> FredResult<Vec<Item>> {
        self.store.read(keygroup, id)
    }

    /// Live versions of every item in a keygroup.
    pub fn read_all(&self, keygroup: &KeygroupName) -> FredResult<Vec<Item>> {
        self.store.read_all(keygroup)
    }

    /// Live item ids in a keygroup.
    pub fn ids(&self, keygroup: &KeygroupName) -> FredResult<Vec<String>> {
        self.store.ids(keygroup)
    }

    /// Write a value that supersedes every stored version.
    pub fn update_local(
        &self,
        self_id: &NodeId,
        keygroup: &KeygroupName,
        id: &str,
        value: &str,
    ) -> FredResult<Item> {
        validate_item_id(id)?;
        self.write_local(self_id, Item::new(keygroup.clone(), id, value, VectorClock::new()), None)
    }

    /// Write a value that supersedes only the given versions.
    ///
    /// Versions the writer has not seen stay as concurrent siblings.
    /// `Conflict` if the result would be stale.
    pub fn update_local_versions(
        &self,
        self_id: &NodeId,
        keygroup: &KeygroupName,
        id: &str,
        value: &str,
        seen: &[VectorClock],
    ) -> FredResult<Item> {
        validate_item_id(id)?;
        self.write_local(
            self_id,
            Item::new(keygroup.clone(), id, value, VectorClock::new()),
            Some(seen),
        )
    }

    /// Delete every live version of an item with a tombstone.
    ///
    /// `NotFound` if the item has no live version.
    pub fn delete_local(
        &self,
        self_id: &NodeId,
        keygroup: &KeygroupName,
        id: &str,
    ) -> FredResult<Item> {
        validate_item_id(id)?;
        self.write_local(self_id, Item::tombstone(keygroup.clone(), id, VectorClock::new()), None)
    }

    fn write_local(
        &self,
        self_id: &NodeId,
        item: Item,
        seen: Option<&[VectorClock]>,
    ) -> FredResult<Item> {
        match self.store.update_local(self_id, item, seen)? {
            (item, UpdateOutcome::Stale) => Err(FredError::conflict(format!(
                "write to {}/{} at {} is superseded by a stored version",
                item.keygroup, item.id, item.version
            ))),
            (item, outcome) => {
                tracing::debug!(
                    keygroup = %item.keygroup,
                    id = %item.id,
                    version = %item.version,
                    tombstone = item.tombstoned,
                    conflict = outcome.has_conflict(),
                    "local write"
                );
                Ok(item)
            }
        }
    }

    /// Apply a relayed write verbatim.
    pub fn apply_remote_update(&self, item: Item) -> FredResult<UpdateOutcome> {
        validate_item_id(&item.id)?;
        let keygroup = item.keygroup.clone();
        let id = item.id.clone();
        let version = item.version.clone();

        let outcome = self.store.update(item)?;
        if outcome == UpdateOutcome::Stale {
            tracing::debug!(keygroup = %keygroup, id = %id, version = %version, "stale relayed write dropped");
        }
        Ok(outcome)
    }

    /// Apply a relayed delete verbatim.
    pub fn apply_remote_delete(
        &self,
        keygroup: &KeygroupName,
        id: &str,
        version: VectorClock,
    ) -> FredResult<UpdateOutcome> {
        self.apply_remote_update(Item::tombstone(keygroup.clone(), id, version))
    }

    /// Create a keygroup in the store.
    pub fn create_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.store.create_keygroup(keygroup)
    }

    /// Delete a keygroup and its items.
    pub fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.store.delete_keygroup(keygroup)
    }

    /// Whether a keygroup exists in the store.
    pub fn exists_keygroup(&self, keygroup: &KeygroupName) -> bool {
        self.store.exists_keygroup(keygroup)
    }
}
