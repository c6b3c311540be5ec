//! In-memory item store.

use crate::core::error::{FredError, FredResult};
use crate::replication::keygroup::{Item, KeygroupName};
use crate::replication::node::NodeId;
use crate::replication::vector::{ClockOrdering, VectorClock};
use crate::storage::{ItemStore, UpdateOutcome};
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Versions = Vec<Item>;

/// Item store backed by nested ordered maps under one lock.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    keygroups: RwLock<BTreeMap<KeygroupName, BTreeMap<String, Versions>>>,
}

impl MemoryItemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions (tombstones included) for an item.
    pub fn version_count(&self, keygroup: &KeygroupName, id: &str) -> usize {
        self.keygroups
            .read()
            .get(keygroup)
            .and_then(|items| items.get(id))
            .map_or(0, Vec::len)
    }
}

fn missing_keygroup(keygroup: &KeygroupName) -> FredError {
    FredError::not_found(format!("keygroup {} not found", keygroup))
}

fn live(versions: &[Item]) -> impl Iterator<Item = &Item> {
    versions.iter().filter(|v| !v.tombstoned)
}

/// Apply a version to an item's stored versions with the causal rules.
fn apply(versions: &mut Versions, item: Item) -> UpdateOutcome {
    let orderings: Vec<ClockOrdering> = versions
        .iter()
        .map(|stored| item.version.compare(&stored.version))
        .collect();

    if orderings
        .iter()
        .any(|o| matches!(o, ClockOrdering::Before | ClockOrdering::Equal))
    {
        tracing::debug!(
            keygroup = %item.keygroup,
            id = %item.id,
            version = %item.version,
            "dropping stale version"
        );
        return UpdateOutcome::Stale;
    }

    let before = versions.len();
    let mut kept = Vec::with_capacity(before + 1);
    for (stored, ordering) in versions.drain(..).zip(orderings) {
        if ordering.is_concurrent() {
            kept.push(stored);
        }
    }
    let siblings = kept.iter().filter(|v| !v.tombstoned).count();
    let replaced = before - kept.len();

    kept.push(item);
    *versions = kept;

    UpdateOutcome::Stored { replaced, siblings }
}

impl ItemStore for MemoryItemStore {
    fn read(&self, keygroup: &KeygroupName, id: &str) -> FredResult<Vec<Item>> {
        let keygroups = self.keygroups.read();
        let items = keygroups
            .get(keygroup)
            .ok_or_else(|| missing_keygroup(keygroup))?;

        let found: Vec<Item> = items
            .get(id)
            .map(|versions| live(versions).cloned().collect())
            .unwrap_or_default();

        if found.is_empty() {
            return Err(FredError::not_found(format!(
                "item {} not found in keygroup {}",
                id, keygroup
            )));
        }
        Ok(found)
    }

    fn versions(&self, keygroup: &KeygroupName, id: &str) -> FredResult<Vec<Item>> {
        let keygroups = self.keygroups.read();
        let items = keygroups
            .get(keygroup)
            .ok_or_else(|| missing_keygroup(keygroup))?;
        Ok(items.get(id).cloned().unwrap_or_default())
    }

    fn read_all(&self, keygroup: &KeygroupName) -> FredResult<Vec<Item>> {
        let keygroups = self.keygroups.read();
        let items = keygroups
            .get(keygroup)
            .ok_or_else(|| missing_keygroup(keygroup))?;
        Ok(items.values().flat_map(|v| live(v).cloned()).collect())
    }

    fn ids(&self, keygroup: &KeygroupName) -> FredResult<Vec<String>> {
        let keygroups = self.keygroups.read();
        let items = keygroups
            .get(keygroup)
            .ok_or_else(|| missing_keygroup(keygroup))?;
        Ok(items
            .iter()
            .filter(|(_, versions)| live(versions).next().is_some())
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn exists(&self, keygroup: &KeygroupName, id: &str) -> bool {
        self.keygroups
            .read()
            .get(keygroup)
            .and_then(|items| items.get(id))
            .is_some_and(|versions| live(versions).next().is_some())
    }

    fn update(&self, item: Item) -> FredResult<UpdateOutcome> {
        let mut keygroups = self.keygroups.write();
        let items = keygroups
            .get_mut(&item.keygroup)
            .ok_or_else(|| missing_keygroup(&item.keygroup))?;
        let versions = items.entry(item.id.clone()).or_default();
        Ok(apply(versions, item))
    }

    fn update_local(
        &self,
        self_id: &NodeId,
        mut item: Item,
        seen: Option<&[VectorClock]>,
    ) -> FredResult<(Item, UpdateOutcome)> {
        let mut keygroups = self.keygroups.write();
        let items = keygroups
            .get_mut(&item.keygroup)
            .ok_or_else(|| missing_keygroup(&item.keygroup))?;
        if item.tombstoned && !items.get(&item.id).is_some_and(|v| live(v).next().is_some()) {
            return Err(FredError::not_found(format!(
                "item {} not found in keygroup {}",
                item.id, item.keygroup
            )));
        }
        let versions = items.entry(item.id.clone()).or_default();

        let mut version = VectorClock::new();
        match seen {
            Some(clocks) => clocks.iter().for_each(|c| version.merge(c)),
            None => versions.iter().for_each(|v| version.merge(&v.version)),
        }
        version.tick(self_id.as_str());
        item.version = version;

        let outcome = apply(versions, item.clone());
        Ok((item, outcome))
    }

    fn create_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.keygroups
            .write()
            .entry(keygroup.clone())
            .or_default();
        Ok(())
    }

    fn delete_keygroup(&self, keygroup: &KeygroupName) -> FredResult<()> {
        self.keygroups
            .write()
            .remove(keygroup)
            .map(|_| ())
            .ok_or_else(|| missing_keygroup(keygroup))
    }

    fn exists_keygroup(&self, keygroup: &KeygroupName) -> bool {
        self.keygroups.read().contains_key(keygroup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kg() -> KeygroupName {
        KeygroupName::new("kg1").unwrap()
    }

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        entries.iter().map(|(id, t)| (*id, *t)).collect()
    }

    fn store() -> MemoryItemStore {
        let store = MemoryItemStore::new();
        store.create_keygroup(&kg()).unwrap();
        store
    }

    #[test]
    fn test_concurrent_versions_retained() {
        let store = store();
        store
            .update(Item::new(kg(), "x", "v1", clock(&[("A", 1)])))
            .unwrap();
        let outcome = store
            .update(Item::new(kg(), "x", "v2", clock(&[("B", 1)])))
            .unwrap();
        assert!(outcome.has_conflict());

        let mut values: Vec<String> = store
            .read(&kg(), "x")
            .unwrap()
            .into_iter()
            .map(|i| i.value)
            .collect();
        values.sort();
        assert_eq!(values, vec!["v1", "v2"]);
    }

    #[test]
    fn test_dominating_version_replaces() {
        let store = store();
        store
            .update(Item::new(kg(), "x", "v1", clock(&[("A", 1)])))
            .unwrap();
        let outcome = store
            .update(Item::new(kg(), "x", "v3", clock(&[("A", 2)])))
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Stored {
                replaced: 1,
                siblings: 0
            }
        );

        let items = store.read(&kg(), "x").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].value, "v3");
    }

    #[test]
    fn test_stale_version_dropped() {
        let store = store();
        store
            .update(Item::new(kg(), "x", "new", clock(&[("A", 2)])))
            .unwrap();
        let outcome = store
            .update(Item::new(kg(), "x", "old", clock(&[("A", 1)])))
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Stale);

        let outcome = store
            .update(Item::new(kg(), "x", "dup", clock(&[("A", 2)])))
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Stale);
        assert_eq!(store.read(&kg(), "x").unwrap()[0].value, "new");
    }

    #[test]
    fn test_tombstone_hides_and_blocks_resurrection() {
        let store = store();
        store
            .update(Item::new(kg(), "x", "v1", clock(&[("A", 1)])))
            .unwrap();
        store.delete(&kg(), "x", clock(&[("A", 2)])).unwrap();

        assert!(store.read(&kg(), "x").unwrap_err().is_not_found());
        assert!(!store.exists(&kg(), "x"));
        assert!(store.ids(&kg()).unwrap().is_empty());

        let outcome = store
            .update(Item::new(kg(), "x", "late", clock(&[("A", 1)])))
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Stale);
        assert_eq!(store.version_count(&kg(), "x"), 1);
    }

    #[test]
    fn test_missing_keygroup() {
        let store = MemoryItemStore::new();
        let err = store
            .update(Item::new(kg(), "x", "v", clock(&[("A", 1)])))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.delete_keygroup(&kg()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_local_stamps_under_lock() {
        let store = store();
        let me = NodeId::new("A").unwrap();
        store
            .update(Item::new(kg(), "x", "b", clock(&[("B", 2)])))
            .unwrap();

        let (item, outcome) = store
            .update_local(&me, Item::new(kg(), "x", "mine", VectorClock::new()), None)
            .unwrap();
        assert_eq!(item.version, clock(&[("A", 1), ("B", 2)]));
        assert_eq!(outcome, UpdateOutcome::Stored { replaced: 1, siblings: 0 });

        let (tomb, _) = store
            .update_local(&me, Item::tombstone(kg(), "x", VectorClock::new()), None)
            .unwrap();
        assert_eq!(tomb.version, clock(&[("A", 2), ("B", 2)]));
        let stored = store.versions(&kg(), "x").unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].tombstoned);

        let err = store
            .update_local(&me, Item::tombstone(kg(), "x", VectorClock::new()), None)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_read_all_and_ids_sorted() {
        let store = store();
        for id in ["c", "a", "b"] {
            store
                .update(Item::new(kg(), id, id, clock(&[("A", 1)])))
                .unwrap();
        }
        assert_eq!(store.ids(&kg()).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.read_all(&kg()).unwrap().len(), 3);
    }
}
