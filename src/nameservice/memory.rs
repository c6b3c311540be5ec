//! In-memory coordination store.

use crate::core::error::FredResult;
use crate::nameservice::CoordinationStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Coordination store backed by an ordered map. Linearizable within one
/// process; share it through `Arc` to simulate a cluster.
#[derive(Debug, Default)]
pub struct MemoryCoordinationStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryCoordinationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the store has no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn put(&self, key: &str, value: &str) -> FredResult<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> FredResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> FredResult<Vec<(String, String)>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> FredResult<usize> {
        let mut entries = self.entries.write();
        let doomed: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_operations() {
        let store = MemoryCoordinationStore::new();
        store.put("kg-a-node-2", "ok").await.unwrap();
        store.put("kg-a-node-1", "ok").await.unwrap();
        store.put("kg-a-status", "created").await.unwrap();
        store.put("kg-ab-node-1", "ok").await.unwrap();

        let keys: Vec<String> = store
            .get_prefix("kg-a-node-")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["kg-a-node-1", "kg-a-node-2"]);

        assert_eq!(store.delete_prefix("kg-a-node-").await.unwrap(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get("kg-ab-node-1").await.unwrap().as_deref(),
            Some("ok")
        );
    }
}
