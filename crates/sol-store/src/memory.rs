//! In-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use sol_types::LocationId;
use tokio::sync::RwLock;

use crate::{CacheStore, StoreError};

/// Process-local blob map. Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<RwLock<BTreeMap<LocationId, Value>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Whether the store holds no blobs.
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

impl CacheStore for MemoryStore {
    async fn load(&self, id: LocationId) -> Result<Option<Value>, StoreError> {
        Ok(self.blobs.read().await.get(&id).cloned())
    }

    async fn save(&self, id: LocationId, blob: &Value) -> Result<(), StoreError> {
        self.blobs.write().await.insert(id, blob.clone());
        Ok(())
    }

    async fn remove(&self, id: LocationId) -> Result<(), StoreError> {
        self.blobs.write().await.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn save_load_remove() {
        let store = MemoryStore::new();
        let id = LocationId::new();
        assert!(store.load(id).await.unwrap().is_none());

        store.save(id, &json!({"version": 2})).await.unwrap();
        assert_eq!(store.load(id).await.unwrap(), Some(json!({"version": 2})));
        assert_eq!(store.len().await, 1);

        store.remove(id).await.unwrap();
        assert!(store.is_empty().await);
        store.remove(id).await.unwrap();
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        let id = LocationId::new();
        store.save(id, &json!(1)).await.unwrap();
        assert_eq!(other.load(id).await.unwrap(), Some(json!(1)));
    }
}
