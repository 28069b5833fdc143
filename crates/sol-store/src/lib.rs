//! Persistence adapters for the Sol checkpoint cache.
//!
//! The engine only needs three operations from a store: load, save, and
//! remove one JSON blob per location. [`CacheStore`] captures that contract
//! and three adapters implement it:
//!
//! - [`MemoryStore`] -- process-local map, used by tests and ephemeral runs.
//! - [`FileStore`] -- one JSON file per location in a data directory.
//! - [`DragonflyStore`] -- one key per location in `Dragonfly`/Redis.
//!
//! [`StoreBackend`] selects one of them at runtime.

pub mod dragonfly;
pub mod error;
pub mod file;
pub mod memory;

use std::future::Future;

use serde_json::Value;
use sol_types::LocationId;

pub use dragonfly::DragonflyStore;
pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;

/// Key-value persistence for serialized checkpoint caches.
///
/// Blobs are opaque JSON values; schema validation is the caller's job.
pub trait CacheStore: Send + Sync + 'static {
    /// Load the blob stored for `id`, or `None` if nothing is stored.
    fn load(
        &self,
        id: LocationId,
    ) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Store `blob` for `id`, replacing any previous value.
    fn save(&self, id: LocationId, blob: &Value)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete the blob for `id`. Removing a missing blob is not an error.
    fn remove(&self, id: LocationId) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Runtime choice of store adapter.
#[derive(Clone)]
pub enum StoreBackend {
    /// In-process map.
    Memory(MemoryStore),
    /// JSON files on disk.
    File(FileStore),
    /// `Dragonfly`/Redis keys.
    Dragonfly(DragonflyStore),
}

impl CacheStore for StoreBackend {
    async fn load(&self, id: LocationId) -> Result<Option<Value>, StoreError> {
        match self {
            Self::Memory(store) => store.load(id).await,
            Self::File(store) => store.load(id).await,
            Self::Dragonfly(store) => store.load(id).await,
        }
    }

    async fn save(&self, id: LocationId, blob: &Value) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.save(id, blob).await,
            Self::File(store) => store.save(id, blob).await,
            Self::Dragonfly(store) => store.save(id, blob).await,
        }
    }

    async fn remove(&self, id: LocationId) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.remove(id).await,
            Self::File(store) => store.remove(id).await,
            Self::Dragonfly(store) => store.remove(id).await,
        }
    }
}
