//! Versioned persisted form of a [`CheckpointCache`].
//!
//! Timestamps are written as RFC 3339 strings. The version field lets a
//! loader reject blobs written by an incompatible layout and rebuild the
//! cache from scratch instead.

use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, CheckpointCache, LastKnownState, LocationSnapshot};

/// Layout version written by this crate.
///
/// Version 1 stored a bare `reversals` list without noon checkpoints.
pub const CACHE_SCHEMA_VERSION: u32 = 2;

/// Serialized checkpoint cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Layout version, see [`CACHE_SCHEMA_VERSION`].
    pub version: u32,
    /// The anchor at save time.
    pub last_known_state: LastKnownState,
    /// Upcoming checkpoints at save time.
    pub checkpoints: Vec<Checkpoint>,
    /// Position the checkpoints were computed for.
    pub location: LocationSnapshot,
}

impl CacheRecord {
    /// Snapshot a cache at the current layout version.
    pub fn from_cache(cache: &CheckpointCache) -> Self {
        Self {
            version: CACHE_SCHEMA_VERSION,
            last_known_state: *cache.last_known_state(),
            checkpoints: cache.checkpoints().to_vec(),
            location: *cache.location(),
        }
    }

    /// Rebuild a cache with the given window capacity.
    pub fn into_cache(self, capacity: usize) -> CheckpointCache {
        CheckpointCache::from_parts(
            self.last_known_state,
            self.checkpoints,
            self.location,
            capacity,
        )
    }
}
