//! Integration tests for the `sol-store` adapters.
//!
//! The `Dragonfly` test needs a live server and is `#[ignore]`d. Run with:
//!
//! ```bash
//! docker run -d -p 6379:6379 docker.dragonflydb.io/dragonflydb/dragonfly
//! cargo test -p sol-store -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]

use chrono::{Duration, TimeZone, Utc};
use sol_store::{CacheStore, DragonflyStore, FileStore, MemoryStore, StoreBackend};
use sol_types::{
    CacheRecord, Checkpoint, CheckpointCache, CheckpointKind, LastKnownState, LocationId,
    LocationSnapshot, SweepDirection,
};

/// `Dragonfly` URL for the local Docker instance.
const DRAGONFLY_URL: &str = "redis://localhost:6379";

fn sample_cache() -> CheckpointCache {
    let noon = Utc.with_ymd_and_hms(2024, 6, 20, 10, 40, 0).unwrap();
    let anchor = LastKnownState {
        time: noon,
        azimuth: 12.5,
        direction: SweepDirection::Decreasing,
    };
    let checkpoints = vec![
        Checkpoint {
            time: noon + Duration::hours(2),
            azimuth: 291.0,
            direction: SweepDirection::Increasing,
            kind: CheckpointKind::Reversal,
        },
        Checkpoint {
            time: noon + Duration::hours(24),
            azimuth: 13.1,
            direction: SweepDirection::Increasing,
            kind: CheckpointKind::Noon,
        },
    ];
    let location = LocationSnapshot {
        latitude: 21.3,
        longitude: -157.8,
    };
    CheckpointCache::from_parts(anchor, checkpoints, location, 4)
}

async fn assert_round_trip<S: CacheStore>(store: &S) {
    let id = LocationId::new();
    let cache = sample_cache();
    let blob = serde_json::to_value(CacheRecord::from_cache(&cache)).unwrap();

    store.save(id, &blob).await.unwrap();
    let loaded = store.load(id).await.unwrap().expect("blob should exist");
    let record: CacheRecord = serde_json::from_value(loaded).unwrap();
    let restored = record.into_cache(4);

    assert_eq!(restored.last_known_state(), cache.last_known_state());
    assert_eq!(restored.checkpoints(), cache.checkpoints());

    store.remove(id).await.unwrap();
    assert!(store.load(id).await.unwrap().is_none());
}

#[tokio::test]
async fn memory_backend_round_trips_a_cache() {
    assert_round_trip(&StoreBackend::Memory(MemoryStore::new())).await;
}

#[tokio::test]
async fn file_backend_round_trips_a_cache() {
    let dir = std::env::temp_dir().join(format!("sol-store-it-{}", LocationId::new()));
    assert_round_trip(&StoreBackend::File(FileStore::new(&dir))).await;
    tokio::fs::remove_dir_all(dir).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Dragonfly instance"]
async fn dragonfly_backend_round_trips_a_cache() {
    let store = DragonflyStore::connect(DRAGONFLY_URL)
        .await
        .expect("Dragonfly should be reachable");
    assert_round_trip(&StoreBackend::Dragonfly(store)).await;
}
