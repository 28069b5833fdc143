//! Integration tests for the cache manager: location lifecycle,
//! persistence, maintenance passes, timers, and consumer reads.
//!
//! A [`ManualClock`] drives every "now" the manager sees. Timer tests run
//! on a paused tokio clock, so hours of sleeping pass instantly.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde_json::Value;
use sol_core::azimuth::angular_error;
use sol_core::checkpoint::ReloadOutcome;
use sol_core::clock::{Clock, ManualClock};
use sol_core::config::{LocationConfig, SolConfig};
use sol_core::oracle::{NoaaOracle, OracleError, Site, SunOracle, SunPosition, Transit};
use sol_engine::{CacheManager, EngineError, PassOutcome, TimerPurpose};
use sol_store::{CacheStore, MemoryStore, StoreError};
use sol_types::{CacheEvent, LocationId, SweepDirection};

/// A store whose backend is always down.
#[derive(Debug, Clone, Copy, Default)]
struct OfflineStore;

impl CacheStore for OfflineStore {
    async fn load(&self, _id: LocationId) -> Result<Option<Value>, StoreError> {
        Err(StoreError::Config("store offline".to_owned()))
    }

    async fn save(&self, _id: LocationId, _blob: &Value) -> Result<(), StoreError> {
        Err(StoreError::Config("store offline".to_owned()))
    }

    async fn remove(&self, _id: LocationId) -> Result<(), StoreError> {
        Err(StoreError::Config("store offline".to_owned()))
    }
}

/// A store that rejects the first `failures` saves, then behaves normally.
#[derive(Debug, Clone, Default)]
struct FlakyStore {
    inner: MemoryStore,
    failures: Arc<AtomicUsize>,
}

impl FlakyStore {
    fn failing_saves(inner: MemoryStore, failures: usize) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicUsize::new(failures)),
        }
    }
}

impl CacheStore for FlakyStore {
    async fn load(&self, id: LocationId) -> Result<Option<Value>, StoreError> {
        self.inner.load(id).await
    }

    async fn save(&self, id: LocationId, blob: &Value) -> Result<(), StoreError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Config("store briefly unavailable".to_owned()));
        }
        self.inner.save(id, blob).await
    }

    async fn remove(&self, id: LocationId) -> Result<(), StoreError> {
        self.inner.remove(id).await
    }
}

/// NOAA positions behind a failure switch, counting every call.
#[derive(Debug, Clone, Default)]
struct SwitchedOracle {
    inner: NoaaOracle,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl SwitchedOracle {
    fn check(&self) -> Result<(), OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(OracleError::Computation {
                message: "ephemeris offline".to_owned(),
            });
        }
        Ok(())
    }
}

impl SunOracle for SwitchedOracle {
    fn position(&self, t: DateTime<Utc>, site: &Site) -> Result<SunPosition, OracleError> {
        self.check()?;
        self.inner.position(t, site)
    }

    fn transit(&self, t: DateTime<Utc>, site: &Site) -> Result<Transit, OracleError> {
        self.check()?;
        self.inner.transit(t, site)
    }
}

fn equinox_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 20, 8, 0, 0).unwrap()
}

fn london(id: LocationId) -> LocationConfig {
    let mut config = LocationConfig::new(id, 51.5, -0.12);
    config.name = "London".to_owned();
    config.timezone = "Europe/London".to_owned();
    config
}

fn manager_with<S: CacheStore>(
    store: S,
    clock: &Arc<ManualClock>,
) -> CacheManager<NoaaOracle, S> {
    CacheManager::new(
        NoaaOracle::new(),
        store,
        Arc::clone(clock) as Arc<dyn Clock>,
        &SolConfig::default(),
    )
}

#[tokio::test]
async fn adding_a_location_builds_persists_and_arms_timers() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(MemoryStore::new(), &clock);
    let id = LocationId::new();

    let outcome = manager.add_location(london(id)).await.unwrap();
    assert_eq!(outcome, PassOutcome::Loaded(ReloadOutcome::Initialized));

    let cache = manager.checkpoints(id).await.unwrap();
    assert_eq!(cache.checkpoints().len(), 4);
    assert!(cache.checkpoints().iter().all(|c| c.time > equinox_morning()));
    assert_eq!(manager.store().len().await, 1);
    assert_eq!(
        manager.current_direction(id).await.unwrap(),
        SweepDirection::Increasing
    );

    let mut pending = manager.pending_timers(id);
    pending.sort();
    assert_eq!(
        pending,
        vec![
            TimerPurpose::Checkpoints,
            TimerPurpose::SolarEvent,
            TimerPurpose::SolsticeCurve
        ]
    );
}

#[tokio::test]
async fn restart_restores_the_persisted_cache() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let store = MemoryStore::new();
    let id = LocationId::new();

    let first = manager_with(store.clone(), &clock);
    first.add_location(london(id)).await.unwrap();
    let before = first.checkpoints(id).await.unwrap();
    first.shutdown();

    clock.advance(TimeDelta::hours(1));
    let second = manager_with(store, &clock);
    let outcome = second.add_location(london(id)).await.unwrap();
    assert!(matches!(
        outcome,
        PassOutcome::Loaded(ReloadOutcome::Restored(_))
    ));
    assert_eq!(
        second.checkpoints(id).await.unwrap().checkpoints(),
        before.checkpoints()
    );
}

#[tokio::test]
async fn moved_location_discards_the_persisted_cache() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let store = MemoryStore::new();
    let id = LocationId::new();

    manager_with(store.clone(), &clock)
        .add_location(london(id))
        .await
        .unwrap();

    let mut paris = LocationConfig::new(id, 48.85, 2.35);
    paris.timezone = "Europe/Paris".to_owned();
    let outcome = manager_with(store, &clock).add_location(paris).await.unwrap();

    let PassOutcome::Loaded(ReloadOutcome::Reinitialized { reason }) = outcome else {
        panic!("expected a rebuild, got {outcome:?}");
    };
    assert!(reason.contains("location changed"));
}

#[tokio::test]
async fn offline_store_still_serves_in_memory_state() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(OfflineStore, &clock);
    let id = LocationId::new();

    let outcome = manager.add_location(london(id)).await.unwrap();
    assert_eq!(outcome, PassOutcome::Loaded(ReloadOutcome::Initialized));
    assert_eq!(manager.checkpoints(id).await.unwrap().checkpoints().len(), 4);

    // The window still advances while every save keeps failing.
    let first = manager.checkpoints(id).await.unwrap().checkpoints()[0];
    clock.set(first.time + TimeDelta::seconds(1));
    let PassOutcome::Advanced(advance) = manager.run_maintenance(id).await.unwrap() else {
        panic!("expected an in-place advance");
    };
    assert_eq!(advance.evicted, 1);
    assert!(manager.checkpoints(id).await.unwrap().checkpoints()[0].time > first.time);

    let removed = manager.remove_location(id).await;
    assert!(matches!(removed, Err(EngineError::Store { .. })));
    assert!(manager.location_ids().await.is_empty());
}

#[tokio::test]
async fn week_old_cache_is_rebuilt_by_the_next_pass() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(MemoryStore::new(), &clock);
    let id = LocationId::new();
    manager.add_location(london(id)).await.unwrap();

    clock.advance(TimeDelta::days(14));
    let outcome = manager.run_maintenance(id).await.unwrap();
    assert!(matches!(
        outcome,
        PassOutcome::Loaded(ReloadOutcome::Reinitialized { .. })
    ));
    let cache = manager.checkpoints(id).await.unwrap();
    assert!(cache.checkpoints().iter().all(|c| c.time > clock.now()));
}

#[tokio::test]
async fn removing_a_location_cancels_timers_and_deletes_the_blob() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(MemoryStore::new(), &clock);
    let id = LocationId::new();
    manager.add_location(london(id)).await.unwrap();

    manager.remove_location(id).await.unwrap();

    assert!(manager.pending_timers(id).is_empty());
    assert!(manager.store().is_empty().await);
    assert!(matches!(
        manager.checkpoints(id).await,
        Err(EngineError::LocationNotFound { .. })
    ));
    assert!(matches!(
        manager.remove_location(id).await,
        Err(EngineError::LocationNotFound { .. })
    ));
}

#[tokio::test]
async fn maintain_all_reports_every_location() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(MemoryStore::new(), &clock);
    let a = LocationId::new();
    let b = LocationId::new();
    manager.add_location(london(a)).await.unwrap();
    manager
        .add_location(LocationConfig::new(b, 10.0, 0.0))
        .await
        .unwrap();

    let results = manager.maintain_all().await;
    assert_eq!(results.len(), 2);
    for (_, result) in &results {
        let outcome = result.as_ref().unwrap();
        assert!(!outcome.changed());
    }
}

#[tokio::test]
async fn solar_event_read_reports_whether_it_was_cached() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(MemoryStore::new(), &clock);
    let id = LocationId::new();
    manager.add_location(london(id)).await.unwrap();

    let first = manager.solar_event(id).await.unwrap();
    assert!(first.from_cache);
    let curve = manager.solstice_curve(id).await.unwrap();
    assert!(curve.from_cache);
    assert!(curve.entry.normalized.abs() < 0.05);

    clock.advance(TimeDelta::minutes(90));
    let second = manager.solar_event(id).await.unwrap();
    assert!(!second.from_cache);
    let drift = second.entry.next_event_time - first.entry.next_event_time;
    assert!(drift.num_seconds().abs() <= 1);
    assert!(!manager.solstice_curve(id).await.unwrap().from_cache);
}

#[tokio::test]
async fn azimuth_reads_stay_inside_the_checkpoint_window() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(MemoryStore::new(), &clock);
    let id = LocationId::new();
    manager.add_location(london(id)).await.unwrap();
    let next = manager.checkpoints(id).await.unwrap().checkpoints()[0];

    let solution = manager.next_time_at_azimuth(id, 150.0).await.unwrap();
    assert!(solution.metrics.converged);
    assert!(solution.time > equinox_morning() && solution.time < next.time);

    let site = london(id).site();
    let current = NoaaOracle::new().azimuth(equinox_morning(), &site).unwrap();
    let step = manager.next_azimuth_step(id, current).await.unwrap();
    let expected = ((current / 5.0).round() * 5.0 + 5.0).rem_euclid(360.0);
    assert!(angular_error(step.azimuth, expected) < 1e-9);
    assert!(step.blocked_by.is_none());

    // Just short of the noon checkpoint, the checkpoint is the target.
    let blocked = manager.next_azimuth_step(id, 177.6).await.unwrap();
    assert_eq!(blocked.blocked_by, Some(next));
    assert!(angular_error(blocked.azimuth, next.azimuth) < 1e-9);
    assert!(!blocked.is_reversal());
}

#[tokio::test]
async fn elevation_step_climbs_toward_noon() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(MemoryStore::new(), &clock);
    let id = LocationId::new();
    manager.add_location(london(id)).await.unwrap();

    let site = london(id).site();
    let current = NoaaOracle::new()
        .position(equinox_morning(), &site)
        .unwrap()
        .elevation;
    let step = manager.next_elevation_step(id, current).await.unwrap();
    let target = step.elevation.unwrap();
    assert!(target > current && target <= current + 1.01);
    assert!(step.time > equinox_morning());
    assert!(step.time < equinox_morning() + TimeDelta::hours(1));
}

#[tokio::test]
async fn unknown_location_is_reported() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(MemoryStore::new(), &clock);
    let id = LocationId::new();

    assert!(matches!(
        manager.solar_event(id).await,
        Err(EngineError::LocationNotFound { id: missing }) if missing == id
    ));
    assert!(matches!(
        manager.run_maintenance(id).await,
        Err(EngineError::LocationNotFound { .. })
    ));
}

#[tokio::test]
async fn invalid_location_is_rejected_before_registration() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(MemoryStore::new(), &clock);
    let mut config = london(LocationId::new());
    config.timezone = "Mars/Olympus_Mons".to_owned();

    assert!(matches!(
        manager.add_location(config).await,
        Err(EngineError::Config { .. })
    ));
    assert!(manager.location_ids().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn checkpoint_timer_advances_the_window() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(MemoryStore::new(), &clock);
    let id = LocationId::new();
    manager.add_location(london(id)).await.unwrap();
    let first = manager.checkpoints(id).await.unwrap().checkpoints()[0];

    let mut events = manager.subscribe();
    let dispatcher = manager.start().unwrap();
    assert!(matches!(manager.start(), Err(EngineError::DispatcherRunning)));

    // Wall clock jumps past the checkpoint; the paused runtime then lets
    // the armed timer fire.
    clock.set(first.time + TimeDelta::seconds(1));
    let updated = tokio::time::timeout(Duration::from_secs(86_400), async {
        loop {
            if let CacheEvent::CheckpointsUpdated { checkpoints, .. } = events.recv().await.unwrap() {
                return checkpoints;
            }
        }
    })
    .await
    .expect("checkpoint timer never fired");

    assert_eq!(updated.len(), 4);
    assert!(updated[0].time > first.time);
    assert_eq!(
        manager.checkpoints(id).await.unwrap().last_known_state().time,
        first.time
    );

    manager.shutdown();
    dispatcher.await.unwrap();
    assert!(manager.pending_timers(id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn wake_after_removal_is_ignored() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let manager = manager_with(MemoryStore::new(), &clock);
    let id = LocationId::new();
    manager.add_location(london(id)).await.unwrap();
    let dispatcher = manager.start().unwrap();
    let mut events = manager.subscribe();

    manager.remove_location(id).await.unwrap();
    clock.advance(TimeDelta::days(1));
    tokio::time::sleep(Duration::from_secs(2 * 86_400)).await;

    assert!(events.try_recv().is_err());
    assert!(manager.store().is_empty().await);

    manager.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_pass_retries_after_five_minutes() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let oracle = SwitchedOracle::default();
    oracle.failing.store(true, Ordering::SeqCst);
    let failing = Arc::clone(&oracle.failing);
    let manager = CacheManager::new(
        oracle,
        MemoryStore::new(),
        Arc::clone(&clock) as Arc<dyn Clock>,
        &SolConfig::default(),
    );
    let id = LocationId::new();

    let started = tokio::time::Instant::now();
    let result = manager.add_location(london(id)).await;
    assert!(matches!(result, Err(EngineError::Cache { .. })));
    assert!(manager.pending_timers(id).contains(&TimerPurpose::Checkpoints));
    assert!(manager.store().is_empty().await);

    failing.store(false, Ordering::SeqCst);
    let mut events = manager.subscribe();
    let dispatcher = manager.start().unwrap();

    tokio::time::timeout(Duration::from_secs(3_600), async {
        loop {
            if let CacheEvent::CheckpointsUpdated { .. } = events.recv().await.unwrap() {
                return;
            }
        }
    })
    .await
    .expect("retry never ran");

    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(300), "retried after {waited:?}");
    assert!(waited < Duration::from_secs(302), "retried after {waited:?}");
    assert_eq!(manager.store().len().await, 1);

    manager.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn empty_window_wakes_after_an_hour() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let oracle = SwitchedOracle::default();
    let calls = Arc::clone(&oracle.calls);
    let mut config = SolConfig::default();
    config.search.checkpoints.scan.horizon_days = 0;
    let manager = CacheManager::new(
        oracle,
        MemoryStore::new(),
        Arc::clone(&clock) as Arc<dyn Clock>,
        &config,
    );
    let id = LocationId::new();

    manager.add_location(london(id)).await.unwrap();
    assert!(manager.checkpoints(id).await.unwrap().checkpoints().is_empty());
    let dispatcher = manager.start().unwrap();
    let settled = calls.load(Ordering::SeqCst);

    // Solar event and solstice timers sit hours out; only the checkpoint
    // fallback can touch the oracle within the first hour.
    tokio::time::sleep(Duration::from_secs(3_599)).await;
    assert_eq!(calls.load(Ordering::SeqCst), settled);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(calls.load(Ordering::SeqCst) > settled);
    assert!(manager.pending_timers(id).contains(&TimerPurpose::Checkpoints));

    manager.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test]
async fn failed_save_is_retried_on_the_next_pass() {
    let clock = Arc::new(ManualClock::new(equinox_morning()));
    let backing = MemoryStore::new();
    let manager = manager_with(FlakyStore::failing_saves(backing.clone(), 1), &clock);
    let id = LocationId::new();

    manager.add_location(london(id)).await.unwrap();
    assert!(backing.is_empty().await);

    // Nothing new to scan, but the unsaved window is written anyway.
    let outcome = manager.run_maintenance(id).await.unwrap();
    assert!(!outcome.changed());
    assert_eq!(backing.len().await, 1);
    assert!(backing.load(id).await.unwrap().is_some());
}
