//! The cache manager service.
//!
//! [`CacheManager`] owns every per-location cache, the maintenance timers,
//! and the notification bus. Each location sits behind its own async mutex,
//! so a maintenance pass, a consumer read, and a removal for the same
//! location never interleave. Timers only send [`Wake`] messages; a single
//! dispatcher task receives them and runs the matching pass.
//!
//! Maintenance errors never escape a timer-driven pass. They are logged,
//! the in-memory state keeps whatever it had, and a retry is armed.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use sol_core::checkpoint::{self, AdvanceOutcome, CacheError, ReloadOutcome};
use sol_core::clock::Clock;
use sol_core::config::{LocationConfig, MaintenanceConfig, SearchConfig, SolConfig};
use sol_core::oracle::{Site, SunOracle};
use sol_core::solar_event::{SolarEventCache, SolarEventReading};
use sol_core::solstice::{SolsticeCurveCache, SolsticeCurveReading, next_local_refresh};
use sol_core::solver::{self, AzimuthSolution};
use sol_core::stepping::{self, AzimuthStep, ElevationStep};
use sol_store::CacheStore;
use sol_types::{
    CacheEvent, CheckpointCache, LocationId, SolarEventEntry, SolsticeCurveEntry, SweepDirection,
};
use tokio::sync::{Mutex, Notify, OwnedMutexGuard, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::timers::{TimerPurpose, Timers, Wake};

/// How a checkpoint maintenance pass changed the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The cache was restored from the store or built from scratch.
    Loaded(ReloadOutcome),
    /// The live cache was advanced in place.
    Advanced(AdvanceOutcome),
}

impl PassOutcome {
    /// Whether the checkpoint window differs from before the pass.
    pub const fn changed(&self) -> bool {
        match self {
            Self::Loaded(_) => true,
            Self::Advanced(outcome) => outcome.evicted > 0 || outcome.added > 0,
        }
    }
}

/// Everything held for one location.
struct LocationState {
    config: LocationConfig,
    site: Site,
    tz: Tz,
    checkpoints: Option<CheckpointCache>,
    solar_event: SolarEventCache,
    solstice: SolsticeCurveCache,
    unsaved: bool,
    removed: bool,
}

impl LocationState {
    fn new(config: LocationConfig, tz: Tz) -> Self {
        Self {
            site: config.site(),
            config,
            tz,
            checkpoints: None,
            solar_event: SolarEventCache::new(),
            solstice: SolsticeCurveCache::new(),
            unsaved: false,
            removed: false,
        }
    }

    fn cache(&self) -> Result<&CheckpointCache, EngineError> {
        self.checkpoints
            .as_ref()
            .ok_or(EngineError::CacheUnavailable { id: self.config.id })
    }
}

struct Inner<O, S> {
    oracle: O,
    store: S,
    clock: Arc<dyn Clock>,
    search: SearchConfig,
    maintenance: MaintenanceConfig,
    locations: RwLock<BTreeMap<LocationId, Arc<Mutex<LocationState>>>>,
    timers: Timers,
    bus: broadcast::Sender<CacheEvent>,
    wakes: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Wake>>>,
    shutdown: Notify,
}

/// Location-keyed owner of all caches, timers, and the event bus.
///
/// Cloning is cheap; clones share the same state.
pub struct CacheManager<O, S> {
    inner: Arc<Inner<O, S>>,
}

impl<O, S> Clone for CacheManager<O, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O, S> CacheManager<O, S>
where
    O: SunOracle + 'static,
    S: CacheStore,
{
    /// Create a manager with no locations.
    ///
    /// Search tuning and timer delays are taken from `config`; its
    /// locations are not added. Call [`Self::start`] to begin handling
    /// timer wakes.
    pub fn new(oracle: O, store: S, clock: Arc<dyn Clock>, config: &SolConfig) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (bus, _) = broadcast::channel(config.maintenance.bus_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                oracle,
                store,
                clock,
                search: config.search,
                maintenance: config.maintenance,
                locations: RwLock::new(BTreeMap::new()),
                timers: Timers::new(wake_tx),
                bus,
                wakes: std::sync::Mutex::new(Some(wake_rx)),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Spawn the dispatcher that turns timer wakes into maintenance passes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DispatcherRunning`] if it was already started.
    pub fn start(&self) -> Result<JoinHandle<()>, EngineError> {
        let wakes = self
            .inner
            .wakes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(EngineError::DispatcherRunning)?;
        let manager = self.clone();
        Ok(tokio::spawn(async move { manager.dispatch(wakes).await }))
    }

    /// Cancel every timer and stop the dispatcher.
    pub fn shutdown(&self) {
        self.inner.timers.cancel_all();
        self.inner.shutdown.notify_one();
        tracing::info!("Cache manager shutting down");
    }

    /// Subscribe to cache notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.bus.subscribe()
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Ids of every registered location.
    pub async fn location_ids(&self) -> Vec<LocationId> {
        self.inner.locations.read().await.keys().copied().collect()
    }

    /// Timer purposes still waiting to fire for `id`.
    pub fn pending_timers(&self, id: LocationId) -> Vec<TimerPurpose> {
        self.inner.timers.pending(id)
    }

    // ----------------------------------------------------------------
    // Location lifecycle
    // ----------------------------------------------------------------

    /// Register a location, or replace one with the same id, and bring
    /// all three caches up to date.
    ///
    /// The checkpoint cache is restored from the store when the persisted
    /// blob is still valid for this position. Solar event and solstice
    /// failures are logged and retried; only a checkpoint failure is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for an invalid location, or the
    /// checkpoint pass error. The location stays registered either way
    /// once validation passes, with a retry armed.
    pub async fn add_location(&self, config: LocationConfig) -> Result<PassOutcome, EngineError> {
        config.validate()?;
        let tz = config.time_zone()?;
        let id = config.id;
        tracing::info!(
            location = %id,
            name = %config.name,
            latitude = config.latitude,
            longitude = config.longitude,
            timezone = %tz,
            "Adding location"
        );

        let slot = Arc::new(Mutex::new(LocationState::new(config, tz)));
        let previous = self
            .inner
            .locations
            .write()
            .await
            .insert(id, Arc::clone(&slot));
        if let Some(previous) = previous {
            previous.lock().await.removed = true;
            self.inner.timers.cancel_location(id);
            tracing::info!(location = %id, "Replaced existing location");
        }

        let mut guard = slot.lock().await;
        let outcome = self.checkpoint_pass(id, &mut guard).await;
        if let Err(e) = self.solar_event_pass(id, &mut guard) {
            tracing::debug!(location = %id, error = %e, "Solar event pass deferred to retry");
        }
        if let Err(e) = self.solstice_pass(id, &mut guard) {
            tracing::debug!(location = %id, error = %e, "Solstice pass deferred to retry");
        }
        outcome
    }

    /// Unregister a location, cancel its timers, and delete its blob.
    ///
    /// Runs under the location lock, so no pass for this location can be
    /// in flight or start afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LocationNotFound`] for an unknown id, or
    /// [`EngineError::Store`] if the blob could not be deleted. Timers and
    /// in-memory state are gone in both cases.
    pub async fn remove_location(&self, id: LocationId) -> Result<(), EngineError> {
        let slot = self.slot(id).await?;
        let mut state = slot.lock().await;
        if state.removed {
            return Err(EngineError::LocationNotFound { id });
        }
        state.removed = true;
        state.checkpoints = None;
        let cancelled = self.inner.timers.cancel_location(id);

        {
            let mut locations = self.inner.locations.write().await;
            if locations.get(&id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                locations.remove(&id);
            }
        }

        self.inner.store.remove(id).await?;
        tracing::info!(location = %id, cancelled_timers = cancelled, "Location removed");
        Ok(())
    }

    // ----------------------------------------------------------------
    // Maintenance
    // ----------------------------------------------------------------

    /// Run a checkpoint maintenance pass for one location now.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LocationNotFound`] for an unknown id, or the
    /// pass error (already logged, retry armed).
    pub async fn run_maintenance(&self, id: LocationId) -> Result<PassOutcome, EngineError> {
        let mut state = self.lock(id).await?;
        self.checkpoint_pass(id, &mut state).await
    }

    /// Run a checkpoint maintenance pass for every location.
    ///
    /// Passes for different locations interleave on the calling task; each
    /// location's result is reported separately, so one failing location
    /// does not stop the others.
    pub async fn maintain_all(&self) -> Vec<(LocationId, Result<PassOutcome, EngineError>)> {
        let ids = self.location_ids().await;
        let results: Vec<_> = join_all(
            ids.into_iter()
                .map(|id| async move { (id, self.run_maintenance(id).await) }),
        )
        .await;
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        tracing::info!(
            locations = results.len(),
            failed,
            "Maintenance pass complete"
        );
        results
    }

    async fn dispatch(self, mut wakes: mpsc::UnboundedReceiver<Wake>) {
        tracing::info!("Wake dispatcher started");
        loop {
            tokio::select! {
                () = self.inner.shutdown.notified() => {
                    tracing::info!("Wake dispatcher stopping");
                    return;
                }
                wake = wakes.recv() => {
                    let Some(wake) = wake else {
                        tracing::debug!("Wake channel closed");
                        return;
                    };
                    self.handle_wake(wake).await;
                }
            }
        }
    }

    async fn handle_wake(&self, wake: Wake) {
        let Wake { location, purpose } = wake;
        let Ok(mut state) = self.lock(location).await else {
            tracing::debug!(%location, %purpose, "Wake for unknown location ignored");
            return;
        };
        tracing::debug!(%location, %purpose, "Handling wake");
        let result = match purpose {
            TimerPurpose::Checkpoints => self.checkpoint_pass(location, &mut state).await.map(drop),
            TimerPurpose::SolarEvent => self.solar_event_pass(location, &mut state).map(drop),
            TimerPurpose::SolsticeCurve => self.solstice_pass(location, &mut state).map(drop),
        };
        if let Err(e) = result {
            tracing::debug!(%location, %purpose, error = %e, "Wake handled with error");
        }
    }

    /// Evict, refill, persist, publish, and rearm; retry on failure.
    async fn checkpoint_pass(
        &self,
        id: LocationId,
        state: &mut LocationState,
    ) -> Result<PassOutcome, EngineError> {
        let now = self.now();
        let outcome = match self.update_checkpoints(id, state, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(location = %id, error = %e, "Checkpoint maintenance failed");
                self.arm_retry(id, TimerPurpose::Checkpoints);
                return Err(e);
            }
        };
        let Some(cache) = state.checkpoints.as_ref() else {
            return Err(EngineError::CacheUnavailable { id });
        };

        if outcome.changed() || state.unsaved {
            state.unsaved = !self.persist(id, cache).await;
        }
        if outcome.changed() {
            self.publish(CacheEvent::CheckpointsUpdated {
                location: id,
                last_known_state: *cache.last_known_state(),
                checkpoints: cache.checkpoints().to_vec(),
                updated_at: now,
            });
        }

        let delay = cache
            .checkpoints()
            .first()
            .map_or_else(|| self.fallback_delay(), |c| self.delay_until(c.time, now));
        self.inner.timers.arm(id, TimerPurpose::Checkpoints, delay);

        tracing::debug!(
            location = %id,
            outcome = ?outcome,
            checkpoints = cache.checkpoints().len(),
            direction = %cache.current_direction(now),
            "Checkpoint maintenance done"
        );
        Ok(outcome)
    }

    async fn update_checkpoints(
        &self,
        id: LocationId,
        state: &mut LocationState,
        now: DateTime<Utc>,
    ) -> Result<PassOutcome, EngineError> {
        let oracle = &self.inner.oracle;
        let settings = &self.inner.search.checkpoints;

        if let Some(cache) = state.checkpoints.as_mut() {
            return match checkpoint::advance(oracle, &state.site, cache, now, settings) {
                Ok(outcome) => Ok(PassOutcome::Advanced(outcome)),
                Err(stale @ CacheError::Stale { .. }) => {
                    tracing::warn!(location = %id, reason = %stale, "Rebuilding checkpoint cache");
                    *cache = checkpoint::initialize(
                        oracle,
                        &state.site,
                        state.config.cache_length,
                        now,
                        settings,
                    )?;
                    Ok(PassOutcome::Loaded(ReloadOutcome::Reinitialized {
                        reason: stale.to_string(),
                    }))
                }
                Err(e) => Err(e.into()),
            };
        }

        let blob = match self.inner.store.load(id).await {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(location = %id, error = %e, "Failed to load persisted cache");
                None
            }
        };
        let (cache, outcome) = checkpoint::load_or_init(
            oracle,
            &state.site,
            blob.as_ref(),
            state.config.cache_length,
            now,
            settings,
        )?;
        tracing::info!(location = %id, outcome = ?outcome, "Checkpoint cache loaded");
        state.checkpoints = Some(cache);
        Ok(PassOutcome::Loaded(outcome))
    }

    /// Save the cache. Returns `false` if it was not saved; the next pass
    /// tries again.
    async fn persist(&self, id: LocationId, cache: &CheckpointCache) -> bool {
        let blob = match checkpoint::encode_record(cache) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(location = %id, error = %e, "Failed to encode checkpoint cache");
                return false;
            }
        };
        match self.inner.store.save(id, &blob).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(location = %id, error = %e, "Failed to persist checkpoint cache");
                false
            }
        }
    }

    fn solar_event_pass(
        &self,
        id: LocationId,
        state: &mut LocationState,
    ) -> Result<SolarEventEntry, EngineError> {
        let now = self.now();
        match state.solar_event.refresh(&self.inner.oracle, &state.site, now) {
            Ok(entry) => {
                self.solar_event_updated(id, entry, now);
                Ok(entry)
            }
            Err(e) => {
                tracing::warn!(location = %id, error = %e, "Solar event refresh failed");
                self.arm_retry(id, TimerPurpose::SolarEvent);
                Err(e.into())
            }
        }
    }

    fn solar_event_updated(&self, id: LocationId, entry: SolarEventEntry, now: DateTime<Utc>) {
        self.publish(CacheEvent::SolarEventUpdated {
            location: id,
            entry,
        });
        let delay = self.delay_until(entry.next_event_time, now);
        self.inner.timers.arm(id, TimerPurpose::SolarEvent, delay);
    }

    fn solstice_pass(
        &self,
        id: LocationId,
        state: &mut LocationState,
    ) -> Result<SolsticeCurveEntry, EngineError> {
        let now = self.now();
        match state.solstice.refresh(
            &self.inner.oracle,
            &state.site,
            state.tz,
            now,
            &self.inner.search.crossing,
        ) {
            Ok(entry) => {
                self.solstice_updated(id, entry, state.tz, now);
                Ok(entry)
            }
            Err(e) => {
                tracing::warn!(location = %id, error = %e, "Solstice curve refresh failed");
                self.arm_retry(id, TimerPurpose::SolsticeCurve);
                Err(e.into())
            }
        }
    }

    fn solstice_updated(&self, id: LocationId, entry: SolsticeCurveEntry, tz: Tz, now: DateTime<Utc>) {
        self.publish(CacheEvent::SolsticeCurveUpdated {
            location: id,
            entry,
        });
        let delay = self.delay_until(next_local_refresh(now, tz), now);
        self.inner.timers.arm(id, TimerPurpose::SolsticeCurve, delay);
    }

    // ----------------------------------------------------------------
    // Reads
    // ----------------------------------------------------------------

    /// Snapshot of the checkpoint cache, building it first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LocationNotFound`] for an unknown id, or the
    /// error from building the cache.
    pub async fn checkpoints(&self, id: LocationId) -> Result<CheckpointCache, EngineError> {
        let mut state = self.lock(id).await?;
        self.ensure_checkpoints(id, &mut state).await?;
        state.cache().cloned()
    }

    /// Sweep direction in effect now.
    ///
    /// # Errors
    ///
    /// See [`Self::checkpoints`].
    pub async fn current_direction(&self, id: LocationId) -> Result<SweepDirection, EngineError> {
        let mut state = self.lock(id).await?;
        self.ensure_checkpoints(id, &mut state).await?;
        Ok(state.cache()?.current_direction(self.now()))
    }

    /// The next instant the sun reaches `target_azimuth`, searched up to the
    /// next checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Search`] if the bearing is not reached before
    /// the next checkpoint, or see [`Self::checkpoints`].
    pub async fn next_time_at_azimuth(
        &self,
        id: LocationId,
        target_azimuth: f64,
    ) -> Result<AzimuthSolution, EngineError> {
        let mut state = self.lock(id).await?;
        self.ensure_checkpoints(id, &mut state).await?;
        let solution = solver::next_time_at_azimuth(
            &self.inner.oracle,
            &state.site,
            target_azimuth,
            self.now(),
            state.cache()?,
            &self.inner.search.solver,
        )?;
        log_solution(id, &solution);
        Ok(solution)
    }

    /// The instant the sun reaches `target_azimuth` within a caller-chosen
    /// window, minutes. `None` uses the configured default window.
    ///
    /// # Errors
    ///
    /// See [`Self::next_time_at_azimuth`].
    pub async fn time_at_azimuth(
        &self,
        id: LocationId,
        target_azimuth: f64,
        window_minutes: Option<f64>,
    ) -> Result<AzimuthSolution, EngineError> {
        let mut state = self.lock(id).await?;
        self.ensure_checkpoints(id, &mut state).await?;
        let solution = solver::solve_target_time(
            &self.inner.oracle,
            &state.site,
            target_azimuth,
            self.now(),
            window_minutes,
            Some(state.cache()?),
            &self.inner.search.solver,
        )?;
        log_solution(id, &solution);
        Ok(solution)
    }

    /// The next solar noon or midnight, recomputed when stale.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LocationNotFound`] for an unknown id, or
    /// [`EngineError::Oracle`] if recomputing fails.
    pub async fn solar_event(&self, id: LocationId) -> Result<SolarEventReading, EngineError> {
        let mut guard = self.lock(id).await?;
        let state = &mut *guard;
        let now = self.now();
        let reading = state
            .solar_event
            .get_or_refresh(&self.inner.oracle, &state.site, now)?;
        if !reading.from_cache {
            self.solar_event_updated(id, reading.entry, now);
        }
        Ok(reading)
    }

    /// The seasonal curve position, recomputed when stale.
    ///
    /// # Errors
    ///
    /// See [`Self::solar_event`].
    pub async fn solstice_curve(&self, id: LocationId) -> Result<SolsticeCurveReading, EngineError> {
        let mut guard = self.lock(id).await?;
        let state = &mut *guard;
        let now = self.now();
        let reading = state.solstice.get_or_refresh(
            &self.inner.oracle,
            &state.site,
            state.tz,
            now,
            &self.inner.search.crossing,
        )?;
        if !reading.from_cache {
            self.solstice_updated(id, reading.entry, state.tz, now);
        }
        Ok(reading)
    }

    /// The next azimuth step from `current_azimuth`, stopped at the next
    /// checkpoint when it lies in between.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidStep`] if the configured step is
    /// unusable, or see [`Self::checkpoints`].
    pub async fn next_azimuth_step(
        &self,
        id: LocationId,
        current_azimuth: f64,
    ) -> Result<AzimuthStep, EngineError> {
        let mut state = self.lock(id).await?;
        self.ensure_checkpoints(id, &mut state).await?;
        let step = state.config.azimuth_step;
        stepping::next_azimuth_step(state.cache()?, self.now(), current_azimuth, step)
            .ok_or(EngineError::InvalidStep { id, step })
    }

    /// The next elevation step from `current_elevation` toward the next
    /// solar event.
    ///
    /// # Errors
    ///
    /// See [`Self::solar_event`].
    pub async fn next_elevation_step(
        &self,
        id: LocationId,
        current_elevation: f64,
    ) -> Result<ElevationStep, EngineError> {
        let mut guard = self.lock(id).await?;
        let state = &mut *guard;
        let now = self.now();
        let reading = state
            .solar_event
            .get_or_refresh(&self.inner.oracle, &state.site, now)?;
        if !reading.from_cache {
            self.solar_event_updated(id, reading.entry, now);
        }
        Ok(stepping::next_elevation_step(
            &self.inner.oracle,
            &state.site,
            Some(&reading.entry),
            now,
            current_elevation,
            state.config.elevation_step,
            &self.inner.search.crossing,
        )?)
    }

    // ----------------------------------------------------------------
    // Helpers
    // ----------------------------------------------------------------

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    async fn slot(&self, id: LocationId) -> Result<Arc<Mutex<LocationState>>, EngineError> {
        self.inner
            .locations
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::LocationNotFound { id })
    }

    async fn lock(&self, id: LocationId) -> Result<OwnedMutexGuard<LocationState>, EngineError> {
        let state = self.slot(id).await?.lock_owned().await;
        if state.removed {
            return Err(EngineError::LocationNotFound { id });
        }
        Ok(state)
    }

    async fn ensure_checkpoints(
        &self,
        id: LocationId,
        state: &mut LocationState,
    ) -> Result<(), EngineError> {
        if state.checkpoints.is_none() {
            self.checkpoint_pass(id, state).await?;
        }
        Ok(())
    }

    fn publish(&self, event: CacheEvent) {
        let receivers = self.inner.bus.send(event).unwrap_or(0);
        tracing::trace!(receivers, "Cache event published");
    }

    fn delay_until(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        at.signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .saturating_add(Duration::from_millis(self.inner.maintenance.event_delay_ms))
    }

    fn fallback_delay(&self) -> Duration {
        Duration::from_secs(self.inner.maintenance.fallback_secs)
    }

    fn arm_retry(&self, id: LocationId, purpose: TimerPurpose) {
        let delay = Duration::from_secs(self.inner.maintenance.retry_secs);
        self.inner.timers.arm(id, purpose, delay);
    }
}

fn log_solution(id: LocationId, solution: &AzimuthSolution) {
    let metrics = &solution.metrics;
    if metrics.hit_iteration_limit {
        tracing::warn!(
            location = %id,
            target = solution.target_azimuth,
            iterations = metrics.iterations,
            error_deg = metrics.final_error_deg,
            "Azimuth search hit its iteration limit"
        );
    } else {
        tracing::debug!(
            location = %id,
            target = solution.target_azimuth,
            time = %solution.time,
            iterations = metrics.iterations,
            elapsed_us = metrics.execution_time.as_micros(),
            "Azimuth search converged"
        );
    }
}
