//! Checkpoint cache lifecycle: initialize, refill, advance, and reload.
//!
//! These functions are synchronous and free of I/O. The engine loads the
//! persisted blob, passes it to [`load_or_init`], and saves whatever comes
//! back. A blob that cannot be trusted (missing, wrong layout version,
//! legacy reversal-only layout, computed for another position, or too old
//! to catch up) is discarded and the cache is rebuilt from the previous
//! solar noon.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use sol_types::{
    CACHE_SCHEMA_VERSION, CacheRecord, CheckpointCache, LastKnownState, LocationSnapshot,
    SweepDirection,
};

use crate::azimuth::wrap_delta;
use crate::instant::add_minutes;
use crate::oracle::{OracleError, Site, SunOracle};
use crate::scanner::{ScanSettings, next_checkpoint, scan_checkpoints};

/// Extra scan rounds allowed during initialization for checkpoints that
/// fall between the previous noon and now.
const INIT_EXTRA_ROUNDS: usize = 16;

/// Errors raised while building or restoring a checkpoint cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The sun position oracle failed.
    #[error("oracle error: {source}")]
    Oracle {
        /// The underlying oracle error.
        #[from]
        source: OracleError,
    },

    /// The persisted blob does not match the current layout.
    #[error("cache schema invalid: {reason}")]
    SchemaInvalid {
        /// Why the blob was rejected.
        reason: String,
    },

    /// The persisted blob was computed for a different position.
    #[error(
        "location changed: stored ({}, {}), configured ({}, {})",
        stored.latitude, stored.longitude, configured.latitude, configured.longitude
    )]
    LocationChanged {
        /// Position recorded in the blob.
        stored: LocationSnapshot,
        /// Position from current configuration.
        configured: LocationSnapshot,
    },

    /// The newest cached instant is too far in the past to catch up.
    #[error("cache stale: newest checkpoint {newest} is older than {limit_days} days")]
    Stale {
        /// Newest instant held by the cache.
        newest: DateTime<Utc>,
        /// Catch-up limit in days.
        limit_days: i64,
    },

    /// The cache could not be serialized.
    #[error("cache encoding failed: {source}")]
    Encode {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}

/// Tuning for cache maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CheckpointSettings {
    /// Scanner tuning.
    #[serde(default)]
    pub scan: ScanSettings,

    /// Offset either side of noon used to read the initial sweep direction, minutes.
    #[serde(default = "default_direction_probe_minutes")]
    pub direction_probe_minutes: f64,

    /// Evict/refill rounds allowed in one advance.
    #[serde(default = "default_max_catch_up_passes")]
    pub max_catch_up_passes: u32,

    /// A cache whose newest instant is older than this is rebuilt, days.
    #[serde(default = "default_reinit_after_days")]
    pub reinit_after_days: i64,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            scan: ScanSettings::default(),
            direction_probe_minutes: default_direction_probe_minutes(),
            max_catch_up_passes: default_max_catch_up_passes(),
            reinit_after_days: default_reinit_after_days(),
        }
    }
}

const fn default_direction_probe_minutes() -> f64 {
    10.0
}

const fn default_max_catch_up_passes() -> u32 {
    8
}

const fn default_reinit_after_days() -> i64 {
    7
}

/// What a refill added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefillOutcome {
    /// Checkpoints added to the window.
    pub added: usize,
    /// The scan hit its end bound before filling the window.
    pub exhausted: bool,
}

/// What an advance (evict then refill) changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceOutcome {
    /// Checkpoints evicted as passed.
    pub evicted: usize,
    /// Checkpoints added by refills.
    pub added: usize,
    /// The last refill hit its end bound.
    pub exhausted: bool,
}

/// How [`load_or_init`] produced its cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Nothing was persisted; a fresh cache was built.
    Initialized,
    /// The persisted cache was rejected and rebuilt.
    Reinitialized {
        /// Why the persisted cache was rejected.
        reason: String,
    },
    /// The persisted cache was restored and advanced.
    Restored(AdvanceOutcome),
}

/// Sweep direction across `t`, from azimuths a few minutes either side.
///
/// # Errors
///
/// Propagates any [`OracleError`] raised while sampling.
pub fn direction_at<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    t: DateTime<Utc>,
    probe_minutes: f64,
) -> Result<SweepDirection, OracleError> {
    let before = oracle.azimuth(add_minutes(t, -probe_minutes), site)?;
    let after = oracle.azimuth(add_minutes(t, probe_minutes), site)?;
    Ok(SweepDirection::from_delta(wrap_delta(before, after)).unwrap_or(SweepDirection::Increasing))
}

/// Build a cache from scratch, anchored at the solar noon preceding `now`.
///
/// Checkpoints between that noon and `now` are walked through so the
/// anchor ends up on the most recent passed one.
///
/// # Errors
///
/// Returns [`CacheError::Oracle`] if the oracle fails.
pub fn initialize<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    capacity: usize,
    now: DateTime<Utc>,
    settings: &CheckpointSettings,
) -> Result<CheckpointCache, CacheError> {
    let noon = oracle.previous_noon(now, site)?;
    let mut anchor = LastKnownState {
        time: noon,
        azimuth: oracle.azimuth(noon, site)?,
        direction: direction_at(oracle, site, noon, settings.direction_probe_minutes)?,
    };

    let end = settings.scan.end_from(now);
    let mut future = Vec::with_capacity(capacity);
    let mut from = anchor.time;
    let mut direction = anchor.direction;

    for _ in 0..capacity.saturating_add(INIT_EXTRA_ROUNDS) {
        if future.len() >= capacity {
            break;
        }
        let Some(checkpoint) = next_checkpoint(oracle, site, from, direction, end, &settings.scan)?
        else {
            break;
        };
        from = checkpoint.time;
        direction = checkpoint.direction;
        if checkpoint.time <= now {
            anchor = LastKnownState::from(checkpoint);
        } else {
            future.push(checkpoint);
        }
    }

    let cache = CheckpointCache::from_parts(anchor, future, site.snapshot(), capacity);
    tracing::info!(
        anchor = %cache.last_known_state().time,
        direction = %cache.last_known_state().direction,
        checkpoints = cache.checkpoints().len(),
        "Checkpoint cache initialized"
    );
    Ok(cache)
}

/// Top the window up to capacity, scanning on from its last entry.
///
/// # Errors
///
/// Returns [`CacheError::Oracle`] if the oracle fails.
pub fn refill<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    cache: &mut CheckpointCache,
    now: DateTime<Utc>,
    settings: &CheckpointSettings,
) -> Result<RefillOutcome, CacheError> {
    let missing = cache.missing();
    if missing == 0 {
        return Ok(RefillOutcome::default());
    }
    let (from, direction) = cache.scan_origin();
    let end = settings.scan.end_from(from.max(now));
    let outcome = scan_checkpoints(oracle, site, from, direction, end, missing, &settings.scan)?;

    let before = cache.checkpoints().len();
    let after = cache.merge(outcome.checkpoints);
    Ok(RefillOutcome {
        added: after.saturating_sub(before),
        exhausted: outcome.exhausted,
    })
}

/// Evict passed checkpoints and refill, repeating until nothing cached is
/// in the past.
///
/// # Errors
///
/// Returns [`CacheError::Stale`] if the cache is too old to catch up, or
/// [`CacheError::Oracle`] if the oracle fails.
pub fn advance<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    cache: &mut CheckpointCache,
    now: DateTime<Utc>,
    settings: &CheckpointSettings,
) -> Result<AdvanceOutcome, CacheError> {
    let (newest, _) = cache.scan_origin();
    let limit = Duration::try_days(settings.reinit_after_days).unwrap_or(Duration::MAX);
    if now.signed_duration_since(newest) > limit {
        return Err(CacheError::Stale {
            newest,
            limit_days: settings.reinit_after_days,
        });
    }

    let mut outcome = AdvanceOutcome::default();
    for _ in 0..settings.max_catch_up_passes.max(1) {
        outcome.evicted = outcome.evicted.saturating_add(cache.evict(now));
        let refilled = refill(oracle, site, cache, now, settings)?;
        outcome.added = outcome.added.saturating_add(refilled.added);
        outcome.exhausted = refilled.exhausted;
        if !cache.has_passed(now) || refilled.added == 0 {
            break;
        }
    }
    if cache.has_passed(now) {
        outcome.evicted = outcome.evicted.saturating_add(cache.evict(now));
    }
    Ok(outcome)
}

/// Serialize a cache into its persisted form.
///
/// # Errors
///
/// Returns [`CacheError::Encode`] if serialization fails.
pub fn encode_record(cache: &CheckpointCache) -> Result<Value, CacheError> {
    Ok(serde_json::to_value(CacheRecord::from_cache(cache))?)
}

/// Validate a persisted blob against the current layout and position.
///
/// # Errors
///
/// Returns [`CacheError::SchemaInvalid`] for legacy, mis-versioned, or
/// malformed blobs, and [`CacheError::LocationChanged`] for blobs computed
/// at another position.
pub fn decode_record(blob: &Value, site: &Site) -> Result<CacheRecord, CacheError> {
    if blob.get("reversals").is_some() && blob.get("checkpoints").is_none() {
        return Err(CacheError::SchemaInvalid {
            reason: "legacy reversal-only layout".to_owned(),
        });
    }
    let version = blob.get("version").and_then(Value::as_u64);
    if version != Some(u64::from(CACHE_SCHEMA_VERSION)) {
        return Err(CacheError::SchemaInvalid {
            reason: format!("version {version:?}, expected {CACHE_SCHEMA_VERSION}"),
        });
    }
    let record: CacheRecord =
        serde_json::from_value(blob.clone()).map_err(|e| CacheError::SchemaInvalid {
            reason: e.to_string(),
        })?;

    let configured = site.snapshot();
    if !record.location.matches(&configured) {
        return Err(CacheError::LocationChanged {
            stored: record.location,
            configured,
        });
    }
    Ok(record)
}

/// Restore a cache from an optional persisted blob, rebuilding it when the
/// blob is absent or untrustworthy.
///
/// # Errors
///
/// Returns [`CacheError::Oracle`] if the oracle fails.
pub fn load_or_init<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    blob: Option<&Value>,
    capacity: usize,
    now: DateTime<Utc>,
    settings: &CheckpointSettings,
) -> Result<(CheckpointCache, ReloadOutcome), CacheError> {
    let Some(blob) = blob else {
        let cache = initialize(oracle, site, capacity, now, settings)?;
        return Ok((cache, ReloadOutcome::Initialized));
    };

    let rejected = match decode_record(blob, site) {
        Ok(record) => {
            let mut cache = record.into_cache(capacity);
            match advance(oracle, site, &mut cache, now, settings) {
                Ok(outcome) => return Ok((cache, ReloadOutcome::Restored(outcome))),
                Err(e @ CacheError::Stale { .. }) => e,
                Err(e) => return Err(e),
            }
        }
        Err(e @ (CacheError::SchemaInvalid { .. } | CacheError::LocationChanged { .. })) => e,
        Err(e) => return Err(e),
    };

    tracing::warn!(reason = %rejected, "Discarding persisted checkpoint cache");
    let cache = initialize(oracle, site, capacity, now, settings)?;
    Ok((
        cache,
        ReloadOutcome::Reinitialized {
            reason: rejected.to_string(),
        },
    ))
}
