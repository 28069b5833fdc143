//! Checkpoints and the per-location checkpoint cache.
//!
//! A checkpoint is a future instant at which the sun's azimuth sweep either
//! reverses direction or passes through solar noon. The cache keeps an
//! anchor (the most recent passed checkpoint) plus a short, strictly
//! time-ordered window of upcoming checkpoints.
//!
//! # Invariants
//!
//! - Checkpoint times are strictly increasing and unique.
//! - Every cached checkpoint is strictly after the anchor.
//! - The anchor only ever moves forward in time.
//! - The window never holds more than `capacity` entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tolerance used when comparing two location snapshots, in degrees.
const LOCATION_EPSILON_DEG: f64 = 1e-6;

/// Sweep direction of the sun's azimuth.
///
/// Serialized as the integer `1` (azimuth increasing) or `-1` (azimuth
/// decreasing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum SweepDirection {
    /// Azimuth is increasing (clockwise as seen from above).
    Increasing,
    /// Azimuth is decreasing.
    Decreasing,
}

impl SweepDirection {
    /// Return the opposite direction.
    pub const fn flipped(self) -> Self {
        match self {
            Self::Increasing => Self::Decreasing,
            Self::Decreasing => Self::Increasing,
        }
    }

    /// Return `1.0` for [`Self::Increasing`] and `-1.0` for [`Self::Decreasing`].
    pub const fn sign(self) -> f64 {
        match self {
            Self::Increasing => 1.0,
            Self::Decreasing => -1.0,
        }
    }

    /// Derive a direction from a signed azimuth delta.
    ///
    /// Returns `None` when the delta is exactly zero or not a number.
    pub fn from_delta(delta: f64) -> Option<Self> {
        if delta > 0.0 {
            Some(Self::Increasing)
        } else if delta < 0.0 {
            Some(Self::Decreasing)
        } else {
            None
        }
    }
}

impl From<SweepDirection> for i8 {
    fn from(direction: SweepDirection) -> Self {
        match direction {
            SweepDirection::Increasing => 1,
            SweepDirection::Decreasing => -1,
        }
    }
}

impl TryFrom<i8> for SweepDirection {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Increasing),
            -1 => Ok(Self::Decreasing),
            other => Err(format!("invalid sweep direction {other}, expected 1 or -1")),
        }
    }
}

impl core::fmt::Display for SweepDirection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Increasing => write!(f, "+1"),
            Self::Decreasing => write!(f, "-1"),
        }
    }
}

/// What kind of event a checkpoint marks.
///
/// Serialized as the boolean `is_reversal` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "bool", into = "bool")]
pub enum CheckpointKind {
    /// The azimuth derivative changes sign; direction inverts across it.
    Reversal,
    /// Solar-noon transit; direction is unchanged across it.
    Noon,
}

impl From<bool> for CheckpointKind {
    fn from(is_reversal: bool) -> Self {
        if is_reversal { Self::Reversal } else { Self::Noon }
    }
}

impl From<CheckpointKind> for bool {
    fn from(kind: CheckpointKind) -> Self {
        matches!(kind, CheckpointKind::Reversal)
    }
}

/// A cached future instant bounding the sun's azimuth sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Instant of the event.
    pub time: DateTime<Utc>,
    /// Sun azimuth at `time`, degrees in `[0, 360)`.
    pub azimuth: f64,
    /// Sweep direction *after* this checkpoint.
    pub direction: SweepDirection,
    /// Reversal or noon transit.
    #[serde(rename = "is_reversal")]
    pub kind: CheckpointKind,
}

impl Checkpoint {
    /// Whether this checkpoint flips the sweep direction.
    pub const fn is_reversal(&self) -> bool {
        matches!(self.kind, CheckpointKind::Reversal)
    }
}

/// The anchor of a checkpoint cache: the last checkpoint already passed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastKnownState {
    /// Instant of the anchor.
    pub time: DateTime<Utc>,
    /// Sun azimuth at the anchor.
    pub azimuth: f64,
    /// Sweep direction in effect after the anchor.
    pub direction: SweepDirection,
}

impl From<Checkpoint> for LastKnownState {
    fn from(checkpoint: Checkpoint) -> Self {
        Self {
            time: checkpoint.time,
            azimuth: checkpoint.azimuth,
            direction: checkpoint.direction,
        }
    }
}

/// The geographic position a cache was computed for.
///
/// A mismatch against current configuration invalidates the cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSnapshot {
    /// Latitude in degrees, north positive.
    pub latitude: f64,
    /// Longitude in degrees, east positive.
    pub longitude: f64,
}

impl LocationSnapshot {
    /// Whether two snapshots describe the same position.
    pub fn matches(&self, other: &Self) -> bool {
        (self.latitude - other.latitude).abs() <= LOCATION_EPSILON_DEG
            && (self.longitude - other.longitude).abs() <= LOCATION_EPSILON_DEG
    }
}

/// Anchor plus an ordered window of upcoming checkpoints for one location.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointCache {
    last_known_state: LastKnownState,
    checkpoints: Vec<Checkpoint>,
    location: LocationSnapshot,
    capacity: usize,
}

impl CheckpointCache {
    /// Create an empty cache anchored at `anchor`.
    pub const fn new(anchor: LastKnownState, location: LocationSnapshot, capacity: usize) -> Self {
        Self {
            last_known_state: anchor,
            checkpoints: Vec::new(),
            location,
            capacity,
        }
    }

    /// Rebuild a cache from persisted parts, restoring the window invariants.
    pub fn from_parts(
        anchor: LastKnownState,
        checkpoints: Vec<Checkpoint>,
        location: LocationSnapshot,
        capacity: usize,
    ) -> Self {
        let mut cache = Self::new(anchor, location, capacity);
        cache.merge(checkpoints);
        cache
    }

    /// The current anchor.
    pub const fn last_known_state(&self) -> &LastKnownState {
        &self.last_known_state
    }

    /// Upcoming checkpoints in chronological order.
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// The position this cache was computed for.
    pub const fn location(&self) -> &LocationSnapshot {
        &self.location
    }

    /// Maximum number of checkpoints held (K).
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of checkpoints needed to fill the window.
    pub const fn missing(&self) -> usize {
        self.capacity.saturating_sub(self.checkpoints.len())
    }

    /// The first checkpoint strictly after `now`.
    pub fn next_checkpoint(&self, now: DateTime<Utc>) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.time > now)
    }

    /// Whether any cached checkpoint is at or before `now`.
    pub fn has_passed(&self, now: DateTime<Utc>) -> bool {
        self.checkpoints.first().is_some_and(|c| c.time <= now)
    }

    /// Time and direction from which the next scan should start: the last
    /// cached checkpoint, or the anchor if the window is empty.
    pub fn scan_origin(&self) -> (DateTime<Utc>, SweepDirection) {
        self.checkpoints.last().map_or(
            (self.last_known_state.time, self.last_known_state.direction),
            |c| (c.time, c.direction),
        )
    }

    /// Sweep direction in effect at `t`.
    ///
    /// Starts from the anchor direction and flips once for every reversal
    /// checkpoint in `(anchor.time, t]`. Noon checkpoints never flip.
    pub fn current_direction(&self, t: DateTime<Utc>) -> SweepDirection {
        let anchor = &self.last_known_state;
        self.checkpoints
            .iter()
            .filter(|c| c.is_reversal() && c.time > anchor.time && c.time <= t)
            .fold(anchor.direction, |direction, _| direction.flipped())
    }

    /// Drop every checkpoint at or before `now`, promoting the latest of
    /// them to the anchor. Returns the number of evicted checkpoints.
    pub fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let split = self.checkpoints.partition_point(|c| c.time <= now);
        let passed: Vec<Checkpoint> = self.checkpoints.drain(..split).collect();
        if let Some(last) = passed.last()
            && last.time > self.last_known_state.time
        {
            self.last_known_state = LastKnownState::from(*last);
        }
        passed.len()
    }

    /// Merge new checkpoints into the window.
    ///
    /// Entries not strictly after the anchor are discarded, the result is
    /// sorted, duplicates by time are removed, and the window is truncated
    /// to capacity. Returns the number of checkpoints now held.
    pub fn merge(&mut self, incoming: Vec<Checkpoint>) -> usize {
        let anchor_time = self.last_known_state.time;
        self.checkpoints
            .extend(incoming.into_iter().filter(|c| c.time > anchor_time));
        self.checkpoints.sort_by_key(|c| c.time);
        self.checkpoints.dedup_by_key(|c| c.time);
        self.checkpoints.truncate(self.capacity);
        self.checkpoints.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap()
    }

    fn cp(hours: i64, kind: CheckpointKind, direction: SweepDirection) -> Checkpoint {
        Checkpoint {
            time: base() + Duration::hours(hours),
            azimuth: 90.0,
            direction,
            kind,
        }
    }

    fn cache() -> CheckpointCache {
        let anchor = LastKnownState {
            time: base(),
            azimuth: 0.0,
            direction: SweepDirection::Increasing,
        };
        let location = LocationSnapshot {
            latitude: 20.0,
            longitude: 0.0,
        };
        CheckpointCache::from_parts(
            anchor,
            vec![
                cp(3, CheckpointKind::Reversal, SweepDirection::Decreasing),
                cp(6, CheckpointKind::Reversal, SweepDirection::Increasing),
                cp(24, CheckpointKind::Noon, SweepDirection::Increasing),
            ],
            location,
            4,
        )
    }

    #[test]
    fn direction_serializes_as_signed_integer() {
        assert_eq!(serde_json::to_string(&SweepDirection::Decreasing).unwrap(), "-1");
        let parsed: SweepDirection = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, SweepDirection::Increasing);
        assert!(serde_json::from_str::<SweepDirection>("0").is_err());
    }

    #[test]
    fn checkpoint_kind_serializes_as_is_reversal_flag() {
        let json = serde_json::to_value(cp(1, CheckpointKind::Noon, SweepDirection::Increasing))
            .unwrap();
        assert_eq!(json["is_reversal"], serde_json::Value::Bool(false));
    }

    #[test]
    fn direction_flips_only_on_reversals() {
        let cache = cache();
        assert_eq!(cache.current_direction(base()), SweepDirection::Increasing);
        assert_eq!(
            cache.current_direction(base() + Duration::hours(3)),
            SweepDirection::Decreasing
        );
        assert_eq!(
            cache.current_direction(base() + Duration::hours(12)),
            SweepDirection::Increasing
        );
        assert_eq!(
            cache.current_direction(base() + Duration::hours(30)),
            SweepDirection::Increasing
        );
    }

    #[test]
    fn direction_is_constant_between_adjacent_checkpoints() {
        let cache = cache();
        let cps = cache.checkpoints().to_vec();
        for pair in cps.windows(2) {
            let (c1, c2) = (pair[0], pair[1]);
            let mut t = c1.time + Duration::minutes(1);
            while t <= c2.time {
                assert_eq!(cache.current_direction(t), c1.direction);
                t += Duration::minutes(37);
            }
        }
    }

    #[test]
    fn evict_promotes_last_passed_checkpoint() {
        let mut cache = cache();
        let evicted = cache.evict(base() + Duration::hours(7));
        assert_eq!(evicted, 2);
        assert_eq!(cache.last_known_state().time, base() + Duration::hours(6));
        assert_eq!(cache.last_known_state().direction, SweepDirection::Increasing);
        assert_eq!(cache.checkpoints().len(), 1);
        assert_eq!(cache.missing(), 3);
    }

    #[test]
    fn evict_with_nothing_passed_keeps_anchor() {
        let mut cache = cache();
        assert_eq!(cache.evict(base() + Duration::hours(1)), 0);
        assert_eq!(cache.last_known_state().time, base());
    }

    #[test]
    fn merge_sorts_dedupes_and_truncates() {
        let mut cache = cache();
        let held = cache.merge(vec![
            cp(24, CheckpointKind::Noon, SweepDirection::Increasing),
            cp(48, CheckpointKind::Noon, SweepDirection::Increasing),
            cp(-1, CheckpointKind::Noon, SweepDirection::Increasing),
            cp(72, CheckpointKind::Noon, SweepDirection::Increasing),
        ]);
        assert_eq!(held, 4);
        let times: Vec<_> = cache.checkpoints().iter().map(|c| c.time).collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert!(times.iter().all(|t| *t > base()));
        assert_eq!(*times.last().unwrap(), base() + Duration::hours(48));
    }

    #[test]
    fn next_checkpoint_is_strictly_after_now() {
        let cache = cache();
        let next = cache.next_checkpoint(base() + Duration::hours(3)).unwrap();
        assert_eq!(next.time, base() + Duration::hours(6));
        assert!(cache.has_passed(base() + Duration::hours(3)));
        assert!(!cache.has_passed(base() + Duration::hours(2)));
    }

    #[test]
    fn location_match_uses_tolerance() {
        let a = LocationSnapshot {
            latitude: 51.5,
            longitude: -0.12,
        };
        let b = LocationSnapshot {
            latitude: 51.500_000_01,
            longitude: -0.12,
        };
        let c = LocationSnapshot {
            latitude: 40.7,
            longitude: -74.0,
        };
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }
}
