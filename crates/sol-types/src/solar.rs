//! Single-value cache entries: next solar event and solstice curve position.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How long a computed entry may be served before it is recomputed.
pub const FRESHNESS_WINDOW_SECS: i64 = 3600;

/// Whether `calculated_at` is recent enough relative to `now`.
fn within_freshness_window(calculated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(calculated_at) < Duration::seconds(FRESHNESS_WINDOW_SECS)
}

/// Which daily transit comes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolarEventKind {
    /// Solar noon (upper transit, maximum elevation).
    Noon,
    /// Solar midnight (lower transit, minimum elevation).
    Midnight,
}

impl core::fmt::Display for SolarEventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Noon => write!(f, "noon"),
            Self::Midnight => write!(f, "midnight"),
        }
    }
}

/// The next solar noon or midnight and the sun's elevation at that instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolarEventEntry {
    /// When the event happens.
    pub next_event_time: DateTime<Utc>,
    /// Noon or midnight.
    #[serde(rename = "next_event_type")]
    pub next_event_kind: SolarEventKind,
    /// Sun elevation at the event, degrees.
    pub next_event_elevation: f64,
    /// When this entry was computed.
    pub calculated_at: DateTime<Utc>,
}

impl SolarEventEntry {
    /// Valid while the event is still ahead and the entry is under an hour old.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.next_event_time && within_freshness_window(self.calculated_at, now)
    }
}

/// Where the target instant sits on the annual declination cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolsticeCurveEntry {
    /// Seasonal index in `[-1, 1]`: `-1` at winter solstice, `1` at summer.
    pub normalized: f64,
    /// The most recent solstice before the target instant.
    pub previous_solstice: DateTime<Utc>,
    /// The next solstice after the target instant.
    pub next_solstice: DateTime<Utc>,
    /// When this entry was computed.
    pub calculated_at: DateTime<Utc>,
    /// The instant whose declination was sampled.
    pub target_time: DateTime<Utc>,
}

impl SolsticeCurveEntry {
    /// Valid while the entry is under an hour old.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        within_freshness_window(self.calculated_at, now)
    }
}
