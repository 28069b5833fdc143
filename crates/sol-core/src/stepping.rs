//! Step planner: the next azimuth and elevation values worth announcing.
//!
//! Consumers publish the sun's position in fixed steps (every 5° of azimuth,
//! every 1° of elevation) and want to know the next step value and when it
//! is reached. An azimuth step never jumps over a cached checkpoint; an
//! elevation step never overshoots the next solar noon or midnight.

use chrono::{DateTime, Utc};
use sol_types::{Checkpoint, CheckpointCache, SolarEventEntry, SolarEventKind, SweepDirection};

use crate::azimuth::{is_ahead_within, normalize};
use crate::crossing::{CrossingKind, CrossingSettings, find_elevation_crossing};
use crate::instant::{add_minutes, seconds_between};
use crate::oracle::{OracleError, Site, SunOracle};

/// Below this many seconds to the event, the event itself is the next step.
const EVENT_PROXIMITY_SECS: f64 = 1.0;

/// Minutes until a fallback step is retried.
const FALLBACK_RETRY_MINUTES: f64 = 1.0;

/// The next azimuth target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AzimuthStep {
    /// Target azimuth in `[0, 360)`.
    pub azimuth: f64,
    /// Sweep direction in effect now.
    pub direction: SweepDirection,
    /// The checkpoint that replaced the stepped target, if any.
    pub blocked_by: Option<Checkpoint>,
}

impl AzimuthStep {
    /// Whether the target is a reversal checkpoint.
    pub fn is_reversal(&self) -> bool {
        self.blocked_by.is_some_and(|c| c.is_reversal())
    }

    /// Time of the blocking reversal, if the target is one.
    pub fn reversal_time(&self) -> Option<DateTime<Utc>> {
        self.blocked_by
            .filter(Checkpoint::is_reversal)
            .map(|c| c.time)
    }
}

/// Round `azimuth` to the step grid and advance one step in the current
/// sweep direction, stopping at the next checkpoint if it lies in between.
///
/// Returns `None` unless `step` is positive and finite.
pub fn next_azimuth_step(
    cache: &CheckpointCache,
    now: DateTime<Utc>,
    current_azimuth: f64,
    step: f64,
) -> Option<AzimuthStep> {
    if !(step.is_finite() && step > 0.0) {
        return None;
    }
    let direction = cache.current_direction(now);
    let sign = direction.sign();
    let target = normalize((current_azimuth / step).round() * step + step * sign);

    let blocked_by = cache
        .next_checkpoint(now)
        .filter(|c| is_ahead_within(current_azimuth, target, c.azimuth, sign))
        .copied();

    Some(AzimuthStep {
        azimuth: blocked_by.map_or(target, |c| c.azimuth),
        direction,
        blocked_by,
    })
}

/// Where an elevation step came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationSource {
    /// A stepped value reached at a rising or setting crossing.
    Stepped(CrossingKind),
    /// The step would overshoot, so the solar event itself is the target.
    Event(SolarEventKind),
    /// No usable event; try again shortly.
    Fallback,
}

/// The next elevation target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevationStep {
    /// Target elevation in degrees, `None` for a fallback.
    pub elevation: Option<f64>,
    /// When the target is reached.
    pub time: DateTime<Utc>,
    /// How the target was chosen.
    pub source: ElevationSource,
}

impl ElevationStep {
    fn fallback(now: DateTime<Utc>) -> Self {
        Self {
            elevation: None,
            time: add_minutes(now, FALLBACK_RETRY_MINUTES),
            source: ElevationSource::Fallback,
        }
    }

    const fn event(entry: &SolarEventEntry) -> Self {
        Self {
            elevation: Some(entry.next_event_elevation),
            time: entry.next_event_time,
            source: ElevationSource::Event(entry.next_event_kind),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Advance `current_elevation` one step toward the next solar event.
///
/// # Errors
///
/// Propagates any [`OracleError`] raised by the crossing search.
pub fn next_elevation_step<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    event: Option<&SolarEventEntry>,
    now: DateTime<Utc>,
    current_elevation: f64,
    step: f64,
    settings: &CrossingSettings,
) -> Result<ElevationStep, OracleError> {
    let Some(event) = event.filter(|e| e.next_event_time >= now) else {
        return Ok(ElevationStep::fallback(now));
    };
    if !(step.is_finite() && step > 0.0) {
        return Ok(ElevationStep::fallback(now));
    }

    let base = (current_elevation / step).round() * step;
    let (target, kind, overshoots) = match event.next_event_kind {
        SolarEventKind::Noon => {
            let target = round2(base + step);
            (target, CrossingKind::Rising, target > event.next_event_elevation)
        }
        SolarEventKind::Midnight => {
            let target = round2(base - step);
            (target, CrossingKind::Setting, target < event.next_event_elevation)
        }
    };

    if overshoots || seconds_between(now, event.next_event_time) < EVENT_PROXIMITY_SECS {
        return Ok(ElevationStep::event(event));
    }

    let crossing =
        find_elevation_crossing(oracle, site, now, event.next_event_time, target, kind, settings)?;
    Ok(crossing.map_or_else(
        || ElevationStep::fallback(now),
        |time| ElevationStep {
            elevation: Some(target),
            time,
            source: ElevationSource::Stepped(kind),
        },
    ))
}
