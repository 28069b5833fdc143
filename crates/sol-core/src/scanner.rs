//! Checkpoint scanner: walks forward from an anchor to the next checkpoint.
//!
//! From a known time and sweep direction the scanner probes the azimuth in
//! coarse steps until either the observed sweep direction disagrees with
//! the expected one (a reversal is bracketed and handed to the
//! [`locate_reversal`] search) or the next solar noon is reached. The
//! earlier of the two becomes the checkpoint.
//!
//! Step, derivative window, and bracket lead are fixed intervals. A
//! reversal whose opposite-sweep interval is shorter than one step can slip
//! between two probes; the stress tests in `tests/sampling_stress.rs`
//! document where that happens.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sol_types::{Checkpoint, CheckpointKind, SweepDirection};

use crate::azimuth::wrap_delta;
use crate::instant::add_minutes;
use crate::oracle::{OracleError, Site, SunOracle};
use crate::reversal::{LocatorSettings, locate_reversal};

/// Upper bound on coarse probes in a single checkpoint search.
const MAX_PROBES: u32 = 20_000;

/// Chord length used to read the sweep direction at a bracket edge, minutes.
const EDGE_CHORD_MINUTES: f64 = 0.5;

/// Tuning for the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScanSettings {
    /// Coarse probe interval, minutes.
    #[serde(default = "default_step_minutes")]
    pub step_minutes: f64,

    /// Gap between the two samples of a direction probe, minutes.
    #[serde(default = "default_derivative_window_minutes")]
    pub derivative_window_minutes: f64,

    /// How far before a disagreeing probe the reversal bracket starts, minutes.
    #[serde(default = "default_bracket_lead_minutes")]
    pub bracket_lead_minutes: f64,

    /// Offset of the first probe after the scan origin, minutes.
    #[serde(default = "default_start_offset_minutes")]
    pub start_offset_minutes: f64,

    /// Offset after the scan origin used to look up the next noon, minutes.
    #[serde(default = "default_noon_probe_minutes")]
    pub noon_probe_minutes: f64,

    /// Safety bound on how far ahead a scan may run, days.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: i64,

    /// Reversal locator tuning.
    #[serde(default)]
    pub locator: LocatorSettings,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            step_minutes: default_step_minutes(),
            derivative_window_minutes: default_derivative_window_minutes(),
            bracket_lead_minutes: default_bracket_lead_minutes(),
            start_offset_minutes: default_start_offset_minutes(),
            noon_probe_minutes: default_noon_probe_minutes(),
            horizon_days: default_horizon_days(),
            locator: LocatorSettings::default(),
        }
    }
}

impl ScanSettings {
    /// The scan end bound for a scan starting at `from`.
    pub fn end_from(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        Duration::try_days(self.horizon_days)
            .and_then(|d| from.checked_add_signed(d))
            .unwrap_or(from)
    }
}

const fn default_step_minutes() -> f64 {
    30.0
}

const fn default_derivative_window_minutes() -> f64 {
    10.0
}

const fn default_bracket_lead_minutes() -> f64 {
    5.0
}

const fn default_start_offset_minutes() -> f64 {
    5.0
}

const fn default_noon_probe_minutes() -> f64 {
    1.0
}

const fn default_horizon_days() -> i64 {
    30
}

/// Checkpoints produced by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    /// Checkpoints in chronological order.
    pub checkpoints: Vec<Checkpoint>,
    /// The end bound was reached before the requested count was found.
    pub exhausted: bool,
}

/// Find the first checkpoint strictly after `from`.
///
/// Returns `None` when neither a reversal nor a noon occurs before `end`.
///
/// # Errors
///
/// Propagates any [`OracleError`] raised while sampling.
pub fn next_checkpoint<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    from: DateTime<Utc>,
    direction: SweepDirection,
    end: DateTime<Utc>,
    settings: &ScanSettings,
) -> Result<Option<Checkpoint>, OracleError> {
    let next_noon = oracle
        .transit(add_minutes(from, settings.noon_probe_minutes), site)?
        .noon;
    let limit = next_noon.min(end);
    let step = settings.step_minutes.max(f64::EPSILON);

    let mut t = add_minutes(from, settings.start_offset_minutes);
    let mut previous = from;
    let mut probes: u32 = 0;
    while t < limit && probes < MAX_PROBES {
        probes = probes.saturating_add(1);

        let a = oracle.azimuth(t, site)?;
        let b = oracle.azimuth(add_minutes(t, settings.derivative_window_minutes), site)?;
        let observed = SweepDirection::from_delta(wrap_delta(a, b));

        if observed.is_some_and(|d| d != direction) {
            let right = add_minutes(t, settings.derivative_window_minutes);
            let mut left = add_minutes(t, -settings.bracket_lead_minutes).max(from);
            if sweep_at(oracle, site, left)? != Some(direction) {
                // The sign change predates the lead; fall back to the last agreeing probe.
                left = previous;
            }
            let located = locate_reversal(oracle, site, left, right, &settings.locator)?;

            if located.time >= next_noon {
                break;
            }
            if located.time > from && located.time <= end {
                tracing::debug!(
                    time = %located.time,
                    azimuth = located.azimuth,
                    iterations = located.iterations,
                    "Azimuth reversal located"
                );
                return Ok(Some(Checkpoint {
                    time: located.time,
                    azimuth: located.azimuth,
                    direction: direction.flipped(),
                    kind: CheckpointKind::Reversal,
                }));
            }
        }

        previous = t;
        t = add_minutes(t, step);
    }

    if next_noon <= end {
        return Ok(Some(Checkpoint {
            time: next_noon,
            azimuth: oracle.azimuth(next_noon, site)?,
            direction,
            kind: CheckpointKind::Noon,
        }));
    }
    Ok(None)
}

/// Sweep direction over a short chord starting at `t`.
fn sweep_at<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    t: DateTime<Utc>,
) -> Result<Option<SweepDirection>, OracleError> {
    let a = oracle.azimuth(t, site)?;
    let b = oracle.azimuth(add_minutes(t, EDGE_CHORD_MINUTES), site)?;
    Ok(SweepDirection::from_delta(wrap_delta(a, b)))
}

/// Collect up to `target_count` consecutive checkpoints after `start`.
///
/// A short list with `exhausted = true` means the end bound was reached;
/// callers treat it as degraded coverage, not a failure.
///
/// # Errors
///
/// Propagates any [`OracleError`] raised while sampling.
pub fn scan_checkpoints<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    start: DateTime<Utc>,
    start_direction: SweepDirection,
    end: DateTime<Utc>,
    target_count: usize,
    settings: &ScanSettings,
) -> Result<ScanOutcome, OracleError> {
    let mut checkpoints = Vec::with_capacity(target_count);
    let mut from = start;
    let mut direction = start_direction;

    while checkpoints.len() < target_count {
        let Some(checkpoint) = next_checkpoint(oracle, site, from, direction, end, settings)? else {
            break;
        };
        from = checkpoint.time;
        direction = checkpoint.direction;
        checkpoints.push(checkpoint);
    }

    let exhausted = checkpoints.len() < target_count;
    if exhausted {
        tracing::warn!(
            found = checkpoints.len(),
            wanted = target_count,
            end = %end,
            "Checkpoint scan reached its end bound"
        );
    }
    Ok(ScanOutcome {
        checkpoints,
        exhausted,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::instant::seconds_between;
    use crate::oracle::{NoaaOracle, SinusoidOracle};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn mid_latitude_yields_only_noons() {
        let oracle = NoaaOracle::new();
        let site = Site::new(51.5, -0.12);
        let start = Utc.with_ymd_and_hms(2024, 3, 20, 12, 30, 0).unwrap();
        let outcome = scan_checkpoints(
            &oracle,
            &site,
            start,
            SweepDirection::Increasing,
            start + Duration::days(30),
            4,
            &ScanSettings::default(),
        )
        .unwrap();

        assert!(!outcome.exhausted);
        assert_eq!(outcome.checkpoints.len(), 4);
        assert!(outcome.checkpoints.iter().all(|c| !c.is_reversal()));
        assert!(
            outcome
                .checkpoints
                .iter()
                .all(|c| c.direction == SweepDirection::Increasing)
        );
        for pair in outcome.checkpoints.windows(2) {
            let gap = seconds_between(pair[0].time, pair[1].time);
            assert!(gap > 86_000.0 && gap < 86_800.0);
        }
    }

    #[test]
    fn sinusoid_reversals_alternate_direction() {
        // Azimuth peaks at 00:00 and bottoms at 12:00; noon is at 06:00.
        let mut oracle = SinusoidOracle::daily(epoch(), 180.0, 40.0);
        oracle.azimuth_phase = std::f64::consts::FRAC_PI_2;
        let site = Site::new(0.0, 0.0);
        let start = epoch() + Duration::hours(1);

        let outcome = scan_checkpoints(
            &oracle,
            &site,
            start,
            SweepDirection::Decreasing,
            start + Duration::days(5),
            3,
            &ScanSettings::default(),
        )
        .unwrap();

        let [first, second, third] = [
            outcome.checkpoints[0],
            outcome.checkpoints[1],
            outcome.checkpoints[2],
        ];
        assert_eq!(first.kind, CheckpointKind::Noon);
        assert_eq!(first.direction, SweepDirection::Decreasing);
        assert_eq!(second.kind, CheckpointKind::Reversal);
        assert_eq!(second.direction, SweepDirection::Increasing);
        assert!(seconds_between(epoch() + Duration::hours(12), second.time).abs() < 300.0);
        assert_eq!(third.kind, CheckpointKind::Reversal);
        assert_eq!(third.direction, SweepDirection::Decreasing);
        assert!(seconds_between(epoch() + Duration::hours(24), third.time).abs() < 300.0);
    }

    #[test]
    fn short_horizon_returns_partial_list() {
        let oracle = NoaaOracle::new();
        let site = Site::new(51.5, -0.12);
        let start = Utc.with_ymd_and_hms(2024, 3, 20, 12, 30, 0).unwrap();
        let outcome = scan_checkpoints(
            &oracle,
            &site,
            start,
            SweepDirection::Increasing,
            start + Duration::hours(50),
            4,
            &ScanSettings::default(),
        )
        .unwrap();

        assert!(outcome.exhausted);
        assert_eq!(outcome.checkpoints.len(), 2);
    }

    #[test]
    fn checkpoints_are_strictly_increasing() {
        let mut oracle = SinusoidOracle::daily(epoch(), 90.0, 15.0);
        oracle.azimuth_phase = 1.0;
        let site = Site::new(0.0, 0.0);
        let outcome = scan_checkpoints(
            &oracle,
            &site,
            epoch(),
            SweepDirection::Increasing,
            epoch() + Duration::days(10),
            8,
            &ScanSettings::default(),
        )
        .unwrap();

        assert!(outcome.checkpoints.len() >= 4);
        assert!(outcome.checkpoints.windows(2).all(|w| w[0].time < w[1].time));
        assert!(outcome.checkpoints.iter().all(|c| c.time > epoch()));
    }
}
