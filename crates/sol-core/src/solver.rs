//! Azimuth target-time solver.
//!
//! Answers "when will the sun next stand at bearing X?" with a ternary
//! search over a short window starting at `now`. The window is bounded by
//! the location's next checkpoint: between checkpoints the azimuth sweeps
//! in one direction, so the bearing is crossed at most once.
//!
//! Before searching, a handful of evenly spaced samples confirm the target
//! is reachable in the window. If it is not, the window doubles (never past
//! the checkpoint bound) and the check repeats once before giving up.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sol_types::CheckpointCache;

use crate::azimuth::{angular_error, is_between, normalize, wrap_delta};
use crate::instant::{add_seconds, lerp, seconds_between};
use crate::oracle::{OracleError, Site, SunOracle};

/// Errors raised by the solver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    /// The sun position oracle failed.
    #[error("oracle error: {source}")]
    Oracle {
        /// The underlying oracle error.
        #[from]
        source: OracleError,
    },

    /// The target bearing is not crossed within the largest allowed window.
    #[error("azimuth {target}° not reachable within {window_minutes:.1} minutes")]
    TargetNotReachable {
        /// Requested bearing.
        target: f64,
        /// Largest window that was checked, minutes.
        window_minutes: f64,
    },

    /// The requested bearing is not a finite number.
    #[error("invalid target azimuth {value}")]
    InvalidTarget {
        /// The rejected value.
        value: f64,
    },
}

/// Tuning for the solver.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SolverSettings {
    /// Converged once the best error is at most this, degrees.
    #[serde(default = "default_tolerance_deg")]
    pub tolerance_deg: f64,

    /// Hard cap on ternary iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Window used when the caller does not supply one, minutes.
    #[serde(default = "default_window_minutes")]
    pub default_window_minutes: f64,

    /// Absolute ceiling on the window, hours.
    #[serde(default = "default_max_window_hours")]
    pub max_window_hours: f64,

    /// Samples taken by the reachability check.
    #[serde(default = "default_precheck_samples")]
    pub precheck_samples: u32,

    /// How many times an unreachable window may double.
    #[serde(default = "default_max_window_expansions")]
    pub max_window_expansions: u32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            tolerance_deg: default_tolerance_deg(),
            max_iterations: default_max_iterations(),
            default_window_minutes: default_window_minutes(),
            max_window_hours: default_max_window_hours(),
            precheck_samples: default_precheck_samples(),
            max_window_expansions: default_max_window_expansions(),
        }
    }
}

const fn default_tolerance_deg() -> f64 {
    0.001
}

const fn default_max_iterations() -> u32 {
    5000
}

const fn default_window_minutes() -> f64 {
    10.0
}

const fn default_max_window_hours() -> f64 {
    24.0
}

const fn default_precheck_samples() -> u32 {
    10
}

const fn default_max_window_expansions() -> u32 {
    1
}

/// Observability data for one solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverMetrics {
    /// Ternary iterations performed.
    pub iterations: u32,
    /// Wall time spent in the search.
    pub execution_time: std::time::Duration,
    /// The search stopped on the iteration cap without converging.
    pub hit_iteration_limit: bool,
    /// The best error reached the tolerance.
    pub converged: bool,
    /// Error of the returned time, degrees.
    pub final_error_deg: f64,
    /// Window that was searched, minutes.
    pub window_minutes: f64,
}

/// A solved crossing time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AzimuthSolution {
    /// Requested bearing, normalized to `[0, 360)`.
    pub target_azimuth: f64,
    /// Best instant found.
    pub time: DateTime<Utc>,
    /// Azimuth at `time`.
    pub azimuth: f64,
    /// Search metrics.
    pub metrics: SolverMetrics,
}

/// Whether `target` is crossed between any two consecutive samples of
/// `[now, now + window]`.
fn reachable<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    now: DateTime<Utc>,
    window_secs: f64,
    target: f64,
    samples: u32,
) -> Result<bool, OracleError> {
    let n = samples.max(2);
    let last = f64::from(n.saturating_sub(1));
    let mut previous = oracle.azimuth(now, site)?;
    for i in 1..n {
        let t = add_seconds(now, window_secs * f64::from(i) / last);
        let current = oracle.azimuth(t, site)?;
        if is_between(previous, current, target) {
            return Ok(true);
        }
        previous = current;
    }
    Ok(false)
}

/// Find the instant after `now` at which the sun's azimuth equals `target`.
///
/// `window` overrides the default search window, minutes. The window may
/// only grow up to the earlier of the cache's next checkpoint and the
/// configured ceiling.
///
/// # Errors
///
/// Returns [`SearchError::TargetNotReachable`] if the bearing is not
/// crossed in the window, [`SearchError::InvalidTarget`] for non-finite
/// input, or [`SearchError::Oracle`] if sampling fails.
pub fn solve_target_time<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    target_azimuth: f64,
    now: DateTime<Utc>,
    window_minutes: Option<f64>,
    cache: Option<&CheckpointCache>,
    settings: &SolverSettings,
) -> Result<AzimuthSolution, SearchError> {
    if !target_azimuth.is_finite() {
        return Err(SearchError::InvalidTarget {
            value: target_azimuth,
        });
    }
    let started = Instant::now();
    let target = normalize(target_azimuth);

    let ceiling_secs = settings.max_window_hours * 3600.0;
    let cap_secs = cache
        .and_then(|c| c.next_checkpoint(now))
        .map_or(ceiling_secs, |c| seconds_between(now, c.time).min(ceiling_secs));

    let mut window_secs = window_minutes.unwrap_or(settings.default_window_minutes).max(0.0) * 60.0;
    let mut found = reachable(oracle, site, now, window_secs, target, settings.precheck_samples)?;
    let mut expansions: u32 = 0;
    while !found && expansions < settings.max_window_expansions {
        let grown = (window_secs * 2.0).min(cap_secs);
        if grown <= window_secs {
            break;
        }
        window_secs = grown;
        expansions = expansions.saturating_add(1);
        found = reachable(oracle, site, now, window_secs, target, settings.precheck_samples)?;
    }
    if !found {
        return Err(SearchError::TargetNotReachable {
            target,
            window_minutes: window_secs / 60.0,
        });
    }

    let mut lo = now;
    let mut hi = add_seconds(now, window_secs);
    let mut az_lo = oracle.azimuth(lo, site)?;
    let mut az_hi = oracle.azimuth(hi, site)?;

    let (mut best_time, mut best_az) = if angular_error(az_lo, target) <= angular_error(az_hi, target) {
        (lo, az_lo)
    } else {
        (hi, az_hi)
    };
    let mut best_err = angular_error(best_az, target);

    let mut iterations: u32 = 0;
    while best_err > settings.tolerance_deg && iterations < settings.max_iterations {
        iterations = iterations.saturating_add(1);

        let m1 = lerp(lo, hi, 1.0 / 3.0);
        let m2 = lerp(lo, hi, 2.0 / 3.0);
        let a1 = oracle.azimuth(m1, site)?;
        let a2 = oracle.azimuth(m2, site)?;
        let e1 = angular_error(a1, target);
        let e2 = angular_error(a2, target);

        if e1 < best_err {
            (best_time, best_az, best_err) = (m1, a1, e1);
        }
        if e2 < best_err {
            (best_time, best_az, best_err) = (m2, a2, e2);
        }

        if is_between(az_lo, a1, target) {
            (hi, az_hi) = (m1, a1);
        } else if is_between(a1, a2, target) {
            (lo, az_lo, hi, az_hi) = (m1, a1, m2, a2);
        } else if is_between(a2, az_hi, target) {
            (lo, az_lo) = (m2, a2);
        } else {
            let closer = if e1 <= e2 { m1 } else { m2 };
            let quarter = seconds_between(lo, hi) / 4.0;
            lo = add_seconds(closer, -quarter).max(now);
            hi = add_seconds(closer, quarter);
            az_lo = oracle.azimuth(lo, site)?;
            az_hi = oracle.azimuth(hi, site)?;
        }

        if seconds_between(lo, hi) <= 0.001 || wrap_delta(az_lo, az_hi).abs() <= settings.tolerance_deg {
            let mid = lerp(lo, hi, 0.5);
            let a_mid = oracle.azimuth(mid, site)?;
            let e_mid = angular_error(a_mid, target);
            if e_mid < best_err {
                (best_time, best_az, best_err) = (mid, a_mid, e_mid);
            }
            break;
        }
    }

    let converged = best_err <= settings.tolerance_deg;
    let hit_iteration_limit = !converged && iterations >= settings.max_iterations;
    let metrics = SolverMetrics {
        iterations,
        execution_time: started.elapsed(),
        hit_iteration_limit,
        converged,
        final_error_deg: best_err,
        window_minutes: window_secs / 60.0,
    };

    if converged {
        tracing::debug!(
            target,
            time = %best_time,
            iterations,
            "Azimuth target solved"
        );
    } else {
        tracing::warn!(
            target,
            error = best_err,
            iterations,
            hit_iteration_limit,
            "Azimuth solver returned a best-effort time"
        );
    }

    Ok(AzimuthSolution {
        target_azimuth: target,
        time: best_time,
        azimuth: best_az,
        metrics,
    })
}

/// Solve over the whole span from `now` to the cache's next checkpoint.
///
/// # Errors
///
/// See [`solve_target_time`].
pub fn next_time_at_azimuth<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    target_azimuth: f64,
    now: DateTime<Utc>,
    cache: &CheckpointCache,
    settings: &SolverSettings,
) -> Result<AzimuthSolution, SearchError> {
    let window = cache
        .next_checkpoint(now)
        .map_or(settings.default_window_minutes, |c| seconds_between(now, c.time) / 60.0);
    solve_target_time(oracle, site, target_azimuth, now, Some(window), Some(cache), settings)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::oracle::{NoaaOracle, SinusoidOracle};

    #[test]
    fn london_noon_bearing_converges() {
        let oracle = NoaaOracle::new();
        let site = Site::new(51.5, -0.12);
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 8, 0, 0).unwrap();

        let solution =
            solve_target_time(&oracle, &site, 180.0, now, Some(360.0), None, &SolverSettings::default())
                .unwrap();

        assert!(solution.metrics.converged);
        assert!(!solution.metrics.hit_iteration_limit);
        assert!(angular_error(solution.azimuth, 180.0) <= 0.001);
        assert!(solution.time > now);
        let noon = oracle.transit(now, &site).unwrap().noon;
        assert!(seconds_between(noon, solution.time).abs() < 120.0);
    }

    #[test]
    fn monotone_window_hits_target() {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let oracle = SinusoidOracle::daily(epoch, 100.0, 80.0);
        let site = Site::new(0.0, 0.0);
        // Rising through 100° .. 180° over the first six hours.
        let solution = solve_target_time(
            &oracle,
            &site,
            150.0,
            epoch,
            Some(300.0),
            None,
            &SolverSettings::default(),
        )
        .unwrap();

        assert!(angular_error(solution.azimuth, 150.0) <= 0.001);
        assert!(solution.time >= epoch);
    }

    #[test]
    fn target_across_north_is_found() {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let oracle = SinusoidOracle::daily(epoch, 350.0, 30.0);
        let site = Site::new(0.0, 0.0);
        let solution = solve_target_time(
            &oracle,
            &site,
            5.0,
            epoch,
            Some(240.0),
            None,
            &SolverSettings::default(),
        )
        .unwrap();
        assert!(angular_error(solution.azimuth, 5.0) <= 0.001);
    }

    #[test]
    fn window_doubles_once_before_failing() {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let oracle = SinusoidOracle::daily(epoch, 100.0, 80.0);
        let site = Site::new(0.0, 0.0);

        // 100° + 80 sin: 120° is reached after ~58 min.
        let ok = solve_target_time(&oracle, &site, 120.0, epoch, Some(40.0), None, &SolverSettings::default())
            .unwrap();
        assert!((ok.metrics.window_minutes - 80.0).abs() < 1e-9);

        let err = solve_target_time(&oracle, &site, 150.0, epoch, Some(40.0), None, &SolverSettings::default())
            .unwrap_err();
        assert!(matches!(err, SearchError::TargetNotReachable { .. }));
    }

    #[test]
    fn expansion_is_capped_by_next_checkpoint() {
        use sol_types::{Checkpoint, CheckpointKind, LastKnownState, LocationSnapshot, SweepDirection};

        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let oracle = SinusoidOracle::daily(epoch, 100.0, 80.0);
        let site = Site::new(0.0, 0.0);
        let anchor = LastKnownState {
            time: epoch - Duration::hours(1),
            azimuth: 100.0,
            direction: SweepDirection::Increasing,
        };
        let cache = sol_types::CheckpointCache::from_parts(
            anchor,
            vec![Checkpoint {
                time: epoch + Duration::minutes(50),
                azimuth: 117.0,
                direction: SweepDirection::Increasing,
                kind: CheckpointKind::Noon,
            }],
            LocationSnapshot {
                latitude: 0.0,
                longitude: 0.0,
            },
            4,
        );

        let err = solve_target_time(
            &oracle,
            &site,
            120.0,
            epoch,
            Some(40.0),
            Some(&cache),
            &SolverSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SearchError::TargetNotReachable { window_minutes, .. }
                if (window_minutes - 50.0).abs() < 1e-9
        ));
    }

    #[test]
    fn non_finite_target_is_rejected() {
        let oracle = NoaaOracle::new();
        let site = Site::new(51.5, -0.12);
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 8, 0, 0).unwrap();
        let err = solve_target_time(&oracle, &site, f64::NAN, now, None, None, &SolverSettings::default())
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidTarget { .. }));
    }
}
