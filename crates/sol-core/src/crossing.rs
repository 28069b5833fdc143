//! Elevation crossings: when does the sun pass a given elevation?
//!
//! A coarse forward scan finds the first step whose endpoints straddle the
//! target elevation in the requested sense, then bisection pins the
//! crossing to the configured tolerance.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::instant::{add_minutes, lerp, seconds_between};
use crate::oracle::{OracleError, Site, SunOracle};

/// Upper bound on coarse steps in one crossing scan.
const MAX_SCAN_STEPS: u32 = 10_000;

/// Which way the sun must be moving through the target elevation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingKind {
    /// Elevation increasing through the target.
    Rising,
    /// Elevation decreasing through the target.
    Setting,
}

impl CrossingKind {
    fn straddles(self, before: f64, after: f64) -> bool {
        match self {
            Self::Rising => before < 0.0 && after >= 0.0,
            Self::Setting => before > 0.0 && after <= 0.0,
        }
    }
}

/// Tuning for crossing searches.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CrossingSettings {
    /// Coarse scan step, minutes.
    #[serde(default = "default_step_minutes")]
    pub step_minutes: f64,

    /// Bisection stops once the bracket is this short, seconds.
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: f64,

    /// Hard cap on bisection iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for CrossingSettings {
    fn default() -> Self {
        Self {
            step_minutes: default_step_minutes(),
            tolerance_secs: default_tolerance_secs(),
            max_iterations: default_max_iterations(),
        }
    }
}

const fn default_step_minutes() -> f64 {
    10.0
}

const fn default_tolerance_secs() -> f64 {
    1.0
}

const fn default_max_iterations() -> u32 {
    64
}

/// First instant in `[start, end]` at which the elevation crosses
/// `target_elevation` in the sense of `kind`.
///
/// # Errors
///
/// Propagates any [`OracleError`] raised while sampling.
pub fn find_elevation_crossing<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    target_elevation: f64,
    kind: CrossingKind,
    settings: &CrossingSettings,
) -> Result<Option<DateTime<Utc>>, OracleError> {
    let offset = |t: DateTime<Utc>| -> Result<f64, OracleError> {
        Ok(oracle.position(t, site)?.elevation - target_elevation)
    };
    let step = settings.step_minutes.max(f64::EPSILON);

    let mut t0 = start;
    let mut f0 = offset(t0)?;
    let mut steps: u32 = 0;
    while t0 < end && steps < MAX_SCAN_STEPS {
        steps = steps.saturating_add(1);
        let t1 = add_minutes(t0, step).min(end);
        let f1 = offset(t1)?;
        if kind.straddles(f0, f1) {
            return bisect(t0, f0, t1, kind, &offset, settings).map(Some);
        }
        t0 = t1;
        f0 = f1;
    }
    Ok(None)
}

fn bisect<F>(
    mut lo: DateTime<Utc>,
    mut f_lo: f64,
    mut hi: DateTime<Utc>,
    kind: CrossingKind,
    offset: &F,
    settings: &CrossingSettings,
) -> Result<DateTime<Utc>, OracleError>
where
    F: Fn(DateTime<Utc>) -> Result<f64, OracleError>,
{
    for _ in 0..settings.max_iterations {
        if seconds_between(lo, hi) <= settings.tolerance_secs {
            break;
        }
        let mid = lerp(lo, hi, 0.5);
        let f_mid = offset(mid)?;
        if kind.straddles(f_lo, f_mid) {
            hi = mid;
        } else {
            lo = mid;
            f_lo = f_mid;
        }
    }
    Ok(lerp(lo, hi, 0.5))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, TimeZone, Timelike};

    use super::*;
    use crate::oracle::{NoaaOracle, SinusoidOracle};

    #[test]
    fn sinusoid_crossings_match_phase() {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let oracle = SinusoidOracle::daily(epoch, 0.0, 10.0);
        let site = Site::new(0.0, 0.0);
        let settings = CrossingSettings::default();

        // Elevation 45 sin(phase): rises through 0 at 00:00 and 24:00, sets at 12:00.
        let setting = find_elevation_crossing(
            &oracle,
            &site,
            epoch + Duration::hours(1),
            epoch + Duration::hours(23),
            0.0,
            CrossingKind::Setting,
            &settings,
        )
        .unwrap()
        .unwrap();
        assert!(seconds_between(epoch + Duration::hours(12), setting).abs() <= 1.0);

        let rising = find_elevation_crossing(
            &oracle,
            &site,
            epoch + Duration::hours(1),
            epoch + Duration::hours(30),
            0.0,
            CrossingKind::Rising,
            &settings,
        )
        .unwrap()
        .unwrap();
        assert!(seconds_between(epoch + Duration::hours(24), rising).abs() <= 1.0);
    }

    #[test]
    fn unreachable_elevation_returns_none() {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let oracle = SinusoidOracle::daily(epoch, 0.0, 10.0);
        let site = Site::new(0.0, 0.0);
        let found = find_elevation_crossing(
            &oracle,
            &site,
            epoch,
            epoch + Duration::days(2),
            60.0,
            CrossingKind::Rising,
            &CrossingSettings::default(),
        )
        .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn london_equinox_sunrise_is_near_six() {
        let oracle = NoaaOracle::new();
        let site = Site::new(51.5, -0.12);
        let midnight = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap();
        let sunrise = find_elevation_crossing(
            &oracle,
            &site,
            midnight,
            midnight + Duration::hours(12),
            0.0,
            CrossingKind::Rising,
            &CrossingSettings::default(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(sunrise.hour(), 6);
    }
}
