//! Reversal locator: pins the instant the azimuth derivative changes sign.
//!
//! The caller hands over a bracket that should contain exactly one
//! extremum of the azimuth curve. Each iteration samples five evenly spaced
//! points, derives four chord slopes, and keeps the sub-bracket where the
//! slope sign flips. The bracket halves every iteration, so the default
//! 0.001° tolerance is reached in a few dozen iterations; the iteration cap
//! only guards against pathological oracles.
//!
//! If no slope flip is visible (the precondition was violated) the bracket
//! narrows toward its flattest end and the midpoint is returned as a
//! best-effort answer.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::azimuth::{spread, wrap_delta};
use crate::instant::{lerp, seconds_between};
use crate::oracle::{OracleError, Site, SunOracle};

/// Tuning for [`locate_reversal`].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LocatorSettings {
    /// Stop once the azimuth spread across the bracket is at most this, degrees.
    #[serde(default = "default_tolerance_deg")]
    pub tolerance_deg: f64,

    /// Hard cap on narrowing iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Stop once the bracket is shorter than this, seconds.
    #[serde(default = "default_min_span_secs")]
    pub min_span_secs: f64,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            tolerance_deg: default_tolerance_deg(),
            max_iterations: default_max_iterations(),
            min_span_secs: default_min_span_secs(),
        }
    }
}

const fn default_tolerance_deg() -> f64 {
    0.001
}

const fn default_max_iterations() -> u32 {
    5000
}

const fn default_min_span_secs() -> f64 {
    0.001
}

/// Result of a reversal search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatedReversal {
    /// Midpoint of the final bracket.
    pub time: DateTime<Utc>,
    /// Azimuth sampled at `time`.
    pub azimuth: f64,
    /// Narrowing iterations performed.
    pub iterations: u32,
    /// Whether the search stopped on the iteration cap.
    pub hit_iteration_limit: bool,
}

/// Whether two slopes have opposite signs (a zero slope counts as falling).
fn flips(a: f64, b: f64) -> bool {
    (a > 0.0) != (b > 0.0)
}

/// Narrow `[left, right]` onto the azimuth extremum it contains.
///
/// # Errors
///
/// Propagates any [`OracleError`] raised while sampling.
pub fn locate_reversal<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    left: DateTime<Utc>,
    right: DateTime<Utc>,
    settings: &LocatorSettings,
) -> Result<LocatedReversal, OracleError> {
    let (mut lo, mut hi) = if left <= right {
        (left, right)
    } else {
        (right, left)
    };
    let mut iterations: u32 = 0;
    let mut hit_iteration_limit = false;

    loop {
        if iterations >= settings.max_iterations {
            hit_iteration_limit = true;
            break;
        }
        iterations = iterations.saturating_add(1);

        let times = [
            lo,
            lerp(lo, hi, 0.25),
            lerp(lo, hi, 0.5),
            lerp(lo, hi, 0.75),
            hi,
        ];
        let [t0, t1, t2, t3, t4] = times;
        let samples = [
            oracle.azimuth(t0, site)?,
            oracle.azimuth(t1, site)?,
            oracle.azimuth(t2, site)?,
            oracle.azimuth(t3, site)?,
            oracle.azimuth(t4, site)?,
        ];

        if spread(&samples) <= settings.tolerance_deg
            || seconds_between(lo, hi) <= settings.min_span_secs
        {
            break;
        }

        let [a0, a1, a2, a3, a4] = samples;
        let s0 = wrap_delta(a0, a1);
        let s1 = wrap_delta(a1, a2);
        let s2 = wrap_delta(a2, a3);
        let s3 = wrap_delta(a3, a4);

        (lo, hi) = if flips(s0, s1) {
            (t0, t2)
        } else if flips(s1, s2) {
            (t1, t3)
        } else if flips(s2, s3) {
            (t2, t4)
        } else if s0.abs() <= s3.abs() {
            (t0, t2)
        } else {
            (t2, t4)
        };
    }

    if hit_iteration_limit {
        tracing::warn!(
            iterations,
            left = %lo,
            right = %hi,
            "Reversal locator hit iteration cap, returning best-effort midpoint"
        );
    }

    let time = lerp(lo, hi, 0.5);
    Ok(LocatedReversal {
        time,
        azimuth: oracle.azimuth(time, site)?,
        iterations,
        hit_iteration_limit,
    })
}
