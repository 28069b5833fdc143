//! Solstice finder and the seasonal curve built on it.
//!
//! Solstices are the extrema of solar declination: the June solstice is the
//! yearly maximum, the December solstice the minimum. A daily coarse scan
//! brackets the extremum and a ternary search refines it to a minute.
//!
//! The seasonal curve maps the declination at a target instant onto
//! `[-1, 1]`, with `-1` at local winter solstice and `1` at local summer
//! solstice. The target instant is today's horizon crossing: sunrise before
//! local noon, sunset after it.

use chrono::{DateTime, Duration, NaiveDate, TimeZone as _, Timelike, Utc};
use chrono_tz::Tz;
use sol_types::SolsticeCurveEntry;

use crate::crossing::{CrossingKind, CrossingSettings, find_elevation_crossing};
use crate::instant::{add_seconds, lerp, seconds_between, shift};
use crate::oracle::{OracleError, Site, SunOracle};

/// Longest coarse scan for one solstice, days.
const MAX_SCAN_DAYS: i64 = 400;

/// Ternary refinement stops once the bracket is this short, seconds.
const REFINE_TOLERANCE_SECS: f64 = 60.0;

/// Hard cap on ternary refinement iterations.
const REFINE_MAX_ITERATIONS: u32 = 100;

/// Which solstice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolsticeKind {
    /// Maximum declination (northern summer).
    June,
    /// Minimum declination (northern winter).
    December,
}

impl SolsticeKind {
    /// `1.0` when the extremum is a maximum, `-1.0` for a minimum.
    const fn sense(self) -> f64 {
        match self {
            Self::June => 1.0,
            Self::December => -1.0,
        }
    }
}

/// Whether to look forward or backward from the reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    /// First solstice strictly after the reference.
    Next,
    /// Last solstice at or before the reference.
    Previous,
}

/// The four solstices around an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolsticeBounds {
    /// Last June solstice at or before the instant.
    pub previous_june: DateTime<Utc>,
    /// First June solstice after the instant.
    pub next_june: DateTime<Utc>,
    /// Last December solstice at or before the instant.
    pub previous_december: DateTime<Utc>,
    /// First December solstice after the instant.
    pub next_december: DateTime<Utc>,
}

impl SolsticeBounds {
    /// The adjacent solstices, whichever kind comes next.
    pub fn adjacent(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        if self.next_june < self.next_december {
            (self.previous_december, self.next_june)
        } else {
            (self.previous_june, self.next_december)
        }
    }
}

/// Locate the solstice of `kind` nearest `from` in `direction`.
///
/// # Errors
///
/// Returns [`OracleError::Computation`] when the declination shows no
/// extremum within the scan range, and propagates sampling errors.
pub fn find_solstice<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    from: DateTime<Utc>,
    kind: SolsticeKind,
    direction: SearchDirection,
) -> Result<DateTime<Utc>, OracleError> {
    let sense = kind.sense();
    let (step, back) = match direction {
        SearchDirection::Next => (Duration::days(1), Duration::days(-1)),
        SearchDirection::Previous => (Duration::days(-1), Duration::days(1)),
    };
    let score = |t: DateTime<Utc>| -> Result<f64, OracleError> {
        Ok(sense * oracle.position(t, site)?.declination)
    };

    // Start one step behind so an extremum just past `from` is still bracketed.
    let mut prev_t = shift(from, back);
    let mut cur_t = from;
    let mut prev = score(prev_t)?;
    let mut cur = score(cur_t)?;

    for _ in 0..MAX_SCAN_DAYS {
        let next_t = shift(cur_t, step);
        let next = score(next_t)?;
        if cur >= prev && cur > next {
            let (lo, hi) = if prev_t < next_t {
                (prev_t, next_t)
            } else {
                (next_t, prev_t)
            };
            let found = refine_extremum(lo, hi, &score)?;
            let accepted = match direction {
                SearchDirection::Next => found > from,
                SearchDirection::Previous => found <= from,
            };
            if accepted {
                return Ok(found);
            }
        }
        prev_t = cur_t;
        prev = cur;
        cur_t = next_t;
        cur = next;
    }

    Err(OracleError::Computation {
        message: format!("no {kind:?} solstice within {MAX_SCAN_DAYS} days of {from}"),
    })
}

/// Ternary search for the maximum of `score` on `[lo, hi]`.
fn refine_extremum<F>(
    mut lo: DateTime<Utc>,
    mut hi: DateTime<Utc>,
    score: &F,
) -> Result<DateTime<Utc>, OracleError>
where
    F: Fn(DateTime<Utc>) -> Result<f64, OracleError>,
{
    for _ in 0..REFINE_MAX_ITERATIONS {
        if seconds_between(lo, hi) <= REFINE_TOLERANCE_SECS {
            break;
        }
        let m1 = lerp(lo, hi, 1.0 / 3.0);
        let m2 = lerp(lo, hi, 2.0 / 3.0);
        if score(m1)? < score(m2)? {
            lo = m1;
        } else {
            hi = m2;
        }
    }
    Ok(lerp(lo, hi, 0.5))
}

/// All four solstices around `t`.
///
/// # Errors
///
/// Propagates errors from [`find_solstice`].
pub fn solstice_bounds<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    t: DateTime<Utc>,
) -> Result<SolsticeBounds, OracleError> {
    Ok(SolsticeBounds {
        previous_june: find_solstice(oracle, site, t, SolsticeKind::June, SearchDirection::Previous)?,
        next_june: find_solstice(oracle, site, t, SolsticeKind::June, SearchDirection::Next)?,
        previous_december: find_solstice(
            oracle,
            site,
            t,
            SolsticeKind::December,
            SearchDirection::Previous,
        )?,
        next_december: find_solstice(oracle, site, t, SolsticeKind::December, SearchDirection::Next)?,
    })
}

/// Map `declination` onto `[-1, 1]` between the two solstice declinations.
pub fn normalize_declination(declination: f64, june: f64, december: f64, southern: bool) -> f64 {
    let max = june.max(december);
    let min = june.min(december);
    if max - min <= f64::EPSILON {
        return 0.0;
    }
    let mut unit = (declination - min) / (max - min);
    if southern {
        unit = 1.0 - unit;
    }
    (2.0 * unit.clamp(0.0, 1.0) - 1.0).clamp(-1.0, 1.0)
}

/// The instant of `date` at `hour`:00 local time, skipping forward one hour
/// if that wall-clock time does not exist.
fn local_instant(tz: Tz, date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
    let at = |h: u32| {
        date.and_hms_opt(h, 0, 0)
            .and_then(|naive| tz.from_local_datetime(&naive).earliest())
            .map(|local| local.with_timezone(&Utc))
    };
    at(hour).or_else(|| at(hour.saturating_add(1)))
}

/// The instant whose declination represents "today" at `now`.
///
/// # Errors
///
/// Propagates any [`OracleError`] raised while searching.
pub fn curve_target_time<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    tz: Tz,
    now: DateTime<Utc>,
    settings: &CrossingSettings,
) -> Result<DateTime<Utc>, OracleError> {
    let local = now.with_timezone(&tz);
    let Some(midnight) = local_instant(tz, local.date_naive(), 0) else {
        return Ok(now);
    };
    let kind = if local.hour() < 12 {
        CrossingKind::Rising
    } else {
        CrossingKind::Setting
    };
    let crossing = find_elevation_crossing(
        oracle,
        site,
        midnight,
        shift(midnight, Duration::days(1)),
        0.0,
        kind,
        settings,
    )?;
    Ok(crossing.unwrap_or(now))
}

/// Compute a fresh seasonal curve entry at `now`.
///
/// # Errors
///
/// Propagates any [`OracleError`] raised while searching.
pub fn compute_solstice_curve<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    tz: Tz,
    now: DateTime<Utc>,
    settings: &CrossingSettings,
) -> Result<SolsticeCurveEntry, OracleError> {
    let target_time = curve_target_time(oracle, site, tz, now, settings)?;
    let bounds = solstice_bounds(oracle, site, target_time)?;
    let (previous_solstice, next_solstice) = bounds.adjacent();

    let declination = oracle.position(target_time, site)?.declination;
    let june = oracle.position(bounds.next_june, site)?.declination;
    let december = oracle.position(bounds.next_december, site)?.declination;

    Ok(SolsticeCurveEntry {
        normalized: normalize_declination(declination, june, december, site.is_southern()),
        previous_solstice,
        next_solstice,
        calculated_at: now,
        target_time,
    })
}

/// Next local noon or local midnight after `now`, whichever is sooner.
pub fn next_local_refresh(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let today = local.date_naive();
    let next = if local.hour() < 12 {
        local_instant(tz, today, 12)
    } else {
        today
            .succ_opt()
            .and_then(|tomorrow| local_instant(tz, tomorrow, 0))
    };
    next.filter(|t| *t > now)
        .unwrap_or_else(|| add_seconds(now, 3600.0))
}

/// A cache read and whether it was served without recomputing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolsticeCurveReading {
    /// The current entry.
    pub entry: SolsticeCurveEntry,
    /// `true` when the stored entry was still fresh.
    pub from_cache: bool,
}

/// Single-entry cache of the seasonal curve for one location.
#[derive(Debug, Clone, Default)]
pub struct SolsticeCurveCache {
    entry: Option<SolsticeCurveEntry>,
}

impl SolsticeCurveCache {
    /// An empty cache.
    pub const fn new() -> Self {
        Self { entry: None }
    }

    /// The stored entry, fresh or not.
    pub const fn entry(&self) -> Option<&SolsticeCurveEntry> {
        self.entry.as_ref()
    }

    /// Serve the stored entry if fresh, otherwise recompute it.
    ///
    /// # Errors
    ///
    /// Propagates any [`OracleError`] raised while recomputing.
    pub fn get_or_refresh<O: SunOracle + ?Sized>(
        &mut self,
        oracle: &O,
        site: &Site,
        tz: Tz,
        now: DateTime<Utc>,
        settings: &CrossingSettings,
    ) -> Result<SolsticeCurveReading, OracleError> {
        if let Some(entry) = self.entry
            && entry.is_fresh(now)
        {
            return Ok(SolsticeCurveReading {
                entry,
                from_cache: true,
            });
        }
        let entry = self.refresh(oracle, site, tz, now, settings)?;
        Ok(SolsticeCurveReading {
            entry,
            from_cache: false,
        })
    }

    /// Recompute unconditionally.
    ///
    /// # Errors
    ///
    /// Propagates any [`OracleError`] raised while recomputing.
    pub fn refresh<O: SunOracle + ?Sized>(
        &mut self,
        oracle: &O,
        site: &Site,
        tz: Tz,
        now: DateTime<Utc>,
        settings: &CrossingSettings,
    ) -> Result<SolsticeCurveEntry, OracleError> {
        let entry = compute_solstice_curve(oracle, site, tz, now, settings)?;
        tracing::debug!(
            normalized = entry.normalized,
            target = %entry.target_time,
            next_solstice = %entry.next_solstice,
            "Solstice curve recomputed"
        );
        self.entry = Some(entry);
        Ok(entry)
    }
}
