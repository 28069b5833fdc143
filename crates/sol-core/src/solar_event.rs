//! Next solar event cache: the sooner of the next solar noon and midnight.

use chrono::{DateTime, Utc};
use sol_types::{SolarEventEntry, SolarEventKind};

use crate::oracle::{OracleError, Site, SunOracle};

/// Compute the next solar event after `now`.
///
/// # Errors
///
/// Propagates any [`OracleError`] raised while sampling.
pub fn compute_solar_event<O: SunOracle + ?Sized>(
    oracle: &O,
    site: &Site,
    now: DateTime<Utc>,
) -> Result<SolarEventEntry, OracleError> {
    let transit = oracle.transit(now, site)?;
    let (time, kind) = if transit.noon < transit.midnight {
        (transit.noon, SolarEventKind::Noon)
    } else {
        (transit.midnight, SolarEventKind::Midnight)
    };
    let elevation = oracle.position(time, site)?.elevation;

    Ok(SolarEventEntry {
        next_event_time: time,
        next_event_kind: kind,
        next_event_elevation: elevation,
        calculated_at: now,
    })
}

/// A cache read and whether it was served without recomputing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarEventReading {
    /// The current entry.
    pub entry: SolarEventEntry,
    /// `true` when the stored entry was still fresh.
    pub from_cache: bool,
}

/// Single-entry cache of the next solar event for one location.
#[derive(Debug, Clone, Default)]
pub struct SolarEventCache {
    entry: Option<SolarEventEntry>,
}

impl SolarEventCache {
    /// An empty cache.
    pub const fn new() -> Self {
        Self { entry: None }
    }

    /// The stored entry, fresh or not.
    pub const fn entry(&self) -> Option<&SolarEventEntry> {
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
        now: DateTime<Utc>,
    ) -> Result<SolarEventReading, OracleError> {
        if let Some(entry) = self.entry
            && entry.is_fresh(now)
        {
            return Ok(SolarEventReading {
                entry,
                from_cache: true,
            });
        }
        let entry = self.refresh(oracle, site, now)?;
        Ok(SolarEventReading {
            entry,
            from_cache: false,
        })
    }

    /// Recompute unconditionally.
    ///
    /// # Errors
    ///
    /// Propagates any [`OracleError`] raised while recomputing. The stored
    /// entry is left untouched on failure.
    pub fn refresh<O: SunOracle + ?Sized>(
        &mut self,
        oracle: &O,
        site: &Site,
        now: DateTime<Utc>,
    ) -> Result<SolarEventEntry, OracleError> {
        let entry = compute_solar_event(oracle, site, now)?;
        tracing::debug!(
            kind = %entry.next_event_kind,
            time = %entry.next_event_time,
            elevation = entry.next_event_elevation,
            "Solar event recomputed"
        );
        self.entry = Some(entry);
        Ok(entry)
    }
}
