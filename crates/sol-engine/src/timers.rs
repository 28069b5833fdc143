//! Cancellable wake-up timers.
//!
//! Each (location, purpose) pair owns at most one armed timer. Arming a
//! pair aborts its previous timer. A timer does no work itself: when it
//! fires it sends a [`Wake`] to the dispatcher, which re-fetches the
//! location by id and runs the pass under the location lock.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use sol_types::LocationId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which cache a timer maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerPurpose {
    /// Advance the checkpoint window.
    Checkpoints,
    /// Recompute the next solar event.
    SolarEvent,
    /// Recompute the solstice curve position.
    SolsticeCurve,
}

impl core::fmt::Display for TimerPurpose {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Checkpoints => write!(f, "checkpoints"),
            Self::SolarEvent => write!(f, "solar_event"),
            Self::SolsticeCurve => write!(f, "solstice_curve"),
        }
    }
}

/// Message sent by a fired timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wake {
    /// Location to maintain.
    pub location: LocationId,
    /// Which cache to maintain.
    pub purpose: TimerPurpose,
}

/// The set of armed timers for every location.
#[derive(Debug)]
pub(crate) struct Timers {
    wakes: mpsc::UnboundedSender<Wake>,
    handles: Mutex<BTreeMap<(LocationId, TimerPurpose), JoinHandle<()>>>,
}

impl Timers {
    pub(crate) fn new(wakes: mpsc::UnboundedSender<Wake>) -> Self {
        Self {
            wakes,
            handles: Mutex::new(BTreeMap::new()),
        }
    }

    /// Arm the timer for `(location, purpose)` to fire after `delay`,
    /// replacing any timer already armed for the pair.
    pub(crate) fn arm(&self, location: LocationId, purpose: TimerPurpose, delay: Duration) {
        let wakes = self.wakes.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if wakes.send(Wake { location, purpose }).is_err() {
                tracing::debug!(%location, %purpose, "Dispatcher gone, dropping wake");
            }
        });

        let previous = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((location, purpose), handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        tracing::debug!(
            %location,
            %purpose,
            delay_secs = delay.as_secs_f64(),
            "Timer armed"
        );
    }

    /// Cancel every timer for `location`. Returns how many were pending.
    pub(crate) fn cancel_location(&self, location: LocationId) -> usize {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<_> = handles
            .keys()
            .filter(|(id, _)| *id == location)
            .copied()
            .collect();
        let mut pending = 0_usize;
        for key in keys {
            if let Some(handle) = handles.remove(&key) {
                if !handle.is_finished() {
                    pending = pending.saturating_add(1);
                }
                handle.abort();
            }
        }
        pending
    }

    /// Cancel every timer.
    pub(crate) fn cancel_all(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in std::mem::take(&mut *handles) {
            handle.abort();
        }
    }

    /// Purposes with a timer still waiting to fire for `location`.
    pub(crate) fn pending(&self, location: LocationId) -> Vec<TimerPurpose> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((id, _), handle)| *id == location && !handle.is_finished())
            .map(|((_, purpose), _)| *purpose)
            .collect()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
