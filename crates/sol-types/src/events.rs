//! Notifications published on the cache bus.
//!
//! Consumers (sensor layers, dashboards) subscribe to these to learn about
//! new values without polling the manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, LastKnownState};
use crate::ids::LocationId;
use crate::solar::{SolarEventEntry, SolsticeCurveEntry};

/// A cache for one location has new contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    /// The checkpoint window was rebuilt or advanced.
    CheckpointsUpdated {
        /// Location whose cache changed.
        location: LocationId,
        /// The anchor after the update.
        last_known_state: LastKnownState,
        /// The window after the update.
        checkpoints: Vec<Checkpoint>,
        /// When the update happened.
        updated_at: DateTime<Utc>,
    },
    /// The next solar event was recomputed.
    SolarEventUpdated {
        /// Location whose cache changed.
        location: LocationId,
        /// The new entry.
        entry: SolarEventEntry,
    },
    /// The solstice curve position was recomputed.
    SolsticeCurveUpdated {
        /// Location whose cache changed.
        location: LocationId,
        /// The new entry.
        entry: SolsticeCurveEntry,
    },
}

impl CacheEvent {
    /// The location this event concerns.
    pub const fn location(&self) -> LocationId {
        match self {
            Self::CheckpointsUpdated { location, .. }
            | Self::SolarEventUpdated { location, .. }
            | Self::SolsticeCurveUpdated { location, .. } => *location,
        }
    }
}
