//! Shared type definitions for the Sol checkpoint cache engine.
//!
//! This crate is the data model every other crate speaks. It carries no
//! astronomy and no I/O: only identifiers, the closed [`Checkpoint`] record,
//! the per-location [`CheckpointCache`], the two single-value cache entries,
//! the persisted [`CacheRecord`], and the [`CacheEvent`] notifications.
//!
//! # Modules
//!
//! - [`ids`] -- Strongly-typed UUID v7 identifiers.
//! - [`checkpoint`] -- Sweep direction, checkpoints, the anchor state, and
//!   the checkpoint cache.
//! - [`solar`] -- Solar event and solstice curve cache entries.
//! - [`record`] -- Versioned persisted form of a checkpoint cache.
//! - [`events`] -- Notifications published when a cache changes.

pub mod checkpoint;
pub mod events;
pub mod ids;
pub mod record;
pub mod solar;

pub use checkpoint::{
    Checkpoint, CheckpointCache, CheckpointKind, LastKnownState, LocationSnapshot, SweepDirection,
};
pub use events::CacheEvent;
pub use ids::LocationId;
pub use record::{CACHE_SCHEMA_VERSION, CacheRecord};
pub use solar::{FRESHNESS_WINDOW_SECS, SolarEventEntry, SolarEventKind, SolsticeCurveEntry};
