//! Error types for the cache manager.
//!
//! [`EngineError`] wraps every subsystem failure the manager can surface
//! to a caller. Maintenance passes driven by timers never propagate these;
//! they log them and schedule a retry instead.

use sol_types::LocationId;

/// Top-level error for the cache manager and the daemon.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: sol_core::config::ConfigError,
    },

    /// The persistence backend failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: sol_store::StoreError,
    },

    /// Building or restoring a checkpoint cache failed.
    #[error("cache error: {source}")]
    Cache {
        /// The underlying cache error.
        #[from]
        source: sol_core::checkpoint::CacheError,
    },

    /// The azimuth solver failed.
    #[error("search error: {source}")]
    Search {
        /// The underlying search error.
        #[from]
        source: sol_core::solver::SearchError,
    },

    /// The sun position oracle failed.
    #[error("oracle error: {source}")]
    Oracle {
        /// The underlying oracle error.
        #[from]
        source: sol_core::oracle::OracleError,
    },

    /// No location with this id is registered.
    #[error("unknown location {id}")]
    LocationNotFound {
        /// The requested id.
        id: LocationId,
    },

    /// The location's checkpoint cache has not been built.
    #[error("checkpoint cache for location {id} is not available")]
    CacheUnavailable {
        /// The requested id.
        id: LocationId,
    },

    /// A step size that cannot produce a target.
    #[error("invalid step {step} for location {id}")]
    InvalidStep {
        /// Location whose step is unusable.
        id: LocationId,
        /// The configured step.
        step: f64,
    },

    /// The wake dispatcher was already started for this manager.
    #[error("wake dispatcher already running")]
    DispatcherRunning,
}
