//! Sun position oracle, checkpoint scanning, and search algorithms for Sol.
//!
//! Everything in this crate is synchronous and free of I/O. The engine
//! crate wraps these functions with persistence, timers, and notifications.
//!
//! # Modules
//!
//! - [`oracle`] -- [`SunOracle`] trait, the NOAA implementation, and a
//!   synthetic sinusoid oracle.
//! - [`azimuth`] -- Wraparound-aware angle arithmetic.
//! - [`instant`] -- Fractional offsets between UTC instants.
//! - [`reversal`] -- Bisection locator for azimuth reversals.
//! - [`scanner`] -- Forward scan from an anchor to the next checkpoint.
//! - [`checkpoint`] -- Cache lifecycle: initialize, refill, advance, reload.
//! - [`solver`] -- Ternary search for the instant the sun reaches an azimuth.
//! - [`crossing`] -- Elevation crossing finder.
//! - [`solar_event`] -- Next solar noon/midnight cache.
//! - [`solstice`] -- Solstice finder and seasonal curve cache.
//! - [`stepping`] -- Next azimuth and elevation step targets.
//! - [`config`] -- Configuration loading from `sol-config.yaml`.
//! - [`clock`] -- [`Clock`] trait with system and manual clocks.
//!
//! [`SunOracle`]: oracle::SunOracle
//! [`Clock`]: clock::Clock

pub mod azimuth;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod crossing;
pub mod instant;
pub mod oracle;
pub mod reversal;
pub mod scanner;
pub mod solar_event;
pub mod solstice;
pub mod solver;
pub mod stepping;
