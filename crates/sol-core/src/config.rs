//! Configuration loading and typed config structures for the Sol engine.
//!
//! The canonical configuration lives in `sol-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads and validates the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use sol_types::LocationId;

use crate::checkpoint::CheckpointSettings;
use crate::crossing::CrossingSettings;
use crate::oracle::{STANDARD_PRESSURE_MBAR, STANDARD_TEMPERATURE_C, Site};
use crate::solver::SolverSettings;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `sol-config.yaml`. Every section has defaults,
/// so an empty file yields a runnable (if location-less) engine.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SolConfig {
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where checkpoint caches are persisted.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Search and scan tuning.
    #[serde(default)]
    pub search: SearchConfig,

    /// Timer delays for the maintenance scheduler.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Configured locations.
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
}

impl SolConfig {
    /// Load configuration from a YAML file.
    ///
    /// Environment overrides are applied after parsing:
    /// - `SOL_STORE_PATH` overrides `storage.path`
    /// - `DRAGONFLY_URL` overrides `storage.dragonfly_url`
    /// - `SOL_LOG_LEVEL` overrides `logging.level`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override storage and logging settings with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SOL_STORE_PATH") {
            self.storage.path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("DRAGONFLY_URL") {
            self.storage.dragonfly_url = val;
        }
        if let Ok(val) = std::env::var("SOL_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Check every location and the duplicate-id rule.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for location in &self.locations {
            location.validate()?;
            if !seen.insert(location.id) {
                return Err(ConfigError::Invalid {
                    reason: format!("duplicate location id {}", location.id),
                });
            }
        }
        Ok(())
    }

    /// Look up a location by id.
    pub fn location(&self, id: LocationId) -> Option<&LocationConfig> {
        self.locations.iter().find(|l| l.id == id)
    }
}

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// Which persistence backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// Process memory only; nothing survives a restart.
    #[default]
    Memory,
    /// One JSON file per location under `path`.
    File,
    /// Dragonfly or any Redis-compatible server at `dragonfly_url`.
    Dragonfly,
}

/// Persistence configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: StorageBackendKind,

    /// Directory for the file backend.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Connection URL for the Dragonfly backend.
    #[serde(default = "default_dragonfly_url")]
    pub dragonfly_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            path: default_store_path(),
            dragonfly_url: default_dragonfly_url(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/sol")
}

fn default_dragonfly_url() -> String {
    "redis://localhost:6379".to_owned()
}

/// Tuning for every numerical search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct SearchConfig {
    /// Checkpoint scanning and cache maintenance.
    #[serde(default)]
    pub checkpoints: CheckpointSettings,

    /// Azimuth target-time solver.
    #[serde(default)]
    pub solver: SolverSettings,

    /// Elevation crossing finder.
    #[serde(default)]
    pub crossing: CrossingSettings,
}

/// Scheduler delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MaintenanceConfig {
    /// Delay after a checkpoint or event before waking, milliseconds.
    #[serde(default = "default_event_delay_ms")]
    pub event_delay_ms: u64,

    /// Wake-up interval when there is nothing to wait for, seconds.
    #[serde(default = "default_fallback_secs")]
    pub fallback_secs: u64,

    /// Retry interval after a failed pass, seconds.
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,

    /// Capacity of the cache event broadcast channel.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            event_delay_ms: default_event_delay_ms(),
            fallback_secs: default_fallback_secs(),
            retry_secs: default_retry_secs(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

const fn default_event_delay_ms() -> u64 {
    100
}

const fn default_fallback_secs() -> u64 {
    3600
}

const fn default_retry_secs() -> u64 {
    300
}

const fn default_bus_capacity() -> usize {
    256
}

/// How the refraction pressure for a location is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureMode {
    /// Derived from elevation with the standard barometric formula.
    #[default]
    Auto,
    /// The configured `pressure` value.
    Manual,
}

/// One observed location.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationConfig {
    /// Stable identifier; also the persistence key.
    pub id: LocationId,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Latitude in degrees, north positive.
    pub latitude: f64,

    /// Longitude in degrees, east positive.
    pub longitude: f64,

    /// Height above sea level, metres.
    #[serde(default)]
    pub elevation: f64,

    /// Pressure source.
    #[serde(default)]
    pub pressure_mode: PressureMode,

    /// Manual air pressure, millibars.
    #[serde(default = "default_pressure")]
    pub pressure: f64,

    /// Air temperature, degrees Celsius.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Apparent horizon elevation, degrees.
    #[serde(default)]
    pub horizon: f64,

    /// Azimuth step for the step planner, degrees.
    #[serde(default = "default_azimuth_step")]
    pub azimuth_step: f64,

    /// Elevation step for the step planner, degrees.
    #[serde(default = "default_elevation_step")]
    pub elevation_step: f64,

    /// Number of future checkpoints kept (K).
    #[serde(default = "default_cache_length")]
    pub cache_length: usize,

    /// IANA time zone used for local noon and midnight.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

const fn default_pressure() -> f64 {
    STANDARD_PRESSURE_MBAR
}

const fn default_temperature() -> f64 {
    STANDARD_TEMPERATURE_C
}

const fn default_azimuth_step() -> f64 {
    5.0
}

const fn default_elevation_step() -> f64 {
    1.0
}

const fn default_cache_length() -> usize {
    4
}

fn default_timezone() -> String {
    "UTC".to_owned()
}

/// Sea-level pressure scaled to `elevation_m` (standard atmosphere).
pub fn pressure_at_elevation(elevation_m: f64) -> f64 {
    STANDARD_PRESSURE_MBAR * (1.0 - 2.255_77e-5 * elevation_m).powf(5.255_88)
}

impl LocationConfig {
    /// A location at `(latitude, longitude)` with every other field defaulted.
    pub fn new(id: LocationId, latitude: f64, longitude: f64) -> Self {
        Self {
            id,
            name: String::new(),
            latitude,
            longitude,
            elevation: 0.0,
            pressure_mode: PressureMode::default(),
            pressure: default_pressure(),
            temperature: default_temperature(),
            horizon: 0.0,
            azimuth_step: default_azimuth_step(),
            elevation_step: default_elevation_step(),
            cache_length: default_cache_length(),
            timezone: default_timezone(),
        }
    }

    /// The oracle site for this location.
    pub fn site(&self) -> Site {
        let pressure_mbar = match self.pressure_mode {
            PressureMode::Auto => pressure_at_elevation(self.elevation),
            PressureMode::Manual => self.pressure,
        };
        Site {
            latitude: self.latitude,
            longitude: self.longitude,
            elevation_m: self.elevation,
            pressure_mbar,
            temperature_c: self.temperature,
            horizon_deg: self.horizon,
        }
    }

    /// The parsed time zone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown zone name.
    pub fn time_zone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| ConfigError::Invalid {
                reason: format!("location {}: unknown time zone {:?}: {e}", self.id, self.timezone),
            })
    }

    /// Check coordinates, steps, cache length, and time zone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |what: String| ConfigError::Invalid {
            reason: format!("location {}: {what}", self.id),
        };
        if !(self.latitude.is_finite() && (-90.0..=90.0).contains(&self.latitude)) {
            return Err(invalid(format!("latitude {} outside [-90, 90]", self.latitude)));
        }
        if !(self.longitude.is_finite() && (-180.0..=180.0).contains(&self.longitude)) {
            return Err(invalid(format!("longitude {} outside [-180, 180]", self.longitude)));
        }
        if !(self.azimuth_step.is_finite() && self.azimuth_step > 0.0) {
            return Err(invalid(format!("azimuth_step {} must be positive", self.azimuth_step)));
        }
        if !(self.elevation_step.is_finite() && self.elevation_step > 0.0) {
            return Err(invalid(format!(
                "elevation_step {} must be positive",
                self.elevation_step
            )));
        }
        if self.cache_length == 0 {
            return Err(invalid("cache_length must be at least 1".to_owned()));
        }
        self.time_zone()?;
        Ok(())
    }
}
