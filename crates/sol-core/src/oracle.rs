//! Sun position oracle: the one seam between the engine and astronomy.
//!
//! Everything above this module treats the sun as a black box that answers
//! two questions for a site: where is it at instant `t`, and when are the
//! next upper and lower transits after `t`. Any implementation that is
//! deterministic and continuous in time (apart from the 0°/360° azimuth
//! wrap) satisfies the engine.
//!
//! Two implementations ship with the crate:
//!
//! - [`NoaaOracle`] -- the NOAA low-precision solar position algorithm with
//!   pressure and temperature scaled refraction. Accurate to roughly 0.01°
//!   for the years 1900-2100, which is ample for checkpoint scheduling.
//! - [`SinusoidOracle`] -- a synthetic sun whose azimuth and elevation are
//!   pure sinusoids. Used to exercise the searches against analytic answers.

use chrono::{DateTime, Utc};
use sol_types::LocationSnapshot;

use crate::azimuth::{normalize, wrap_delta};
use crate::instant::{add_minutes, add_seconds, seconds_between};

/// Standard sea-level pressure in millibars.
pub const STANDARD_PRESSURE_MBAR: f64 = 1013.25;

/// Default air temperature in degrees Celsius.
pub const STANDARD_TEMPERATURE_C: f64 = 15.0;

/// How far back [`SunOracle::previous_noon`] starts looking, in seconds.
const PREVIOUS_NOON_LOOKBACK_SECS: f64 = 26.0 * 3600.0;

/// Upper bound on transit steps taken by [`SunOracle::previous_noon`].
const PREVIOUS_NOON_MAX_STEPS: u32 = 4;

/// Errors raised by a sun position oracle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    /// The site cannot be evaluated (non-finite or out-of-range coordinates).
    #[error("invalid site: {reason}")]
    InvalidSite {
        /// What is wrong with the site.
        reason: String,
    },

    /// No transit could be located near the requested instant.
    #[error("no transit found near {at}")]
    NoTransit {
        /// The instant that was searched from.
        at: DateTime<Utc>,
    },

    /// The underlying computation failed.
    #[error("sun position computation failed: {message}")]
    Computation {
        /// Description of the failure.
        message: String,
    },
}

/// Observer site parameters passed to the oracle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    /// Latitude in degrees, north positive.
    pub latitude: f64,
    /// Longitude in degrees, east positive.
    pub longitude: f64,
    /// Height above sea level in metres.
    pub elevation_m: f64,
    /// Air pressure in millibars, used for refraction.
    pub pressure_mbar: f64,
    /// Air temperature in degrees Celsius, used for refraction.
    pub temperature_c: f64,
    /// Apparent horizon elevation in degrees.
    pub horizon_deg: f64,
}

impl Site {
    /// A sea-level site with standard atmosphere and a flat horizon.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation_m: 0.0,
            pressure_mbar: STANDARD_PRESSURE_MBAR,
            temperature_c: STANDARD_TEMPERATURE_C,
            horizon_deg: 0.0,
        }
    }

    /// The latitude/longitude pair used for cache invalidation.
    pub const fn snapshot(&self) -> LocationSnapshot {
        LocationSnapshot {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Whether the site is in the southern hemisphere.
    pub fn is_southern(&self) -> bool {
        self.latitude < 0.0
    }

    /// Check that the coordinates are usable.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::InvalidSite`] for non-finite values or a
    /// latitude outside `[-90, 90]`.
    pub fn validate(&self) -> Result<(), OracleError> {
        let all_finite = [
            self.latitude,
            self.longitude,
            self.elevation_m,
            self.pressure_mbar,
            self.temperature_c,
            self.horizon_deg,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !all_finite {
            return Err(OracleError::InvalidSite {
                reason: "site parameters must be finite".to_owned(),
            });
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(OracleError::InvalidSite {
                reason: format!("latitude {} outside [-90, 90]", self.latitude),
            });
        }
        Ok(())
    }
}

/// Apparent sun position at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunPosition {
    /// Compass bearing in `[0, 360)`, clockwise from north.
    pub azimuth: f64,
    /// Apparent elevation above the horizon in degrees.
    pub elevation: f64,
    /// Solar declination in degrees.
    pub declination: f64,
}

/// The next upper and lower transits after an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transit {
    /// Next solar noon, strictly after the query instant.
    pub noon: DateTime<Utc>,
    /// Next solar midnight, strictly after the query instant.
    pub midnight: DateTime<Utc>,
}

/// Source of sun positions and transit times.
pub trait SunOracle: Send + Sync {
    /// Sun position at `t` for `site`.
    fn position(&self, t: DateTime<Utc>, site: &Site) -> Result<SunPosition, OracleError>;

    /// Next solar noon and solar midnight strictly after `t`.
    fn transit(&self, t: DateTime<Utc>, site: &Site) -> Result<Transit, OracleError>;

    /// Azimuth at `t`.
    fn azimuth(&self, t: DateTime<Utc>, site: &Site) -> Result<f64, OracleError> {
        self.position(t, site).map(|p| p.azimuth)
    }

    /// Latest solar noon at or before `t`.
    fn previous_noon(&self, t: DateTime<Utc>, site: &Site) -> Result<DateTime<Utc>, OracleError> {
        let mut noon = self
            .transit(add_seconds(t, -PREVIOUS_NOON_LOOKBACK_SECS), site)?
            .noon;
        if noon > t {
            return Err(OracleError::NoTransit { at: t });
        }
        for _ in 0..PREVIOUS_NOON_MAX_STEPS {
            let next = self.transit(noon, site)?.noon;
            if next > t {
                return Ok(noon);
            }
            noon = next;
        }
        Ok(noon)
    }
}

// =============================================================================
// NOAA low-precision algorithm
// =============================================================================

/// Julian day of the Unix epoch.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Julian day of J2000.0.
const J2000_JD: f64 = 2_451_545.0;

/// Mean rate of the hour angle, degrees per minute.
const HOUR_ANGLE_RATE_DEG_PER_MIN: f64 = 0.25;

/// Newton iterations used to pin a transit.
const TRANSIT_NEWTON_STEPS: u32 = 8;

/// Minutes in a mean solar day.
const MINUTES_PER_DAY: f64 = 1440.0;

/// NOAA solar position algorithm (Meeus, low precision).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoaaOracle;

/// Declination and equation of time for one instant.
struct SolarTerms {
    declination_deg: f64,
    equation_of_time_min: f64,
}

impl NoaaOracle {
    /// Create the oracle.
    pub const fn new() -> Self {
        Self
    }

    fn julian_day(t: DateTime<Utc>) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let ms = t.timestamp_millis() as f64;
        ms / 86_400_000.0 + UNIX_EPOCH_JD
    }

    fn solar_terms(t: DateTime<Utc>) -> SolarTerms {
        let jc = (Self::julian_day(t) - J2000_JD) / 36_525.0;

        let mean_long = (280.466_46 + jc * (36_000.769_83 + jc * 0.000_303_2)).rem_euclid(360.0);
        let mean_anom = 357.529_11 + jc * (35_999.050_29 - 0.000_153_7 * jc);
        let ecc = 0.016_708_634 - jc * (0.000_042_037 + 0.000_000_126_7 * jc);

        let m = mean_anom.to_radians();
        let center = m.sin() * (1.914_602 - jc * (0.004_817 + 0.000_014 * jc))
            + (2.0 * m).sin() * (0.019_993 - 0.000_101 * jc)
            + (3.0 * m).sin() * 0.000_289;
        let true_long = mean_long + center;
        let omega = (125.04 - 1934.136 * jc).to_radians();
        let app_long = true_long - 0.005_69 - 0.004_78 * omega.sin();

        let mean_obliq = 23.0
            + (26.0 + (21.448 - jc * (46.815 + jc * (0.000_59 - jc * 0.001_813))) / 60.0) / 60.0;
        let obliq = (mean_obliq + 0.002_56 * omega.cos()).to_radians();

        let declination_deg = (obliq.sin() * app_long.to_radians().sin()).asin().to_degrees();

        let y = (obliq / 2.0).tan().powi(2);
        let l0 = mean_long.to_radians();
        let eq = y * (2.0 * l0).sin() - 2.0 * ecc * m.sin()
            + 4.0 * ecc * y * m.sin() * (2.0 * l0).cos()
            - 0.5 * y * y * (4.0 * l0).sin()
            - 1.25 * ecc * ecc * (2.0 * m).sin();

        SolarTerms {
            declination_deg,
            equation_of_time_min: 4.0 * eq.to_degrees(),
        }
    }

    /// Local hour angle in `[-180, 180)`, zero at solar noon.
    fn hour_angle(t: DateTime<Utc>, longitude: f64, eq_time_min: f64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let ms_of_day = t.timestamp_millis().rem_euclid(86_400_000) as f64;
        let minutes = ms_of_day / 60_000.0;
        let true_solar_min = (minutes + eq_time_min + 4.0 * longitude).rem_euclid(MINUTES_PER_DAY);
        wrap_delta(0.0, true_solar_min / 4.0 - 180.0)
    }

    /// Atmospheric refraction in degrees for a true elevation.
    fn refraction(elevation: f64, pressure_mbar: f64, temperature_c: f64) -> f64 {
        let arcsec = if elevation > 85.0 {
            0.0
        } else {
            let te = elevation.to_radians().tan();
            if elevation > 5.0 {
                58.1 / te - 0.07 / te.powi(3) + 0.000_086 / te.powi(5)
            } else if elevation > -0.575 {
                1735.0
                    + elevation
                        * (-518.2 + elevation * (103.4 + elevation * (-12.79 + elevation * 0.711)))
            } else {
                -20.772 / te
            }
        };
        let scale = (pressure_mbar / 1010.0) * (283.0 / (273.0 + temperature_c));
        arcsec / 3600.0 * scale
    }

    /// The first instant strictly after `t` whose hour angle is `target`.
    fn next_hour_angle(t: DateTime<Utc>, longitude: f64, target: f64) -> DateTime<Utc> {
        let ha_at = |at: DateTime<Utc>| {
            Self::hour_angle(at, longitude, Self::solar_terms(at).equation_of_time_min)
        };
        let refine = |start: DateTime<Utc>| {
            let mut guess = start;
            for _ in 0..TRANSIT_NEWTON_STEPS {
                let err = wrap_delta(target, ha_at(guess));
                if err.abs() < 1e-6 {
                    break;
                }
                guess = add_minutes(guess, -err / HOUR_ANGLE_RATE_DEG_PER_MIN);
            }
            guess
        };

        let ahead = (target - ha_at(t)).rem_euclid(360.0);
        let mut found = refine(add_minutes(t, ahead / HOUR_ANGLE_RATE_DEG_PER_MIN));
        if found <= t {
            found = refine(add_minutes(found, MINUTES_PER_DAY));
        }
        found
    }
}

impl SunOracle for NoaaOracle {
    fn position(&self, t: DateTime<Utc>, site: &Site) -> Result<SunPosition, OracleError> {
        site.validate()?;
        let terms = Self::solar_terms(t);
        let ha = Self::hour_angle(t, site.longitude, terms.equation_of_time_min).to_radians();
        let lat = site.latitude.to_radians();
        let decl = terms.declination_deg.to_radians();

        let cos_zenith = (lat.sin() * decl.sin() + lat.cos() * decl.cos() * ha.cos()).clamp(-1.0, 1.0);
        let true_elevation = 90.0 - cos_zenith.acos().to_degrees();

        let azimuth = normalize(
            ha.sin()
                .atan2(ha.cos() * lat.sin() - decl.tan() * lat.cos())
                .to_degrees()
                + 180.0,
        );
        let elevation =
            true_elevation + Self::refraction(true_elevation, site.pressure_mbar, site.temperature_c);

        if !(azimuth.is_finite() && elevation.is_finite()) {
            return Err(OracleError::Computation {
                message: format!("non-finite position at {t}"),
            });
        }

        Ok(SunPosition {
            azimuth,
            elevation,
            declination: terms.declination_deg,
        })
    }

    fn transit(&self, t: DateTime<Utc>, site: &Site) -> Result<Transit, OracleError> {
        site.validate()?;
        Ok(Transit {
            noon: Self::next_hour_angle(t, site.longitude, 0.0),
            midnight: Self::next_hour_angle(t, site.longitude, -180.0),
        })
    }
}

// =============================================================================
// Synthetic oracle
// =============================================================================

/// A synthetic sun driven by a single phase angle.
///
/// With `phase = 2π (t - epoch) / period`:
///
/// - azimuth = `azimuth_offset + azimuth_amplitude * sin(phase + azimuth_phase)`
/// - elevation = `elevation_amplitude * sin(phase)`, so noon sits at
///   `phase = π/2` and midnight at `phase = 3π/2`
/// - declination is constant
///
/// Azimuth extrema are analytic, which makes this the reference signal for
/// the reversal locator and the target-time solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinusoidOracle {
    /// Instant at which the phase is zero.
    pub epoch: DateTime<Utc>,
    /// Length of one cycle in seconds.
    pub period_secs: f64,
    /// Mean azimuth in degrees.
    pub azimuth_offset: f64,
    /// Azimuth swing in degrees.
    pub azimuth_amplitude: f64,
    /// Azimuth phase lead in radians.
    pub azimuth_phase: f64,
    /// Peak elevation in degrees.
    pub elevation_amplitude: f64,
    /// Constant declination in degrees.
    pub declination: f64,
}

impl SinusoidOracle {
    /// A one-day cycle with the given azimuth swing.
    pub const fn daily(epoch: DateTime<Utc>, azimuth_offset: f64, azimuth_amplitude: f64) -> Self {
        Self {
            epoch,
            period_secs: 86_400.0,
            azimuth_offset,
            azimuth_amplitude,
            azimuth_phase: 0.0,
            elevation_amplitude: 45.0,
            declination: 0.0,
        }
    }

    /// Phase angle at `t`, radians.
    pub fn phase(&self, t: DateTime<Utc>) -> f64 {
        std::f64::consts::TAU * seconds_between(self.epoch, t) / self.period_secs
    }

    /// First instant strictly after `t` at which the phase is `target` mod 2π.
    fn next_phase(&self, t: DateTime<Utc>, target: f64) -> DateTime<Utc> {
        let tau = std::f64::consts::TAU;
        let mut ahead = (target - self.phase(t)).rem_euclid(tau);
        if ahead * self.period_secs / tau < 0.001 {
            ahead += tau;
        }
        add_seconds(t, ahead / tau * self.period_secs)
    }
}

impl SunOracle for SinusoidOracle {
    fn position(&self, t: DateTime<Utc>, _site: &Site) -> Result<SunPosition, OracleError> {
        let phase = self.phase(t);
        Ok(SunPosition {
            azimuth: normalize(
                self.azimuth_offset + self.azimuth_amplitude * (phase + self.azimuth_phase).sin(),
            ),
            elevation: self.elevation_amplitude * phase.sin(),
            declination: self.declination,
        })
    }

    fn transit(&self, t: DateTime<Utc>, _site: &Site) -> Result<Transit, OracleError> {
        let half_pi = std::f64::consts::FRAC_PI_2;
        Ok(Transit {
            noon: self.next_phase(t, half_pi),
            midnight: self.next_phase(t, 3.0 * half_pi),
        })
    }

    fn previous_noon(&self, t: DateTime<Utc>, site: &Site) -> Result<DateTime<Utc>, OracleError> {
        let next = self.transit(t, site)?.noon;
        Ok(add_seconds(next, -self.period_secs))
    }
}
