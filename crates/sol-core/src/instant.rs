//! Fractional offsets between UTC instants.
//!
//! The searches work in floating-point seconds and minutes; these helpers
//! convert back and forth at millisecond resolution and saturate instead of
//! panicking at the edges of the representable range.

use chrono::{DateTime, TimeDelta, Utc};

/// Milliseconds per second, as a float.
const MS_PER_SECOND: f64 = 1000.0;

/// Shift `t` by a fractional number of seconds.
///
/// Out-of-range offsets leave `t` unchanged.
pub fn add_seconds(t: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    let ms = (seconds * MS_PER_SECOND).round();
    if !ms.is_finite() {
        return t;
    }
    #[allow(clippy::cast_possible_truncation)]
    let ms = ms as i64;
    TimeDelta::try_milliseconds(ms)
        .and_then(|delta| t.checked_add_signed(delta))
        .unwrap_or(t)
}

/// Shift `t` by a fractional number of minutes.
pub fn add_minutes(t: DateTime<Utc>, minutes: f64) -> DateTime<Utc> {
    add_seconds(t, minutes * 60.0)
}

/// Signed seconds from `a` to `b`.
pub fn seconds_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let ms = b.signed_duration_since(a).num_milliseconds() as f64;
    ms / MS_PER_SECOND
}

/// The instant a fraction `frac` of the way from `a` to `b`.
pub fn lerp(a: DateTime<Utc>, b: DateTime<Utc>, frac: f64) -> DateTime<Utc> {
    add_seconds(a, seconds_between(a, b) * frac)
}

/// Shift `t` by a whole [`TimeDelta`], saturating to `t` on overflow.
pub fn shift(t: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    t.checked_add_signed(delta).unwrap_or(t)
}
