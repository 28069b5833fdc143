//! Wraparound-aware azimuth arithmetic.
//!
//! Azimuths live on a circle: 359° and 1° are two degrees apart, not 358.
//! Every comparison in the searches goes through these helpers.

/// Fold any angle into `[0, 360)`.
pub fn normalize(degrees: f64) -> f64 {
    let folded = degrees.rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs.
    if folded >= 360.0 { 0.0 } else { folded }
}

/// Signed shortest rotation from `a` to `b`, in `[-180, 180)`.
pub fn wrap_delta(a: f64, b: f64) -> f64 {
    (b - a + 180.0).rem_euclid(360.0) - 180.0
}

/// Unsigned shortest distance between `a` and `target`.
pub fn angular_error(a: f64, target: f64) -> f64 {
    wrap_delta(a, target).abs()
}

/// Whether `target` lies on the short arc from `a` to `b`, endpoints included.
pub fn is_between(a: f64, b: f64, target: f64) -> bool {
    let span = wrap_delta(a, b);
    let offset = wrap_delta(a, target);
    if span >= 0.0 {
        (0.0..=span).contains(&offset)
    } else {
        (span..=0.0).contains(&offset)
    }
}

/// Whether `target` lies strictly inside the arc swept from `from` to `to`
/// when travelling in `sign` (`1.0` increasing, `-1.0` decreasing).
///
/// Unlike [`is_between`] the arc is not assumed to be the short one.
pub fn is_ahead_within(from: f64, to: f64, target: f64, sign: f64) -> bool {
    let reach = (sign * (to - from)).rem_euclid(360.0);
    let offset = (sign * (target - from)).rem_euclid(360.0);
    offset > 0.0 && offset < reach
}

/// Spread of a set of azimuths around the first one.
pub fn spread(samples: &[f64]) -> f64 {
    let Some(&first) = samples.first() else {
        return 0.0;
    };
    let (lo, hi) = samples
        .iter()
        .map(|&a| wrap_delta(first, a))
        .fold((0.0_f64, 0.0_f64), |(lo, hi), d| (lo.min(d), hi.max(d)));
    hi - lo
}
