//! Calendar features: traffic multiplier and cyclic encodings.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

/// Travel-time multiplier for the hour and weekday of `at` (>1 is slower).
///
/// Weekday rush hours are the worst; weekends get half the weekday effect.
pub fn traffic_multiplier(at: DateTime<Utc>) -> f64 {
    let weekday = match at.hour() {
        7..=9 | 16..=18 => 1.3,
        10..=15 => 1.1,
        19..=21 => 1.0,
        _ => 0.85,
    };

    if is_weekend(at) {
        1.0 + (weekday - 1.0) * 0.5
    } else {
        weekday
    }
}

pub fn is_weekend(at: DateTime<Utc>) -> bool {
    matches!(at.weekday(), Weekday::Sat | Weekday::Sun)
}

/// `(sin, cos)` of the fractional hour on a 24h circle, so 23:30 and 00:30
/// end up close together.
pub fn cyclic_hour(at: DateTime<Utc>) -> (f64, f64) {
    let hour = at.hour() as f64 + at.minute() as f64 / 60.0;
    let angle = 2.0 * std::f64::consts::PI * hour / 24.0;
    (angle.sin(), angle.cos())
}

/// Monday = 0.0 ... Sunday = 1.0.
pub fn day_of_week(at: DateTime<Utc>) -> f64 {
    at.weekday().num_days_from_monday() as f64 / 6.0
}
