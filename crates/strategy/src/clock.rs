//! Session clock. All session logic runs on New York wall time.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

/// Convert an epoch-millisecond timestamp to New York local time.
pub fn ny_time(ts_ms: i64) -> DateTime<Tz> {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .unwrap_or_default()
        .with_timezone(&New_York)
}

/// Calendar day of `ts_ms` in New York.
pub fn day_key(ts_ms: i64) -> NaiveDate {
    ny_time(ts_ms).date_naive()
}

/// Local hour as a fraction, e.g. 08:30 -> 8.5.
pub fn hour_fraction(ts_ms: i64) -> f64 {
    let t = ny_time(ts_ms);
    t.hour() as f64 + t.minute() as f64 / 60.0
}

/// `start <= hour <= end`, both inclusive.
pub fn in_hour_range(ts_ms: i64, start: f64, end: f64) -> bool {
    let h = hour_fraction(ts_ms);
    h >= start && h <= end
}

/// `(hour, minute)` in New York.
pub fn hour_minute(ts_ms: i64) -> (u32, u32) {
    let t = ny_time(ts_ms);
    (t.hour(), t.minute())
}
