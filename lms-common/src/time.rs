//! Timestamp utilities

use chrono::{DateTime, Duration, Utc};

/// Current Unix epoch time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Timestamp `minutes` after `start`
pub fn add_minutes(start: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    start + Duration::minutes(minutes)
}
