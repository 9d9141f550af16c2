//! Wall-clock helpers

use chrono::Utc;

/// Current Unix timestamp in seconds
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Current Unix timestamp in milliseconds
pub fn unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}
