//! Small helpers shared across the edgehub workspace.
//!
//! ## Core Features:
//! - **Duration Conversion**: String-to-Duration parsing supporting multiple time units
//! - **Timestamp Utilities**: Second and millisecond resolution timestamps with formatting
//! - **Counter Implementation**: Thread-safe counter tracking a current value and its peak ([`Counter`])
//!
//! ## Usage Examples:
//! ```rust
//! use edgehub_utils::{to_duration, timestamp_millis, Counter};
//!
//! // Duration conversion
//! let duration = to_duration("1h30m15s");
//! assert_eq!(duration.as_secs(), 5415);
//!
//! // Millisecond timestamp
//! assert!(timestamp_millis() > 0);
//!
//! // Counter with peak tracking
//! let c = Counter::new();
//! c.inc();
//! c.inc();
//! c.dec();
//! assert_eq!(c.count(), 1);
//! assert_eq!(c.max(), 2);
//! ```

#![deny(unsafe_code)]

use std::time::Duration;

use chrono::LocalResult;
use serde::de::{Deserialize, Deserializer};

mod counter;

pub use counter::Counter;

/// Timestamp representation in seconds since Unix epoch
pub type Timestamp = i64;

/// Timestamp representation in milliseconds since Unix epoch
pub type TimestampMillis = i64;

/// Deserialize Duration from human-readable string format
#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

/// Deserialize optional Duration from string
#[inline]
pub fn deserialize_duration_option<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    if v.is_empty() {
        Ok(None)
    } else {
        Ok(Some(to_duration(&v)))
    }
}

/// Convert human-readable duration string to Duration
///
/// # Supported units:
/// - ms: milliseconds
/// - s: seconds
/// - m: minutes
/// - h: hours
/// - d: days
/// - w: weeks
///
/// # Example:
/// ```
/// let duration = edgehub_utils::to_duration("1h30m15s");
/// assert_eq!(duration.as_secs(), 5415);
///
/// let millis = edgehub_utils::to_duration("250ms");
/// assert_eq!(millis.as_millis(), 250);
/// ```
#[inline]
pub fn to_duration(text: &str) -> Duration {
    let text = text.to_lowercase().replace("ms", "Y");
    let ms: u64 = text
        .split_inclusive(['s', 'm', 'h', 'd', 'w', 'Y'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().parse::<u64>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'Y' => v,
                's' => v * 1000,
                'm' => v * 60000,
                'h' => v * 3600000,
                'd' => v * 86400000,
                'w' => v * 604800000,
                _ => 0,
            }
        })
        .sum();
    Duration::from_millis(ms)
}

/// Get current timestamp as Duration
#[inline]
pub fn timestamp() -> Duration {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_else(|_| {
        let now = chrono::Local::now();
        Duration::new(now.timestamp() as u64, now.timestamp_subsec_nanos())
    })
}

/// Get current timestamp in seconds
///
/// # Example:
/// ```
/// let ts = edgehub_utils::timestamp_secs();
/// assert!(ts > 0);
/// ```
#[inline]
pub fn timestamp_secs() -> Timestamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_secs() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp())
}

/// Get current timestamp in milliseconds
///
/// # Example:
/// ```
/// let ts = edgehub_utils::timestamp_millis();
/// assert!(ts > 0);
/// ```
#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp_millis())
}

/// Format timestamp (seconds) to human-readable string
#[inline]
pub fn format_timestamp(t: Timestamp) -> String {
    if t <= 0 {
        "".into()
    } else {
        use chrono::TimeZone;
        if let LocalResult::Single(t) = chrono::Local.timestamp_opt(t, 0) {
            t.format("%Y-%m-%d %H:%M:%S").to_string()
        } else {
            "".into()
        }
    }
}

/// Format current timestamp to string
///
/// # Example:
/// ```
/// let now = edgehub_utils::format_timestamp_now();
/// assert!(!now.is_empty());
/// ```
#[inline]
pub fn format_timestamp_now() -> String {
    format_timestamp(timestamp_secs())
}

/// Format millisecond timestamp to string
#[inline]
pub fn format_timestamp_millis(t: TimestampMillis) -> String {
    if t <= 0 {
        "".into()
    } else {
        use chrono::TimeZone;
        if let LocalResult::Single(t) = chrono::Local.timestamp_millis_opt(t) {
            t.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
        } else {
            "".into()
        }
    }
}

/// Format current millisecond timestamp to string
#[inline]
pub fn format_timestamp_millis_now() -> String {
    format_timestamp_millis(timestamp_millis())
}
