use chrono::Utc;

/// Milliseconds since the Unix epoch; clocks set before the epoch read as zero.
pub fn current_unix_timestamp_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}
