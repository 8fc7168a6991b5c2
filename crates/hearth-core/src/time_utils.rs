use chrono::{SecondsFormat, Utc};

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns the current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn utc_timestamp_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Returns the current UTC time in a form safe for use inside a path segment.
pub fn utc_timestamp_path_segment() -> String {
    utc_timestamp_rfc3339().replace(':', "-")
}
