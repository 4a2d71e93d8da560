//! Small helpers shared by config, auth and the remote client.

const ERROR_TEXT_LIMIT: usize = 180;

/// Trimmed text, or `None` when absent or blank.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

pub fn is_http_url(value: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// Trim remote error bodies to a loggable size.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(ERROR_TEXT_LIMIT).collect()
}

/// Unix seconds.
pub fn unix_timestamp_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Unix milliseconds, the unit of record timestamps and the pull watermark.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
