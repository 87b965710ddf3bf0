//! Small helpers shared by the config, remote and cache layers.

/// Longest error detail kept from a remote response
const MAX_DETAIL_CHARS: usize = 180;

/// Trim optional text, treating blank values as absent.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Trimmed and shortened text for log lines and error messages
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(MAX_DETAIL_CHARS).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The current time, or `floor` when the clock reads earlier.
///
/// Keeps `updated_at` from moving backwards under clock skew.
pub fn not_before(floor: i64) -> i64 {
    unix_millis_now().max(floor)
}
