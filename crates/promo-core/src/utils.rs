use chrono::Utc;

/// RFC3339 timestamp in UTC (for logs and registry entries).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

/// Truncate to `max_len` characters, appending `...` when cut.
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_len).collect();
    out.push_str("...");
    out
}
