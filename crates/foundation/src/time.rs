use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Milliseconds since the Unix epoch (UTC).
pub type EpochMs = i64;

pub const DAY_MS: i64 = 86_400_000;

pub fn now_ms() -> EpochMs {
    Utc::now().timestamp_millis()
}

/// Parses an ISO-8601 timestamp into epoch milliseconds.
///
/// Offset-less timestamps are read as UTC. Anything unparseable yields `None`.
pub fn parse_iso8601_ms(raw: &str) -> Option<EpochMs> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    None
}

pub fn format_iso8601(ms: EpochMs) -> Option<String> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Human-readable capture time used in photo captions.
pub fn format_capture_time(ms: EpochMs) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => "unknown time".to_string(),
    }
}
