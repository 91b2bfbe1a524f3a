//! Shared timestamp, duration and envelope helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;
use ulid::Ulid;

static ISO8601_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^P(?:(\d+(?:\.\d+)?)Y)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)W)?(?:(\d+(?:\.\d+)?)D)?(?:T(?:(\d+(?:\.\d+)?)H)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)S)?)?$",
    )
    .expect("duration pattern compiles")
});

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// RFC 3339 with millisecond precision and a `Z` suffix, the xAPI timestamp shape.
pub fn to_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_rfc3339() -> String {
    to_rfc3339(&now())
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

pub fn is_iso8601_duration(raw: &str) -> bool {
    raw != "P" && !raw.ends_with('T') && ISO8601_DURATION.is_match(raw)
}

/// Converts an ISO-8601 duration to seconds. Years and months use 365 and 30 days.
pub fn parse_duration_secs(raw: &str) -> Option<f64> {
    if !is_iso8601_duration(raw) {
        return None;
    }
    let caps = ISO8601_DURATION.captures(raw)?;
    const UNITS: [f64; 7] = [
        365.0 * 86_400.0,
        30.0 * 86_400.0,
        7.0 * 86_400.0,
        86_400.0,
        3_600.0,
        60.0,
        1.0,
    ];
    let mut total = 0.0;
    for (idx, unit) in UNITS.iter().enumerate() {
        if let Some(m) = caps.get(idx + 1) {
            total += m.as_str().parse::<f64>().ok()? * unit;
        }
    }
    Some(total)
}

/// Formats whole seconds as `PT#H#M#S`, omitting zero components (`PT0S` for zero).
pub fn format_duration_secs(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = seconds % 3600 / 60;
    let secs = seconds % 60;

    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{}H", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}M", minutes));
    }
    if secs > 0 || (hours == 0 && minutes == 0) {
        out.push_str(&format!("{}S", secs));
    }
    out
}

/// Standard command response envelope shape used across CLI surfaces.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now_rfc3339(),
        "event_id": new_event_id(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_round_trip_keeps_millis() {
        let ts = parse_timestamp("2025-01-11T10:00:00.250Z").unwrap();
        assert_eq!(to_rfc3339(&ts), "2025-01-11T10:00:00.250Z");
    }

    #[test]
    fn test_parse_timestamp_accepts_offsets() {
        let ts = parse_timestamp("2025-01-11T13:00:00+03:00").unwrap();
        assert_eq!(to_rfc3339(&ts), "2025-01-11T10:00:00.000Z");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_new_event_id_is_valid_ulid() {
        let id = new_event_id();
        assert!(ulid::Ulid::from_string(&id).is_ok());
        assert_ne!(id, new_event_id());
    }

    #[test]
    fn test_duration_parse() {
        assert_eq!(parse_duration_secs("PT30S"), Some(30.0));
        assert_eq!(parse_duration_secs("PT1H2M3S"), Some(3723.0));
        assert_eq!(parse_duration_secs("PT1.5S"), Some(1.5));
        assert_eq!(parse_duration_secs("P1D"), Some(86_400.0));
        assert_eq!(parse_duration_secs("P"), None);
        assert_eq!(parse_duration_secs("PT"), None);
        assert_eq!(parse_duration_secs("30 seconds"), None);
    }

    #[test]
    fn test_duration_format() {
        assert_eq!(format_duration_secs(0), "PT0S");
        assert_eq!(format_duration_secs(59), "PT59S");
        assert_eq!(format_duration_secs(3600), "PT1H");
        assert_eq!(format_duration_secs(3723), "PT1H2M3S");
    }

    #[test]
    fn test_command_envelope_with_extra() {
        let envelope = command_envelope("progress", "ok", serde_json::json!({"percent": 50}));
        assert_eq!(envelope["cmd"], "progress");
        assert_eq!(envelope["status"], "ok");
        assert_eq!(envelope["percent"], 50);
        assert_eq!(envelope["envelope_version"], "1.0.0");
    }
}
