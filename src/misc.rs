//! Small shared helpers for timestamps.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// UTC now in ISO-8601 with a `Z` suffix (e.g. `2025-12-19T00:00:00Z`).
#[must_use]
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse the subset of ISO-8601/RFC-3339 timestamps used by GitHub and PyPI.
///
/// Accepts `2025-11-30T12:33:58Z`, `2025-11-23T22:30:23.036058Z`, and
/// `2025-11-23T22:30:23+00:00`. Offset-less timestamps (PyPI's legacy
/// `upload_time` field, e.g. `2023-06-01T00:00:00`) are assumed UTC.
/// Returns UTC-normalized datetimes.
#[must_use]
pub fn parse_iso8601(value: Option<&str>) -> Option<DateTime<Utc>> {
    let s = value?.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok().map(|dt| dt.and_utc())
}

/// Walk a nested JSON object by field names, returning the value at the end of the path.
#[must_use]
pub fn get_nested<'a>(obj: &'a serde_json::Value, path: &[&str]) -> Option<&'a serde_json::Value> {
    let mut cur = obj;
    for p in path {
        cur = cur.as_object()?.get(*p)?;
    }
    Some(cur)
}
