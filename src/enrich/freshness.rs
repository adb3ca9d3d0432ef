//! Deciding whether a metrics bucket is due for a refetch.

use crate::misc::parse_iso8601;
use chrono::{DateTime, Utc};

/// Whether a bucket should be refetched.
///
/// Rules:
/// - threshold `None` or <= 0: always refetch;
/// - `is_stale` true: refetch regardless of age;
/// - no parseable `fetched_at`: refetch;
/// - otherwise refetch only when the fetch is at least `refresh_older_than_hours` old.
#[must_use]
pub fn should_refetch(fetched_at: Option<&str>, is_stale: Option<bool>, refresh_older_than_hours: Option<f64>, now: DateTime<Utc>) -> bool {
    let Some(threshold_hours) = refresh_older_than_hours else {
        return true;
    };
    if threshold_hours <= 0.0 {
        return true;
    }
    if is_stale == Some(true) {
        return true;
    }

    let Some(fetched) = parse_iso8601(fetched_at) else {
        return true;
    };

    let age_hours = now.signed_duration_since(fetched).num_seconds() as f64 / 3600.0;
    age_hours >= threshold_hours
}
