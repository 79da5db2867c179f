//! Time helpers for TOUCHLINE.
//!
//! The feed marks "no timestamp" either by omitting the member or by sending
//! the zero instant `0001-01-01T00:00:00Z`. Both are treated as unset.

use chrono::{DateTime, SecondsFormat, Utc};

/// Unix seconds of `0001-01-01T00:00:00Z`
pub const ZERO_INSTANT_SECS: i64 = -62_135_596_800;

/// Whether a timestamp is the feed's zero instant
#[must_use]
pub fn is_zero_instant(ts: &DateTime<Utc>) -> bool {
    ts.timestamp() == ZERO_INSTANT_SECS && ts.timestamp_subsec_nanos() == 0
}

/// Returns the timestamp only when it is set
#[must_use]
pub fn non_zero(ts: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    ts.filter(|t| !is_zero_instant(t))
}

/// RFC 3339 with second precision and a `Z` suffix
#[must_use]
pub fn format_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Formats an optional timestamp, yielding an empty string when unset
#[must_use]
pub fn format_optional(ts: Option<DateTime<Utc>>) -> String {
    non_zero(ts).map(|t| format_rfc3339(&t)).unwrap_or_default()
}
