// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! ISO-8601 timestamp handling shared by the change log, the checkpoint
//! file and record parsing.

use chrono::{DateTime, FixedOffset, NaiveDateTime};

/// Timestamps keep the offset they were written with.
pub type Timestamp = DateTime<FixedOffset>;

/// Parse ISO-8601 text.
///
/// A trailing `Z` is rewritten to `+00:00` first. Text without any offset
/// (`2024-01-01T00:00:00`) is taken as UTC.
///
/// ```
/// use cve_sync::timestamp::parse_timestamp;
///
/// let ts = parse_timestamp("2024-09-04T16:10:39.061Z").unwrap();
/// assert_eq!(ts.to_rfc3339(), "2024-09-04T16:10:39.061+00:00");
/// ```
pub fn parse_timestamp(text: &str) -> Result<Timestamp, chrono::ParseError> {
    let text = text.trim();
    let normalized = match text.strip_suffix('Z').or_else(|| text.strip_suffix('z')) {
        Some(stem) => format!("{}+00:00", stem),
        None => text.to_string(),
    };

    match DateTime::parse_from_rfc3339(&normalized) {
        Ok(ts) => Ok(ts),
        Err(rfc_err) => NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc().fixed_offset())
            .map_err(|_| rfc_err),
    }
}

/// Render for persistence. Milliseconds are kept when present.
#[must_use]
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, false)
}
