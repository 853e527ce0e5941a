// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RFC-3339 UTC timestamp helpers.
//!
//! Every persisted record carries millisecond-precision RFC-3339 UTC
//! timestamps; this module is the single place that formats and parses them
//! so canonical serialization stays byte-stable.

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid RFC-3339 timestamp {value:?}: {source}")]
pub struct TimeParseError {
    pub value: String,
    #[source]
    source: chrono::ParseError,
}

/// Format a timestamp as RFC-3339 UTC with millisecond precision (`...Z`).
pub fn rfc3339_ms(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC-3339 timestamp, normalizing any offset to UTC.
pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| TimeParseError { value: s.to_string(), source })
}
