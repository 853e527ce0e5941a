// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PHI scrubbing for evidence- and ticket-bound values.
//!
//! Contract: no MRN, SSN, DOB, email address, phone number, or
//! user-name-bearing UNC path appears in a persisted bundle or an outbound
//! ticket. Only values headed out of the process are scrubbed; debug logs
//! are not routed through here.

use crate::RawState;
use regex::Regex;
use serde_json::Value;

/// Compiled scrubbing patterns. Build once at startup and share.
#[derive(Debug, Clone)]
pub struct PhiScrubber {
    patterns: Vec<(Regex, &'static str)>,
}

impl PhiScrubber {
    pub fn new() -> Self {
        // Unwrap-free construction: patterns are literals, a failure here is
        // a programming error surfaced by tests, not runtime input.
        let specs: &[(&str, &str)] = &[
            // 123-45-6789
            (r"\b\d{3}-\d{2}-\d{4}\b", "[REDACTED:ssn]"),
            // MRN 12345678 / MRN#12345678 / mrn:12345678
            (r"(?i)\bMRN[:#\s]?\d{5,10}\b", "[REDACTED:mrn]"),
            // 01/02/1980, 1-2-1980, 01/02/80 date-of-birth shapes
            (
                r"\b(?:0?[1-9]|1[0-2])[/-](?:0?[1-9]|[12]\d|3[01])[/-](?:19|20)?\d{2}\b",
                "[REDACTED:dob]",
            ),
            // email
            (r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b", "[REDACTED:email]"),
            // +1 (555) 123-4567 and bare 555-123-4567
            (r"\b(?:\+?1[\s.-]?)?\(?\d{3}\)?[\s.-]\d{3}[\s.-]\d{4}\b", "[REDACTED:phone]"),
            // \\server\users\<name>\...: the username segment identifies a person
            (r"(?i)\\\\[A-Za-z0-9._-]+\\(?:users|home[s]?)\\[^\\\s]+", "[REDACTED:unc]"),
        ];
        let patterns = specs
            .iter()
            .filter_map(|(pat, label)| Regex::new(pat).ok().map(|re| (re, *label)))
            .collect();
        Self { patterns }
    }

    /// Scrub a string, replacing every match with its redaction label.
    pub fn scrub_str(&self, input: &str) -> String {
        let mut out = input.to_string();
        for (re, label) in &self.patterns {
            out = re.replace_all(&out, *label).into_owned();
        }
        out
    }

    /// Recursively scrub string leaves of a JSON value.
    pub fn scrub_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.scrub_str(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.scrub_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), self.scrub_value(v))).collect(),
            ),
            other => other.clone(),
        }
    }

    /// Scrub every value of a raw state map.
    pub fn scrub_state(&self, state: &RawState) -> RawState {
        state.iter().map(|(k, v)| (k.clone(), self.scrub_value(v))).collect()
    }
}

impl Default for PhiScrubber {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "scrub_tests.rs"]
mod tests;
