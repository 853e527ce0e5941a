// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pattern signatures and per-pattern statistics.
//!
//! A pattern signature is a stable hash over an incident's normalized raw
//! state. Semantically equal states must produce equal signatures, so the
//! normalization drops keys that vary between observations of the same
//! condition (timestamps, uptimes) before hashing.

use crate::RawState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// State keys that vary per observation and carry no pattern information.
const VOLATILE_KEYS: &[&str] = &["timestamp", "collected_at", "uptime_sec", "scan_id"];

/// Compute the stable signature for `(check_type, state)`.
///
/// Deterministic: `RawState` is a `BTreeMap`, so key order is fixed, and
/// numbers pass through `serde_json`'s canonical rendering.
pub fn pattern_signature(check_type: &str, state: &RawState) -> String {
    let mut hasher = Sha256::new();
    hasher.update(check_type.as_bytes());
    hasher.update([0u8]);
    for (key, value) in state {
        if VOLATILE_KEYS.contains(&key.as_str()) {
            continue;
        }
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(normalize(value).as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Render a value for hashing: strings trimmed, everything else via its
/// JSON form.
fn normalize(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Aggregated statistics for one pattern signature.
///
/// Counters are monotonically non-decreasing; pushed upward by the learning
/// sync service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternStat {
    pub pattern_signature: String,
    pub check_type: String,
    pub occurrences: u64,
    pub successes: u64,
    pub failures: u64,
    /// RFC-3339 UTC of the most recent observation.
    pub last_seen: String,
    pub avg_resolution_ms: u64,
}

impl PatternStat {
    pub fn new(pattern_signature: String, check_type: String, now: String) -> Self {
        Self {
            pattern_signature,
            check_type,
            occurrences: 0,
            successes: 0,
            failures: 0,
            last_seen: now,
            avg_resolution_ms: 0,
        }
    }

    /// Fold one terminal healing result into the counters.
    pub fn record(&mut self, success: bool, duration_ms: u64, now: String) {
        // Running average before the occurrence counter moves
        let total = self.avg_resolution_ms.saturating_mul(self.occurrences) + duration_ms;
        self.occurrences += 1;
        self.avg_resolution_ms = total / self.occurrences;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.last_seen = now;
    }
}

/// Shared pattern-stat table: the healer records, the learning service
/// drains deltas.
#[derive(Clone, Default)]
pub struct PatternTable {
    inner: std::sync::Arc<parking_lot::Mutex<TableInner>>,
}

#[derive(Default)]
struct TableInner {
    stats: std::collections::HashMap<String, PatternStat>,
    dirty: std::collections::HashSet<String>,
}

impl PatternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one terminal healing result into the signature's bucket.
    pub fn record(
        &self,
        signature: &str,
        check_type: &str,
        success: bool,
        duration_ms: u64,
        now: String,
    ) {
        let mut inner = self.inner.lock();
        let stat = inner
            .stats
            .entry(signature.to_string())
            .or_insert_with(|| {
                PatternStat::new(signature.to_string(), check_type.to_string(), now.clone())
            });
        stat.record(success, duration_ms, now);
        inner.dirty.insert(signature.to_string());
    }

    pub fn get(&self, signature: &str) -> Option<PatternStat> {
        self.inner.lock().stats.get(signature).cloned()
    }

    /// Snapshot the stats changed since the last drain and clear their
    /// dirty marks. Callers that fail to push may re-mark with
    /// [`PatternTable::mark_dirty`].
    pub fn take_dirty(&self) -> Vec<PatternStat> {
        let mut inner = self.inner.lock();
        let dirty: Vec<String> = inner.dirty.drain().collect();
        let mut out: Vec<PatternStat> =
            dirty.iter().filter_map(|sig| inner.stats.get(sig).cloned()).collect();
        out.sort_by(|a, b| a.pattern_signature.cmp(&b.pattern_signature));
        out
    }

    pub fn mark_dirty(&self, signature: &str) {
        self.inner.lock().dirty.insert(signature.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner.lock().stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A before/after snapshot of the fields that changed between pre-state and
/// post-state, captured for the learning service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDiff {
    pub changed: BTreeMap<String, FieldChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl StateDiff {
    /// Diff two states; keys present in either side are compared.
    pub fn between(pre: &RawState, post: &RawState) -> Self {
        let mut changed = BTreeMap::new();
        for (key, before) in pre {
            match post.get(key) {
                Some(after) if after == before => {}
                after => {
                    changed.insert(
                        key.clone(),
                        FieldChange { before: Some(before.clone()), after: after.cloned() },
                    );
                }
            }
        }
        for (key, after) in post {
            if !pre.contains_key(key) {
                changed.insert(
                    key.clone(),
                    FieldChange { before: None, after: Some(after.clone()) },
                );
            }
        }
        Self { changed }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

#[cfg(test)]
#[path = "pattern_tests.rs"]
mod tests;
