// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Order replay-nonce cache: 24-hour sliding window, persisted as
//! `nonces/used.json`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dw_core::{parse_rfc3339, rfc3339_ms};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const WINDOW: ChronoDuration = ChronoDuration::hours(24);

pub struct NonceCache {
    path: PathBuf,
    inner: Mutex<HashMap<String, String>>,
}

impl NonceCache {
    pub fn open(state_dir: &Path) -> std::io::Result<Self> {
        let dir = state_dir.join("nonces");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("used.json");
        let map: HashMap<String, String> = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        Ok(Self { path, inner: Mutex::new(map) })
    }

    /// Record an order id. Returns `false` if the id was already seen
    /// inside the window (a replay), `true` if it is fresh.
    pub fn check_and_insert(&self, order_id: &str, now: DateTime<Utc>) -> std::io::Result<bool> {
        let mut inner = self.inner.lock();
        let cutoff = now - WINDOW;
        inner.retain(|_, seen_at| {
            parse_rfc3339(seen_at).map(|t| t >= cutoff).unwrap_or(false)
        });
        if inner.contains_key(order_id) {
            return Ok(false);
        }
        inner.insert(order_id.to_string(), rfc3339_ms(now));
        let bytes = serde_json::to_vec(&*inner).unwrap_or_default();
        crate::write_atomic(&self.path, &bytes)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn fresh_ids_pass_replays_fail() {
        let dir = tempfile::tempdir().unwrap();
        let cache = NonceCache::open(dir.path()).unwrap();
        assert!(cache.check_and_insert("ord-1", now()).unwrap());
        assert!(!cache.check_and_insert("ord-1", now()).unwrap());
        assert!(cache.check_and_insert("ord-2", now()).unwrap());
    }

    #[test]
    fn replays_are_rejected_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = NonceCache::open(dir.path()).unwrap();
            cache.check_and_insert("ord-1", now()).unwrap();
        }
        let cache = NonceCache::open(dir.path()).unwrap();
        assert!(!cache.check_and_insert("ord-1", now()).unwrap());
    }

    #[test]
    fn entries_age_out_after_24_hours() {
        let dir = tempfile::tempdir().unwrap();
        let cache = NonceCache::open(dir.path()).unwrap();
        cache.check_and_insert("ord-1", now()).unwrap();
        let later = now() + ChronoDuration::hours(25);
        // The same id is acceptable again once outside the window
        assert!(cache.check_and_insert("ord-1", later).unwrap());
    }
}
