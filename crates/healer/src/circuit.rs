// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-(host, check) circuit breaker.
//!
//! Five consecutive failures within an hour open the breaker for thirty
//! minutes. The first attempt after expiry is the half-open probe; its
//! success closes the breaker, its failure re-opens.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// What the healer may do with an incident under the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    Proceed,
    /// Open: escalate directly to L3.
    Open,
    /// Expired open state: one probing attempt is allowed.
    HalfOpenProbe,
}

pub struct CircuitBreaker {
    failures_to_open: u32,
    open_duration: Duration,
    failure_window: Duration,
    inner: Mutex<HashMap<String, ResourceState>>,
    /// Optional durable snapshot so restarts keep open breakers open.
    snapshot_path: Option<PathBuf>,
}

#[derive(Default)]
struct ResourceState {
    consecutive_failures: u32,
    first_failure: Option<Instant>,
    open_until: Option<Instant>,
    half_open: bool,
}

impl CircuitBreaker {
    pub fn new(failures_to_open: u32, open_duration: Duration) -> Self {
        Self {
            failures_to_open,
            open_duration,
            failure_window: Duration::from_secs(3600),
            inner: Mutex::new(HashMap::new()),
            snapshot_path: None,
        }
    }

    /// Persist open-state across restarts under `state_dir`.
    pub fn with_snapshot(mut self, state_dir: &std::path::Path, now: Instant) -> Self {
        let path = state_dir.join("circuit.snapshot.json");
        if let Ok(text) = std::fs::read_to_string(&path) {
            if let Ok(remaining) = serde_json::from_str::<HashMap<String, u64>>(&text) {
                let mut inner = self.inner.lock();
                for (key, secs) in remaining {
                    inner.insert(
                        key,
                        ResourceState {
                            open_until: Some(now + Duration::from_secs(secs)),
                            ..Default::default()
                        },
                    );
                }
            }
        }
        self.snapshot_path = Some(path);
        self
    }

    pub fn check(&self, key: &str, now: Instant) -> CircuitDecision {
        let mut inner = self.inner.lock();
        let Some(state) = inner.get_mut(key) else { return CircuitDecision::Proceed };
        match state.open_until {
            Some(until) if now < until => CircuitDecision::Open,
            Some(_) => {
                state.open_until = None;
                state.half_open = true;
                CircuitDecision::HalfOpenProbe
            }
            None => CircuitDecision::Proceed,
        }
    }

    pub fn record(&self, key: &str, success: bool, now: Instant) {
        let mut inner = self.inner.lock();
        let state = inner.entry(key.to_string()).or_default();
        if success {
            *state = ResourceState::default();
        } else {
            if state.half_open {
                // Failed probe: straight back to open
                state.open_until = Some(now + self.open_duration);
                state.half_open = false;
                state.consecutive_failures = 0;
                state.first_failure = None;
                drop(inner);
                self.persist(now);
                return;
            }
            match state.first_failure {
                Some(first) if now.duration_since(first) <= self.failure_window => {}
                _ => {
                    state.consecutive_failures = 0;
                    state.first_failure = Some(now);
                }
            }
            state.consecutive_failures += 1;
            if state.consecutive_failures >= self.failures_to_open {
                state.open_until = Some(now + self.open_duration);
                state.consecutive_failures = 0;
                state.first_failure = None;
                tracing::warn!(key, "circuit breaker opened");
                drop(inner);
                self.persist(now);
                return;
            }
        }
    }

    fn persist(&self, now: Instant) {
        let Some(path) = &self.snapshot_path else { return };
        let inner = self.inner.lock();
        let remaining: HashMap<&String, u64> = inner
            .iter()
            .filter_map(|(key, state)| {
                let until = state.open_until?;
                Some((key, until.saturating_duration_since(now).as_secs()))
            })
            .collect();
        if let Ok(bytes) = serde_json::to_vec(&remaining) {
            if let Err(e) = std::fs::write(path, bytes) {
                tracing::warn!(error = %e, "circuit snapshot write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "WS01:firewall";

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_secs(1800))
    }

    fn fail_n(b: &CircuitBreaker, n: u32, start: Instant) {
        for i in 0..n {
            b.record(KEY, false, start + Duration::from_secs(i as u64));
        }
    }

    #[test]
    fn closed_until_five_consecutive_failures() {
        let b = breaker();
        let t0 = Instant::now();
        fail_n(&b, 4, t0);
        assert_eq!(b.check(KEY, t0 + Duration::from_secs(5)), CircuitDecision::Proceed);
        b.record(KEY, false, t0 + Duration::from_secs(5));
        assert_eq!(b.check(KEY, t0 + Duration::from_secs(6)), CircuitDecision::Open);
    }

    #[test]
    fn success_resets_the_count() {
        let b = breaker();
        let t0 = Instant::now();
        fail_n(&b, 4, t0);
        b.record(KEY, true, t0 + Duration::from_secs(10));
        fail_n(&b, 4, t0 + Duration::from_secs(20));
        assert_eq!(b.check(KEY, t0 + Duration::from_secs(30)), CircuitDecision::Proceed);
    }

    #[test]
    fn open_expires_into_half_open_probe() {
        let b = breaker();
        let t0 = Instant::now();
        fail_n(&b, 5, t0);
        assert_eq!(b.check(KEY, t0 + Duration::from_secs(60)), CircuitDecision::Open);
        let after = t0 + Duration::from_secs(1900);
        assert_eq!(b.check(KEY, after), CircuitDecision::HalfOpenProbe);
        // A successful probe closes the breaker
        b.record(KEY, true, after);
        assert_eq!(b.check(KEY, after + Duration::from_secs(1)), CircuitDecision::Proceed);
    }

    #[test]
    fn failed_probe_reopens_immediately() {
        let b = breaker();
        let t0 = Instant::now();
        fail_n(&b, 5, t0);
        let after = t0 + Duration::from_secs(1900);
        assert_eq!(b.check(KEY, after), CircuitDecision::HalfOpenProbe);
        b.record(KEY, false, after);
        assert_eq!(b.check(KEY, after + Duration::from_secs(1)), CircuitDecision::Open);
    }

    #[test]
    fn stale_failures_outside_the_hour_window_do_not_accumulate() {
        let b = breaker();
        let t0 = Instant::now();
        fail_n(&b, 4, t0);
        // A fifth failure two hours later starts a fresh window
        b.record(KEY, false, t0 + Duration::from_secs(7200));
        assert_eq!(b.check(KEY, t0 + Duration::from_secs(7201)), CircuitDecision::Proceed);
    }

    #[test]
    fn snapshot_keeps_breakers_open_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Instant::now();
        {
            let b = breaker().with_snapshot(dir.path(), t0);
            fail_n(&b, 5, t0);
        }
        let b = breaker().with_snapshot(dir.path(), t0 + Duration::from_secs(60));
        assert_eq!(b.check(KEY, t0 + Duration::from_secs(61)), CircuitDecision::Open);
    }
}
