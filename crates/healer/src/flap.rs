// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flap detection: resolved→recurring flips per pattern signature.
//!
//! A flip is counted when an incident arrives for a signature that was
//! successfully resolved inside the window. At or past the threshold the
//! healer skips L1/L2 and routes straight to L3.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub struct FlapTracker {
    window: Duration,
    threshold: u32,
    inner: Mutex<HashMap<String, SignatureState>>,
}

#[derive(Default)]
struct SignatureState {
    /// When the signature last resolved successfully.
    last_resolved: Option<Instant>,
    /// Flip timestamps inside the window.
    flips: VecDeque<Instant>,
}

impl FlapTracker {
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self { window, threshold, inner: Mutex::new(HashMap::new()) }
    }

    /// Record an incoming incident for the signature; returns `true` when
    /// the flap threshold is now met and the incident must go to L3.
    pub fn note_incident(&self, signature: &str, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        let state = inner.entry(signature.to_string()).or_default();
        if let Some(resolved_at) = state.last_resolved.take() {
            if now.duration_since(resolved_at) <= self.window {
                state.flips.push_back(now);
            }
        }
        Self::expire(state, self.window, now);
        state.flips.len() as u32 >= self.threshold
    }

    /// Record a successful resolution for the signature.
    pub fn note_resolved(&self, signature: &str, now: Instant) {
        let mut inner = self.inner.lock();
        inner.entry(signature.to_string()).or_default().last_resolved = Some(now);
    }

    /// Drop expired flip records (the flap-GC cadence).
    pub fn gc(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.retain(|_, state| {
            Self::expire(state, self.window, now);
            !state.flips.is_empty() || state.last_resolved.is_some()
        });
    }

    fn expire(state: &mut SignatureState, window: Duration, now: Instant) {
        while let Some(front) = state.flips.front() {
            if now.duration_since(*front) > window {
                state.flips.pop_front();
            } else {
                break;
            }
        }
    }
}
