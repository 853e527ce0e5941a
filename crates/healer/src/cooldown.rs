// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-(host, check) cooldown accounting.
//!
//! Only attempts that actually *executed* arm the cooldown; deferred and
//! gated attempts do not. Precedence for the effective cooldown value:
//! rule override > incident-type default > global default.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct CooldownTracker {
    last_execution: Mutex<HashMap<String, Instant>>,
    /// Per-check-type defaults, configurable between rule and global.
    type_defaults: HashMap<String, Duration>,
    global: Duration,
}

impl CooldownTracker {
    pub fn new(global: Duration, type_defaults: HashMap<String, Duration>) -> Self {
        Self { last_execution: Mutex::new(HashMap::new()), type_defaults, global }
    }

    /// Effective cooldown under the precedence policy.
    pub fn effective(&self, check_type: &str, rule_override: Option<Duration>) -> Duration {
        rule_override
            .or_else(|| self.type_defaults.get(check_type).copied())
            .unwrap_or(self.global)
    }

    /// Whether an execution on `key` is allowed at `now`.
    pub fn allows(&self, key: &str, cooldown: Duration, now: Instant) -> bool {
        match self.last_execution.lock().get(key) {
            Some(last) => now.duration_since(*last) >= cooldown,
            None => true,
        }
    }

    /// Arm the cooldown after a real execution.
    pub fn touch(&self, key: &str, now: Instant) {
        self.last_execution.lock().insert(key.to_string(), now);
    }
}
