// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Merged rule set and its atomic swap handle.

use crate::eval::rule_matches;
use crate::model::{L1Rule, RuleOrigin};
use dw_core::Incident;
use parking_lot::RwLock;
use std::sync::Arc;

/// An ordered, immutable rule set: ascending priority, ties broken by
/// `(origin, id)` lexicographic.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<L1Rule>,
}

impl RuleSet {
    /// Union of builtins, locally authored, and promoted rules.
    pub fn merge(
        builtin: Vec<L1Rule>,
        local: Vec<L1Rule>,
        promoted: Vec<L1Rule>,
    ) -> Self {
        let mut rules: Vec<L1Rule> =
            builtin.into_iter().chain(local).chain(promoted).collect();
        rules.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.origin.to_string().cmp(&b.origin.to_string()))
                .then_with(|| a.id.cmp(&b.id))
        });
        Self { rules }
    }

    pub fn iter(&self) -> impl Iterator<Item = &L1Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule (in priority order) matching the incident.
    pub fn first_match(&self, incident: &Incident) -> Option<&L1Rule> {
        self.rules.iter().find(|r| rule_matches(r, incident))
    }

    /// All matching rules in priority order; the engine walks these when
    /// an action errors and the next rule must be tried.
    pub fn matches<'a>(&'a self, incident: &'a Incident) -> impl Iterator<Item = &'a L1Rule> {
        self.rules.iter().filter(move |r| rule_matches(r, incident))
    }

    pub fn of_origin(&self, origin: RuleOrigin) -> impl Iterator<Item = &L1Rule> {
        self.rules.iter().filter(move |r| r.origin == origin)
    }
}

/// Atomically swappable rule set. Readers snapshot an `Arc`; in-flight
/// evaluations finish against the snapshot they took.
#[derive(Clone, Default)]
pub struct SharedRules {
    inner: Arc<RwLock<Arc<RuleSet>>>,
}

impl SharedRules {
    pub fn new(set: RuleSet) -> Self {
        Self { inner: Arc::new(RwLock::new(Arc::new(set))) }
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.inner.read())
    }

    pub fn replace(&self, set: RuleSet) {
        *self.inner.write() = Arc::new(set);
    }
}

#[cfg(test)]
#[path = "set_tests.rs"]
mod tests;
