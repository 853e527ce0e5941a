// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runbook catalog.
//!
//! Runbooks are data: named script bundles with `remediate` and `verify`
//! phases plus metadata (platform, disruptive flag). The catalog loads them
//! from `<rules_dir>/runbooks/` and filters dispatchability by the
//! server-enabled list delivered at check-in.

use crate::loader::RuleError;
use dw_core::Platform;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// A named, versioned script bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runbook {
    pub id: String,
    #[serde(default)]
    pub platform: Option<Platform>,
    /// Disruptive work defers to the maintenance window.
    #[serde(default)]
    pub disruptive: bool,
    pub remediate: String,
    pub verify: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// In-memory catalog with the check-in enabled filter.
#[derive(Clone, Default)]
pub struct RunbookCatalog {
    inner: Arc<RwLock<CatalogInner>>,
}

#[derive(Default)]
struct CatalogInner {
    runbooks: HashMap<String, Runbook>,
    /// `None` until the first check-in delivers a list; then a whitelist.
    enabled: Option<HashSet<String>>,
}

impl RunbookCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every runbook document under `<rules_dir>/runbooks/`.
    pub fn load_dir(&self, rules_dir: &Path) -> Result<usize, RuleError> {
        let dir = rules_dir.join("runbooks");
        if !dir.is_dir() {
            return Ok(0);
        }
        let entries = std::fs::read_dir(&dir)
            .map_err(|source| RuleError::Io { path: dir.display().to_string(), source })?;
        let mut loaded = HashMap::new();
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml") | Some("json")
            ) {
                continue;
            }
            let name = path.display().to_string();
            let text = std::fs::read_to_string(&path)
                .map_err(|source| RuleError::Io { path: name.clone(), source })?;
            let runbook: Runbook = serde_yaml::from_str(&text)
                .map_err(|source| RuleError::Parse { path: name, source })?;
            loaded.insert(runbook.id.clone(), runbook);
        }
        let count = loaded.len();
        self.inner.write().runbooks = loaded;
        tracing::info!(count, "loaded runbook catalog");
        Ok(count)
    }

    /// Insert or replace a runbook directly (tests, promoted bundles).
    pub fn insert(&self, runbook: Runbook) {
        self.inner.write().runbooks.insert(runbook.id.clone(), runbook);
    }

    /// Adopt the server's enabled list from a check-in response.
    pub fn set_enabled(&self, ids: Vec<String>) {
        self.inner.write().enabled = Some(ids.into_iter().collect());
    }

    /// Fetch a runbook if it exists and is enabled.
    pub fn get(&self, id: &str) -> Option<Runbook> {
        let inner = self.inner.read();
        if let Some(enabled) = &inner.enabled {
            if !enabled.contains(id) {
                return None;
            }
        }
        inner.runbooks.get(id).cloned()
    }

    /// Known (not necessarily enabled) runbook ids, for L2 planner context.
    pub fn known_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().runbooks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether the named runbook is flagged disruptive. Unknown runbooks
    /// are treated as disruptive so the maintenance gate fails safe.
    pub fn is_disruptive(&self, id: &str) -> bool {
        self.inner.read().runbooks.get(id).map_or(true, |r| r.disruptive)
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
