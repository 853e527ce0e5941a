// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Learning sync: push pattern-stat deltas up, pull promoted rules down,
//! merge, swap.

use crate::client::{CommandClient, CommandError};
use dw_core::PatternTable;
use dw_rules::{builtin_rules, load_rules_dir, parse_rule_documents, RuleOrigin, RuleSet, SharedRules};
use dw_storage::{OfflineQueue, QueueKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durable sync cursors, `learning.cursors.json` under the state dir.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningCursors {
    #[serde(default)]
    pub promoted_rules: String,
    /// Last successful stat push, informational.
    #[serde(default)]
    pub last_push_at: Option<String>,
}

impl LearningCursors {
    fn path(state_dir: &Path) -> PathBuf {
        state_dir.join("learning.cursors.json")
    }

    pub fn load(state_dir: &Path) -> Self {
        std::fs::read_to_string(Self::path(state_dir))
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, state_dir: &Path) -> std::io::Result<()> {
        let bytes = serde_json::to_vec_pretty(self).unwrap_or_default();
        write_atomic_file(&Self::path(state_dir), &bytes)
    }
}

// write-temp-rename, matching the storage crate's discipline
fn write_atomic_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let tmp = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_data()?;
    }
    std::fs::rename(&tmp, path)
}

/// Outcome of one learning cycle, for logs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncReport {
    pub stats_pushed: usize,
    pub stats_queued: usize,
    pub rules_pulled: usize,
    pub rules_rejected: usize,
    pub ruleset_size: usize,
}

pub struct LearningSync {
    client: Arc<CommandClient>,
    queue: Arc<OfflineQueue>,
    patterns: PatternTable,
    rules: SharedRules,
    rules_dir: PathBuf,
    state_dir: PathBuf,
    cursors: Mutex<LearningCursors>,
    /// Promoted rules carried between pulls so a merge never loses
    /// earlier promotions.
    promoted: Mutex<Vec<dw_rules::L1Rule>>,
}

impl LearningSync {
    pub fn new(
        client: Arc<CommandClient>,
        queue: Arc<OfflineQueue>,
        patterns: PatternTable,
        rules: SharedRules,
        rules_dir: PathBuf,
        state_dir: PathBuf,
    ) -> Self {
        let cursors = LearningCursors::load(&state_dir);
        Self {
            client,
            queue,
            patterns,
            rules,
            rules_dir,
            state_dir,
            cursors: Mutex::new(cursors),
            promoted: Mutex::new(Vec::new()),
        }
    }

    /// One full cycle: push stat deltas (spilling to the offline queue
    /// when the server is unreachable), pull promoted rules, rebuild and
    /// swap the ruleset.
    pub async fn sync_once(&self, now: String) -> SyncReport {
        let mut report = SyncReport::default();

        // 1. Push pattern stats. Re-pushing an already-seen stat is a
        //    server-side no-op, so only the cursor matters.
        let dirty = self.patterns.take_dirty();
        if !dirty.is_empty() {
            match self.client.push_pattern_stats(&dirty).await {
                Ok(()) => {
                    report.stats_pushed = dirty.len();
                    let mut cursors = self.cursors.lock();
                    cursors.last_push_at = Some(now.clone());
                    if let Err(e) = cursors.save(&self.state_dir) {
                        tracing::warn!(error = %e, "cursor save failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stat push failed, spilling to queue");
                    for stat in &dirty {
                        self.patterns.mark_dirty(&stat.pattern_signature);
                        let payload = serde_json::json!({ "stats": [stat] });
                        match self.queue.enqueue(QueueKind::PatternStat, payload, now.clone()).await
                        {
                            Ok(dw_storage::EnqueueOutcome::Enqueued(_)) => {
                                report.stats_queued += 1
                            }
                            Ok(dw_storage::EnqueueOutcome::Dropped) => {
                                // Still dirty; the next direct push retries
                                tracing::warn!("stat spill dropped at queue cap");
                            }
                            Err(e) => tracing::error!(error = %e, "stat spill failed"),
                        }
                    }
                }
            }
        }

        // 2. Pull promoted rules since the cursor.
        let cursor = self.cursors.lock().promoted_rules.clone();
        match self.client.pull_promoted_rules(&cursor).await {
            Ok(response) => {
                let mut fresh = Vec::new();
                for doc in &response.rules {
                    let text = doc.to_string();
                    match parse_rule_documents(&text, RuleOrigin::Promoted, "promoted") {
                        Ok(mut rules) => fresh.append(&mut rules),
                        Err(e) => {
                            // One bad promoted rule never poisons the set
                            report.rules_rejected += 1;
                            tracing::warn!(error = %e, "rejected promoted rule");
                        }
                    }
                }
                report.rules_pulled = fresh.len();
                if !fresh.is_empty() {
                    let mut promoted = self.promoted.lock();
                    // Replace same-id promotions with the newer document
                    promoted.retain(|p| !fresh.iter().any(|f| f.id == p.id));
                    promoted.extend(fresh);
                }
                let mut cursors = self.cursors.lock();
                cursors.promoted_rules = response.cursor;
                if let Err(e) = cursors.save(&self.state_dir) {
                    tracing::warn!(error = %e, "cursor save failed");
                }
            }
            Err(CommandError::Network(e)) => {
                tracing::debug!(error = %e, "promoted-rule pull skipped (offline)");
            }
            Err(e) => {
                tracing::warn!(error = %e, "promoted-rule pull failed");
            }
        }

        // 3. Merge and swap.
        report.ruleset_size = self.rebuild_ruleset();
        report
    }

    /// Rebuild builtin ∪ local ∪ promoted and swap atomically. Also used
    /// at startup before the first sync.
    pub fn rebuild_ruleset(&self) -> usize {
        let local = match load_rules_dir(&self.rules_dir) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!(error = %e, "local rule load failed, keeping none");
                Vec::new()
            }
        };
        let promoted = self.promoted.lock().clone();
        let set = RuleSet::merge(builtin_rules(), local, promoted);
        let size = set.len();
        self.rules.replace(set);
        tracing::info!(rules = size, "ruleset swapped");
        size
    }
}

#[cfg(test)]
#[path = "learning_tests.rs"]
mod tests;
