// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incident store: append-only operation log replayed into memory on open.
//!
//! The log is JSON lines, one operation per line. State is derived by
//! replay (operations are facts; state is a fold over them), which makes
//! crash recovery a free consequence of reopening the store.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dw_core::{
    parse_rfc3339, Incident, IncidentId, Outcome, ResolutionStatus, ResolutionTier,
    TransitionError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Incidents stuck in `resolving` longer than this are force-resolved as
/// orphaned on startup.
const ORPHAN_AFTER: ChronoDuration = ChronoDuration::hours(1);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt incident log at {path}:{line}: {detail}")]
    Corrupt { path: PathBuf, line: usize, detail: String },
    #[error("unknown incident {0}")]
    Unknown(IncidentId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// One durable operation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogOp {
    Record {
        incident: Incident,
    },
    Transition {
        id: IncidentId,
        status: ResolutionStatus,
        at: String,
    },
    Resolve {
        id: IncidentId,
        tier: Option<ResolutionTier>,
        outcome: Outcome,
        runbook_id: Option<String>,
        at: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Default)]
struct Replayed {
    incidents: HashMap<IncidentId, Incident>,
    /// When each currently-resolving incident entered that state.
    resolving_since: HashMap<IncidentId, String>,
}

pub struct IncidentStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    state: Replayed,
}

impl IncidentStore {
    /// Open (creating if absent) and replay the log.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let state = replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::info!(
            incidents = state.incidents.len(),
            path = %path.display(),
            "incident store opened"
        );
        Ok(Self { path: path.to_path_buf(), inner: Mutex::new(Inner { file, state }) })
    }

    /// Insert a new incident.
    pub fn record(&self, incident: &Incident) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        append(&mut inner.file, &LogOp::Record { incident: incident.clone() })?;
        inner.state.incidents.insert(incident.id, incident.clone());
        Ok(())
    }

    /// Mark an incident resolving (the healer is working on it).
    pub fn mark_resolving(&self, id: IncidentId, at: String) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let incident =
            inner.state.incidents.get_mut(&id).ok_or(StoreError::Unknown(id))?;
        incident.transition(ResolutionStatus::Resolving)?;
        inner.state.resolving_since.insert(id, at.clone());
        append(&mut inner.file, &LogOp::Transition { id, status: ResolutionStatus::Resolving, at })
    }

    /// Single atomic terminal transition. Rejects moves out of terminal
    /// states; that rejection is an invariant violation upstream.
    #[allow(clippy::too_many_arguments)]
    pub fn set_resolution(
        &self,
        id: IncidentId,
        tier: ResolutionTier,
        outcome: Outcome,
        runbook_id: Option<String>,
        at: String,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let incident =
            inner.state.incidents.get_mut(&id).ok_or(StoreError::Unknown(id))?;
        incident.resolve(tier, outcome, runbook_id.clone(), at.clone())?;
        inner.state.resolving_since.remove(&id);
        append(
            &mut inner.file,
            &LogOp::Resolve {
                id,
                tier: Some(tier),
                outcome,
                runbook_id,
                at,
                output,
                error,
            },
        )
    }

    pub fn get(&self, id: IncidentId) -> Option<Incident> {
        self.inner.lock().state.incidents.get(&id).cloned()
    }

    /// Incidents with the given pattern signature created at or after
    /// `since`. Used by flap detection and learning.
    pub fn query_signature(&self, signature: &str, since: DateTime<Utc>) -> Vec<Incident> {
        let inner = self.inner.lock();
        let mut hits: Vec<Incident> = inner
            .state
            .incidents
            .values()
            .filter(|i| i.pattern_signature == signature)
            .filter(|i| {
                parse_rfc3339(&i.created_at).map(|t| t >= since).unwrap_or(false)
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        hits
    }

    /// Open (non-terminal) incidents, oldest first. Crash recovery reads
    /// this on restart.
    pub fn list_open(&self, limit: usize) -> Vec<Incident> {
        let inner = self.inner.lock();
        let mut open: Vec<Incident> = inner
            .state
            .incidents
            .values()
            .filter(|i| !i.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        open.truncate(limit);
        open
    }

    /// Force-resolve incidents stuck in `resolving` for over an hour as
    /// `failure/orphaned`. Returns the repaired ids.
    pub fn recover_orphans(&self, now: DateTime<Utc>) -> Result<Vec<IncidentId>, StoreError> {
        let cutoff = now - ORPHAN_AFTER;
        let stuck: Vec<IncidentId> = {
            let inner = self.inner.lock();
            inner
                .state
                .resolving_since
                .iter()
                .filter(|(_, at)| {
                    parse_rfc3339(at).map(|t| t < cutoff).unwrap_or(true)
                })
                .map(|(id, _)| *id)
                .collect()
        };
        let at = dw_core::rfc3339_ms(now);
        for id in &stuck {
            tracing::warn!(incident_id = %id, "force-resolving orphaned incident");
            self.set_resolution(
                *id,
                ResolutionTier::L1,
                Outcome::Failure,
                None,
                at.clone(),
                None,
                Some("orphaned".to_string()),
            )?;
        }
        Ok(stuck)
    }

    /// Rewrite the log to just the live state (temp + rename), dropping
    /// replayed history.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let mut buf = Vec::new();
        for incident in inner.state.incidents.values() {
            serde_json::to_writer(&mut buf, &LogOp::Record { incident: incident.clone() })
                .map_err(|e| StoreError::Corrupt {
                    path: self.path.clone(),
                    line: 0,
                    detail: e.to_string(),
                })?;
            buf.push(b'\n');
        }
        crate::write_atomic(&self.path, &buf)?;
        inner.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().state.incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn append(file: &mut File, op: &LogOp) -> Result<(), StoreError> {
    let mut line = serde_json::to_vec(op).map_err(|e| StoreError::Corrupt {
        path: PathBuf::new(),
        line: 0,
        detail: e.to_string(),
    })?;
    line.push(b'\n');
    file.write_all(&line)?;
    file.sync_data()?;
    Ok(())
}

fn replay(path: &Path) -> Result<Replayed, StoreError> {
    let mut state = Replayed::default();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(state),
        Err(e) => return Err(e.into()),
    };
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let op: LogOp = match serde_json::from_str(&line) {
            Ok(op) => op,
            Err(e) => {
                // A torn final line after a crash is expected; anything in
                // the middle of the log is corruption worth surfacing.
                tracing::warn!(line = line_no + 1, error = %e, "skipping torn incident log line");
                continue;
            }
        };
        match op {
            LogOp::Record { incident } => {
                state.incidents.insert(incident.id, incident);
            }
            LogOp::Transition { id, status, at } => {
                if let Some(incident) = state.incidents.get_mut(&id) {
                    if incident.transition(status).is_ok()
                        && status == ResolutionStatus::Resolving
                    {
                        state.resolving_since.insert(id, at);
                    }
                }
            }
            LogOp::Resolve { id, tier, outcome, runbook_id, at, .. } => {
                if let Some(incident) = state.incidents.get_mut(&id) {
                    let tier = tier.unwrap_or(ResolutionTier::L1);
                    let _ = incident.resolve(tier, outcome, runbook_id, at);
                    state.resolving_since.remove(&id);
                }
            }
        }
    }
    Ok(state)
}

#[cfg(test)]
#[path = "incidents_tests.rs"]
mod tests;
