// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incident record and its resolution state machine.
//!
//! Incidents are created from drifted check results and tracked through to a
//! terminal resolution. Terminal states never revert; the healer is the only
//! component that advances resolution fields.

use crate::drift::{DriftResult, Platform, Severity};
use crate::pattern::pattern_signature;
use crate::RawState;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Incident identifier (UUID v4).
pub type IncidentId = Uuid;

/// Resolution progress of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Open,
    Resolving,
    Resolved,
    Escalated,
}

impl ResolutionStatus {
    /// Terminal states never revert to non-terminal ones.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResolutionStatus::Resolved | ResolutionStatus::Escalated)
    }
}

crate::simple_display! {
    ResolutionStatus {
        Open => "open",
        Resolving => "resolving",
        Resolved => "resolved",
        Escalated => "escalated",
    }
}

/// Which tier of the auto-healer produced the resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResolutionTier {
    L1,
    L2,
    L3,
}

crate::simple_display! {
    ResolutionTier {
        L1 => "L1",
        L2 => "L2",
        L3 => "L3",
    }
}

/// Final outcome of a handled incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

crate::simple_display! {
    Outcome {
        Success => "success",
        Failure => "failure",
    }
}

/// Attempted transition out of a terminal state, or other illegal move.
///
/// This is an invariant-class error: callers treat it as corruption, not as
/// a retryable condition.
#[derive(Debug, Error)]
#[error("illegal incident transition {from} -> {to} for {id}")]
pub struct TransitionError {
    pub id: IncidentId,
    pub from: ResolutionStatus,
    pub to: ResolutionStatus,
}

/// A persistent record of one drift instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub site_id: String,
    pub host_id: String,
    pub check_type: String,
    pub platform: Platform,
    pub severity: Severity,
    /// RFC-3339 UTC, millisecond precision.
    pub created_at: String,
    pub raw_state: RawState,
    /// Stable hash over the normalized raw state; deterministic for
    /// semantically equal states.
    pub pattern_signature: String,
    /// Runbook id the originating detector recommended, if any.
    pub recommended_action: Option<String>,
    pub status: ResolutionStatus,
    pub tier: Option<ResolutionTier>,
    pub outcome: Option<Outcome>,
    pub runbook_id: Option<String>,
    /// RFC-3339 UTC; set when the incident reaches a terminal state.
    pub resolved_at: Option<String>,
}

impl Incident {
    /// Build an incident from a drifted check result.
    ///
    /// The drift's status and severity are folded into the raw snapshot so
    /// rule conditions evaluate purely over `raw_state` without reaching
    /// back to the originating result.
    pub fn from_drift(drift: &DriftResult, site_id: &str, created_at: String) -> Self {
        let mut raw_state = drift.pre_state.clone();
        raw_state.insert("status".into(), serde_json::json!(drift.status.to_string()));
        raw_state.insert("severity".into(), serde_json::json!(drift.severity.to_string()));
        Self {
            id: Uuid::new_v4(),
            site_id: site_id.to_string(),
            host_id: drift.target_id.clone(),
            check_type: drift.check_id.clone(),
            platform: drift.platform,
            severity: drift.severity,
            created_at,
            pattern_signature: pattern_signature(&drift.check_id, &raw_state),
            raw_state,
            recommended_action: drift.recommended_action.clone(),
            status: ResolutionStatus::Open,
            tier: None,
            outcome: None,
            runbook_id: None,
            resolved_at: None,
        }
    }

    /// Validate and apply a status transition.
    ///
    /// Legal moves: open→resolving, resolving→resolved, resolving→escalated,
    /// open→escalated (direct L3 routing). Anything out of a terminal state
    /// is rejected.
    pub fn transition(&mut self, to: ResolutionStatus) -> Result<(), TransitionError> {
        let legal = match (self.status, to) {
            (ResolutionStatus::Open, ResolutionStatus::Resolving)
            | (ResolutionStatus::Open, ResolutionStatus::Escalated)
            | (ResolutionStatus::Resolving, ResolutionStatus::Resolved)
            | (ResolutionStatus::Resolving, ResolutionStatus::Escalated) => true,
            (from, to) if from == to => true,
            _ => false,
        };
        if !legal || (self.status.is_terminal() && self.status != to) {
            return Err(TransitionError { id: self.id, from: self.status, to });
        }
        self.status = to;
        Ok(())
    }

    /// Record the terminal resolution fields in one step.
    pub fn resolve(
        &mut self,
        tier: ResolutionTier,
        outcome: Outcome,
        runbook_id: Option<String>,
        resolved_at: String,
    ) -> Result<(), TransitionError> {
        let to = match (tier, outcome) {
            (ResolutionTier::L3, _) => ResolutionStatus::Escalated,
            (_, Outcome::Success) => ResolutionStatus::Resolved,
            // A failed L1/L2 that stops short of escalation stays resolving;
            // callers escalate explicitly. Treat a direct failure-resolve as
            // escalation-free terminal only when forced by crash recovery.
            (_, Outcome::Failure) => ResolutionStatus::Resolved,
        };
        if self.status == ResolutionStatus::Open {
            self.transition(ResolutionStatus::Resolving)?;
        }
        self.transition(to)?;
        self.tier = Some(tier);
        self.outcome = Some(outcome);
        self.runbook_id = runbook_id;
        self.resolved_at = Some(resolved_at);
        Ok(())
    }
}

#[cfg(test)]
#[path = "incident_tests.rs"]
mod tests;
