// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Result of one `handle_incident` pass through the auto-healer.

use crate::incident::{IncidentId, ResolutionTier};
use serde::{Deserialize, Serialize};

/// Why a healing attempt was deferred instead of executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferralReason {
    MaintenanceWindow,
    Cooldown,
    /// Healing globally disabled by config; the incident stays open.
    Disabled,
}

crate::simple_display! {
    DeferralReason {
        MaintenanceWindow => "maintenance_window",
        Cooldown => "cooldown",
        Disabled => "disabled",
    }
}

/// Why an incident was routed to L3 (or recorded as such on the result).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    FlapDetected,
    CircuitOpen,
    NoMatchingRule,
    /// An L1 rule's action was `escalate`.
    RuleDirected,
    RemediationFailed,
    L2BudgetExhausted,
    L2LowConfidence,
    L2ParseFailure,
    L2RequestedEscalation,
    L2Disabled,
}

crate::simple_display! {
    EscalationReason {
        FlapDetected => "flap_detected",
        CircuitOpen => "circuit_open",
        NoMatchingRule => "no_matching_rule",
        RuleDirected => "rule_directed",
        RemediationFailed => "remediation_failed",
        L2BudgetExhausted => "l2_budget_exhausted",
        L2LowConfidence => "l2_low_confidence",
        L2ParseFailure => "l2_parse_failure",
        L2RequestedEscalation => "l2_requested_escalation",
        L2Disabled => "l2_disabled",
    }
}

/// One `handle_incident` call produces exactly one of these.
///
/// The tier is monotonically non-decreasing within a single handling: a
/// result never reports a lower tier than any attempt it subsumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingResult {
    pub incident_id: IncidentId,
    /// Tier that produced the terminal outcome; `None` for deferrals.
    pub tier: Option<ResolutionTier>,
    /// Action taken (runbook id or synthetic action name).
    pub action: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
    /// Opaque remediation output (already scrubbed by the caller if it
    /// leaves the healer).
    pub output: Option<String>,
    pub error: Option<String>,
    pub deferral: Option<DeferralReason>,
    pub escalation_reason: Option<EscalationReason>,
    pub dry_run: bool,
}

impl HealingResult {
    pub fn deferred(incident_id: IncidentId, reason: DeferralReason) -> Self {
        Self {
            incident_id,
            tier: None,
            action: None,
            success: false,
            duration_ms: 0,
            output: None,
            error: None,
            deferral: Some(reason),
            escalation_reason: None,
            dry_run: false,
        }
    }

    pub fn is_deferred(&self) -> bool {
        self.deferral.is_some()
    }

    /// Terminal means the incident reached resolved/escalated this pass.
    pub fn is_terminal(&self) -> bool {
        !self.is_deferred()
    }
}
