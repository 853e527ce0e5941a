// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drift check outcomes produced by detectors.

use crate::RawState;
use serde::{Deserialize, Serialize};

/// Platform a target (or the appliance itself) runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Windows,
    Linux,
    NixosSelf,
}

crate::simple_display! {
    Platform {
        Windows => "windows",
        Linux => "linux",
        NixosSelf => "nixos-self",
    }
}

/// Status of a single compliance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    Pass,
    Warn,
    Fail,
    /// The check itself could not run (probe failure, parse failure).
    Error,
}

crate::simple_display! {
    DriftStatus {
        Pass => "pass",
        Warn => "warn",
        Fail => "fail",
        Error => "error",
    }
}

/// Severity carried into incidents and escalation tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

crate::simple_display! {
    Severity {
        Info => "info",
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

/// A hash-addressed fragment of raw evidence (command output, file excerpt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceFragment {
    /// SHA-256 of `content`, hex.
    pub digest: String,
    pub content: String,
}

impl EvidenceFragment {
    pub fn new(content: impl Into<String>) -> Self {
        use sha2::{Digest, Sha256};
        let content = content.into();
        let digest = hex::encode(Sha256::digest(content.as_bytes()));
        Self { digest, content }
    }
}

/// Outcome of one check against one target.
///
/// Never persisted as-is; the incident builder consumes drifted results and
/// the evidence pipeline wraps terminal outcomes. `pre_state` must carry
/// enough state for the L1 engine to evaluate rule conditions without
/// re-querying the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftResult {
    pub check_id: String,
    pub target_id: String,
    pub platform: Platform,
    pub status: DriftStatus,
    pub severity: Severity,
    pub drifted: bool,
    pub pre_state: RawState,
    /// Runbook id a detector recommends for remediation, if it has one.
    pub recommended_action: Option<String>,
    pub evidence: Vec<EvidenceFragment>,
    /// RFC-3339 UTC, millisecond precision.
    pub timestamp: String,
}

impl DriftResult {
    /// A passing, non-drifted result. Enforces the `drifted=false ⇒ pass`
    /// invariant by construction.
    pub fn passing(
        check_id: impl Into<String>,
        target_id: impl Into<String>,
        platform: Platform,
        timestamp: String,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            target_id: target_id.into(),
            platform,
            status: DriftStatus::Pass,
            severity: Severity::Info,
            drifted: false,
            pre_state: RawState::new(),
            recommended_action: None,
            evidence: Vec::new(),
            timestamp,
        }
    }

    /// Validate the cross-field invariant: a non-drifted result is a pass.
    pub fn is_consistent(&self) -> bool {
        self.drifted || self.status == DriftStatus::Pass
    }
}

crate::builder! {
    pub struct DriftResultBuilder => DriftResult {
        into {
            check_id: String = "firewall",
            target_id: String = "WS01",
            recommended_action: Option<String> = None,
            timestamp: String = "2026-01-01T00:00:00.000Z",
        }
        set {
            platform: Platform = Platform::Windows,
            status: DriftStatus = DriftStatus::Fail,
            severity: Severity = Severity::High,
            drifted: bool = true,
            pre_state: crate::RawState = crate::RawState::new(),
        }
        computed {
            evidence: Vec<EvidenceFragment> = Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "drift_tests.rs"]
mod tests;
