// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Appliance self checks: NixOS generation, disk, time sync, essential
//! services, firewall posture.

use crate::probe::StateProbe;
use crate::windows::build;
use crate::{get_bool, get_i64, get_str, probe_error_result, DetectError, Detector};
use async_trait::async_trait;
use dw_core::{
    Clock, DriftResult, DriftStatus, EvidenceFragment, Platform, RawState, Severity, SystemClock,
    Target,
};
use std::sync::Arc;

pub(crate) const COLLECTOR: &str = r#"
set -u
echo "booted_generation=$(readlink /run/booted-system 2>/dev/null)"
echo "current_generation=$(readlink /run/current-system 2>/dev/null)"
echo "disk_used_pct=$(df -P / | awk 'NR==2 {gsub(/%/,"",$5); print $5}')"
echo "chrony_synced=$(chronyc tracking 2>/dev/null | grep -q 'Leap status.*Normal' && echo true || echo false)"
echo "failed_units=$(systemctl --failed --no-legend 2>/dev/null | wc -l)"
echo "nftables_active=$(systemctl is-active nftables >/dev/null 2>&1 && echo true || echo false)"
echo "iptables_chain_count=$(iptables-save 2>/dev/null | grep -c '^:')"
echo "iptables_hash=$(iptables-save 2>/dev/null | grep -v '^#' | sha256sum | cut -d' ' -f1)"
"#;

pub struct SelfDetector {
    probe: Arc<dyn StateProbe>,
}

impl SelfDetector {
    pub fn new(probe: Arc<dyn StateProbe>) -> Self {
        Self { probe }
    }

    /// Wire the built-in collector over an executor.
    pub fn over(executor: Arc<dyn dw_exec::Executor>) -> Self {
        Self::new(Arc::new(crate::probe::ScriptProbe::new(executor, COLLECTOR)))
    }
}

#[async_trait]
impl Detector for SelfDetector {
    fn name(&self) -> &'static str {
        "self"
    }

    fn platform(&self) -> Platform {
        Platform::NixosSelf
    }

    async fn run(&self, target: &Target) -> Result<Vec<DriftResult>, DetectError> {
        let now = dw_core::rfc3339_ms(SystemClock.now_utc());
        match self.probe.collect(target).await {
            Ok(state) => Ok(evaluate(&state, target, now)),
            Err(DetectError::Probe { detail, .. }) => {
                tracing::warn!(%detail, "self probe failed");
                Ok(vec![probe_error_result("self", target, detail, now)])
            }
        }
    }
}

pub(crate) fn evaluate(state: &RawState, target: &Target, now: String) -> Vec<DriftResult> {
    let mut results = Vec::new();

    // Generation equality: a pending switch means the booted system is
    // not what configuration says it should be.
    let booted = get_str(state, "booted_generation").unwrap_or("");
    let current = get_str(state, "current_generation").unwrap_or("");
    results.push(build(
        state,
        target,
        "generation",
        booted.is_empty() || booted != current,
        false,
        Severity::Medium,
        &["booted_generation", "current_generation"],
        None,
        &now,
    ));

    // Disk: >95% warn, >98% fail
    let disk = get_i64(state, "disk_used_pct").unwrap_or(0);
    results.push(build(
        state,
        target,
        "disk",
        disk > 98,
        disk > 95,
        Severity::High,
        &["disk_used_pct"],
        Some("RB-SELF-OPS-001"),
        &now,
    ));

    // Time sync
    let synced = get_bool(state, "chrony_synced").unwrap_or(false);
    results.push(build(
        state,
        target,
        "chrony",
        !synced,
        false,
        Severity::Medium,
        &["chrony_synced"],
        Some("RB-SELF-OPS-002"),
        &now,
    ));

    // Essential service liveness
    let failed_units = get_i64(state, "failed_units").unwrap_or(0);
    results.push(build(
        state,
        target,
        "services",
        failed_units > 0,
        false,
        Severity::High,
        &["failed_units"],
        Some("RB-SELF-OPS-003"),
        &now,
    ));

    results.push(firewall_posture(state, target, &now));
    results
}

/// Firewall posture with candidate ordering.
///
/// nftables is probed first (the NixOS default); if it answers, it is
/// authoritative and iptables state is ignored. Only when nftables is
/// inactive does the legacy path apply: more than 3 chains in
/// `iptables-save` plus a stable output hash counts as an active firewall.
/// Reporting drift because the *sibling* service is inactive is the classic
/// healing-loop bug this ordering exists to prevent.
pub(crate) fn firewall_posture(state: &RawState, target: &Target, now: &str) -> DriftResult {
    let nftables = get_bool(state, "nftables_active").unwrap_or(false);
    let chains = get_i64(state, "iptables_chain_count").unwrap_or(0);
    let iptables_hash = get_str(state, "iptables_hash").unwrap_or("");

    let active = nftables || (chains > 3 && !iptables_hash.is_empty());
    let mut result = build(
        state,
        target,
        "firewall",
        !active,
        false,
        Severity::High,
        &["nftables_active", "iptables_chain_count", "iptables_hash"],
        Some("RB-SELF-SEC-001"),
        now,
    );
    if !nftables && active {
        // Record which candidate answered, plus the ruleset fingerprint as
        // evidence for the bundle.
        result.evidence.push(EvidenceFragment::new(format!(
            "firewall authority=iptables chains={chains} hash={iptables_hash}"
        )));
    }
    debug_assert!(result.status != DriftStatus::Warn);
    result
}

#[cfg(test)]
#[path = "selfhost_tests.rs"]
mod tests;
