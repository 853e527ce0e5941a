// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Windows target checks: BitLocker, Defender, firewall profiles, patch
//! level, screen lock, audit policy, event log service.

use crate::probe::StateProbe;
use crate::{get_bool, get_i64, get_str, probe_error_result, DetectError, Detector};
use async_trait::async_trait;
use dw_core::{Clock, DriftResult, DriftStatus, Platform, RawState, Severity, SystemClock, Target};
use std::sync::Arc;

/// Single round-trip collector. Output contract: `key=value` lines parsed
/// by [`crate::parse_collector_output`].
pub(crate) const COLLECTOR: &str = r#"
$ErrorActionPreference = 'SilentlyContinue'
$blv = Get-BitLockerVolume -MountPoint $env:SystemDrive
"bitlocker_protection_on=$($blv.ProtectionStatus -eq 'On')"
$mp = Get-MpComputerStatus
"defender_realtime=$($mp.RealTimeProtectionEnabled)"
"defender_definitions_age_days=$($mp.AntivirusSignatureAge)"
$profiles = Get-NetFirewallProfile
"firewall_domain_enabled=$(($profiles | Where-Object Name -eq 'Domain').Enabled)"
"firewall_private_enabled=$(($profiles | Where-Object Name -eq 'Private').Enabled)"
"firewall_public_enabled=$(($profiles | Where-Object Name -eq 'Public').Enabled)"
"firewall_service_running=$((Get-Service mpssvc).Status -eq 'Running')"
$searcher = (New-Object -ComObject Microsoft.Update.Session).CreateUpdateSearcher()
$missing = $searcher.Search("IsInstalled=0 and Type='Software'").Updates
"missing_critical_count=$(($missing | Where-Object MsrcSeverity -eq 'Critical').Count)"
"screen_lock_enabled=$((Get-ItemProperty 'HKCU:\Control Panel\Desktop').ScreenSaveActive -eq 1)"
"screen_lock_timeout_sec=$((Get-ItemProperty 'HKCU:\Control Panel\Desktop').ScreenSaveTimeOut)"
"audit_logon=$((auditpol /get /subcategory:'Logon' /r | ConvertFrom-Csv).'Inclusion Setting')"
"eventlog_service_running=$((Get-Service EventLog).Status -eq 'Running')"
"#;

pub struct WindowsDetector {
    probe: Arc<dyn StateProbe>,
}

impl WindowsDetector {
    pub fn new(probe: Arc<dyn StateProbe>) -> Self {
        Self { probe }
    }

    /// Wire the built-in collector over an executor.
    pub fn over(executor: Arc<dyn dw_exec::Executor>) -> Self {
        Self::new(Arc::new(crate::probe::ScriptProbe::new(executor, COLLECTOR)))
    }
}

#[async_trait]
impl Detector for WindowsDetector {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn platform(&self) -> Platform {
        Platform::Windows
    }

    async fn run(&self, target: &Target) -> Result<Vec<DriftResult>, DetectError> {
        let now = dw_core::rfc3339_ms(SystemClock.now_utc());
        match self.probe.collect(target).await {
            Ok(state) => Ok(evaluate(&state, target, now)),
            Err(DetectError::Probe { detail, .. }) => {
                tracing::warn!(target = %target.id, %detail, "windows probe failed");
                Ok(vec![probe_error_result("windows", target, detail, now)])
            }
        }
    }
}

/// Pure evaluation over collected state.
pub(crate) fn evaluate(state: &RawState, target: &Target, now: String) -> Vec<DriftResult> {
    let mut results = Vec::new();

    // BitLocker
    let bitlocker_on = get_bool(state, "bitlocker_protection_on").unwrap_or(false);
    results.push(build(
        state,
        target,
        "bitlocker",
        !bitlocker_on,
        false,
        Severity::High,
        &["bitlocker_protection_on"],
        Some("RB-WIN-SEC-003"),
        &now,
    ));

    // Defender: real-time on, definitions at most 7 days old
    let realtime = get_bool(state, "defender_realtime").unwrap_or(false);
    let age = get_i64(state, "defender_definitions_age_days").unwrap_or(i64::MAX);
    results.push(build(
        state,
        target,
        "defender",
        !realtime,
        realtime && age > 7,
        Severity::High,
        &["defender_realtime", "defender_definitions_age_days"],
        Some("RB-WIN-SEC-004"),
        &now,
    ));

    // Firewall: distinguish profile disabled from service stopped. The
    // service being down is the worse condition; a disabled profile with a
    // running service is the remediable one.
    let service = get_bool(state, "firewall_service_running").unwrap_or(false);
    let domain = get_bool(state, "firewall_domain_enabled").unwrap_or(false);
    let private = get_bool(state, "firewall_private_enabled").unwrap_or(false);
    let public = get_bool(state, "firewall_public_enabled").unwrap_or(false);
    let all_profiles = domain && private && public;
    let failed = !service || !all_profiles;
    let mut firewall = build(
        state,
        target,
        "firewall",
        failed,
        false,
        if service { Severity::High } else { Severity::Critical },
        &[
            "firewall_service_running",
            "firewall_domain_enabled",
            "firewall_private_enabled",
            "firewall_public_enabled",
        ],
        Some("RB-WIN-SEC-001"),
        &now,
    );
    if failed {
        // Condensed fields the L1 rules key on
        firewall.pre_state.insert("profile_enabled".into(), serde_json::json!(all_profiles));
        firewall.pre_state.insert("service_running".into(), serde_json::json!(service));
        let first_disabled = [("domain", domain), ("private", private), ("public", public)]
            .iter()
            .find(|(_, enabled)| !enabled)
            .map(|(name, _)| *name)
            .unwrap_or("none");
        firewall.pre_state.insert("profile".into(), serde_json::json!(first_disabled));
    }
    results.push(firewall);

    // Patch level: any missing critical update is a fail
    let missing = get_i64(state, "missing_critical_count").unwrap_or(0);
    results.push(build(
        state,
        target,
        "patch",
        missing > 0,
        false,
        Severity::High,
        &["missing_critical_count"],
        Some("RB-WIN-OPS-002"),
        &now,
    ));

    // Screen lock policy: enabled, timeout <= 15 minutes
    let lock_on = get_bool(state, "screen_lock_enabled").unwrap_or(false);
    let timeout = get_i64(state, "screen_lock_timeout_sec").unwrap_or(i64::MAX);
    results.push(build(
        state,
        target,
        "screen_lock",
        !lock_on || timeout > 900,
        false,
        Severity::Medium,
        &["screen_lock_enabled", "screen_lock_timeout_sec"],
        Some("RB-WIN-SEC-005"),
        &now,
    ));

    // Audit policy: logon auditing must capture success and failure
    let audit = get_str(state, "audit_logon").unwrap_or("");
    results.push(build(
        state,
        target,
        "audit_policy",
        !audit.eq_ignore_ascii_case("Success and Failure"),
        false,
        Severity::Medium,
        &["audit_logon"],
        Some("RB-WIN-SEC-006"),
        &now,
    ));

    // Event log service
    let eventlog = get_bool(state, "eventlog_service_running").unwrap_or(false);
    results.push(build(
        state,
        target,
        "event_log",
        !eventlog,
        false,
        Severity::Medium,
        &["eventlog_service_running"],
        Some("RB-WIN-OPS-003"),
        &now,
    ));

    results
}

/// Assemble one result, copying the named keys into `pre_state` so L1 rules
/// can evaluate without re-probing.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build(
    state: &RawState,
    target: &Target,
    check: &str,
    failed: bool,
    warn: bool,
    severity: Severity,
    keys: &[&str],
    action: Option<&str>,
    now: &str,
) -> DriftResult {
    let (status, drifted) = if failed {
        (DriftStatus::Fail, true)
    } else if warn {
        (DriftStatus::Warn, true)
    } else {
        (DriftStatus::Pass, false)
    };
    let mut pre_state = RawState::new();
    if drifted {
        for key in keys {
            if let Some(v) = state.get(*key) {
                pre_state.insert((*key).to_string(), v.clone());
            }
        }
    }
    DriftResult {
        check_id: check.to_string(),
        target_id: target.id.clone(),
        platform: target.platform,
        status,
        severity: if drifted { severity } else { Severity::Info },
        drifted,
        pre_state,
        recommended_action: if drifted { action.map(str::to_string) } else { None },
        evidence: Vec::new(),
        timestamp: now.to_string(),
    }
}

#[cfg(test)]
#[path = "windows_tests.rs"]
mod tests;
