// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Linux target checks: SSH hardening, firewall, auditd, mandatory access
//! control, patch level, CIS user/permission basics.

use crate::probe::StateProbe;
use crate::windows::build;
use crate::{get_bool, get_i64, get_str, probe_error_result, DetectError, Detector};
use async_trait::async_trait;
use dw_core::{Clock, DriftResult, Platform, RawState, Severity, SystemClock, Target};
use std::sync::Arc;

pub(crate) const COLLECTOR: &str = r#"
set -u
sshd_val() { sshd -T 2>/dev/null | awk -v k="$1" '$1==k {print $2; exit}'; }
echo "permit_root_login=$(sshd_val permitrootlogin)"
echo "password_authentication=$(sshd_val passwordauthentication)"
echo "ufw_active=$(ufw status 2>/dev/null | grep -q '^Status: active' && echo true || echo false)"
echo "firewalld_active=$(systemctl is-active firewalld >/dev/null 2>&1 && echo true || echo false)"
echo "auditd_running=$(systemctl is-active auditd >/dev/null 2>&1 && echo true || echo false)"
echo "selinux_mode=$(getenforce 2>/dev/null || echo absent)"
echo "apparmor_enabled=$(aa-status --enabled >/dev/null 2>&1 && echo true || echo false)"
if command -v apt-get >/dev/null 2>&1; then
  echo "security_updates_pending=$(apt-get -s upgrade 2>/dev/null | grep -ci security || true)"
else
  echo "security_updates_pending=$(yum -q updateinfo list security --available 2>/dev/null | wc -l)"
fi
echo "empty_password_users=$(awk -F: '($2==""){n++} END{print n+0}' /etc/shadow 2>/dev/null)"
echo "uid0_users=$(awk -F: '($3==0){n++} END{print n+0}' /etc/passwd)"
echo "world_writable_system_files=$(find /etc /usr/bin -xdev -type f -perm -0002 2>/dev/null | head -20 | wc -l)"
"#;

pub struct LinuxDetector {
    probe: Arc<dyn StateProbe>,
}

impl LinuxDetector {
    pub fn new(probe: Arc<dyn StateProbe>) -> Self {
        Self { probe }
    }

    /// Wire the built-in collector over an executor.
    pub fn over(executor: Arc<dyn dw_exec::Executor>) -> Self {
        Self::new(Arc::new(crate::probe::ScriptProbe::new(executor, COLLECTOR)))
    }
}

#[async_trait]
impl Detector for LinuxDetector {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn platform(&self) -> Platform {
        Platform::Linux
    }

    async fn run(&self, target: &Target) -> Result<Vec<DriftResult>, DetectError> {
        let now = dw_core::rfc3339_ms(SystemClock.now_utc());
        match self.probe.collect(target).await {
            Ok(state) => Ok(evaluate(&state, target, now)),
            Err(DetectError::Probe { detail, .. }) => {
                tracing::warn!(target = %target.id, %detail, "linux probe failed");
                Ok(vec![probe_error_result("linux", target, detail, now)])
            }
        }
    }
}

pub(crate) fn evaluate(state: &RawState, target: &Target, now: String) -> Vec<DriftResult> {
    let mut results = Vec::new();

    // SSH hardening: no root login, no password auth
    let root_login = get_str(state, "permit_root_login").unwrap_or("yes");
    let password_auth = get_str(state, "password_authentication").unwrap_or("yes");
    results.push(build(
        state,
        target,
        "ssh_hardening",
        !root_login.eq_ignore_ascii_case("no") || !password_auth.eq_ignore_ascii_case("no"),
        false,
        Severity::High,
        &["permit_root_login", "password_authentication"],
        Some("RB-LNX-SEC-001"),
        &now,
    ));

    // Firewall: probe candidates in order of local likelihood; the first
    // active one is authoritative (a sibling being inactive is not drift).
    let ufw = get_bool(state, "ufw_active").unwrap_or(false);
    let firewalld = get_bool(state, "firewalld_active").unwrap_or(false);
    results.push(build(
        state,
        target,
        "firewall",
        !(ufw || firewalld),
        false,
        Severity::High,
        &["ufw_active", "firewalld_active"],
        Some("RB-LNX-SEC-002"),
        &now,
    ));

    // auditd
    let auditd = get_bool(state, "auditd_running").unwrap_or(false);
    results.push(build(
        state,
        target,
        "auditd",
        !auditd,
        false,
        Severity::Medium,
        &["auditd_running"],
        Some("RB-LNX-SEC-003"),
        &now,
    ));

    // Mandatory access control: SELinux enforcing or AppArmor enabled.
    // A host with neither subsystem present fails; one enforcing is enough.
    let selinux = get_str(state, "selinux_mode").unwrap_or("absent");
    let apparmor = get_bool(state, "apparmor_enabled").unwrap_or(false);
    results.push(build(
        state,
        target,
        "mac_enforcement",
        !selinux.eq_ignore_ascii_case("enforcing") && !apparmor,
        false,
        Severity::Medium,
        &["selinux_mode", "apparmor_enabled"],
        Some("RB-LNX-SEC-004"),
        &now,
    ));

    // Patch level
    let pending = get_i64(state, "security_updates_pending").unwrap_or(0);
    results.push(build(
        state,
        target,
        "patch",
        pending > 0,
        false,
        Severity::High,
        &["security_updates_pending"],
        Some("RB-LNX-OPS-001"),
        &now,
    ));

    // CIS user/permission basics
    let empty_pw = get_i64(state, "empty_password_users").unwrap_or(0);
    let uid0 = get_i64(state, "uid0_users").unwrap_or(1);
    let world_writable = get_i64(state, "world_writable_system_files").unwrap_or(0);
    results.push(build(
        state,
        target,
        "cis_users",
        empty_pw > 0 || uid0 != 1,
        world_writable > 0,
        Severity::High,
        &["empty_password_users", "uid0_users", "world_writable_system_files"],
        Some("RB-LNX-SEC-005"),
        &now,
    ));

    results
}

#[cfg(test)]
#[path = "linux_tests.rs"]
mod tests;
