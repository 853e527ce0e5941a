// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::parse_collector_output;
use dw_core::DriftStatus;
use serde_json::json;

fn target() -> Target {
    Target {
        id: "LNX01".into(),
        address: "10.0.0.9".into(),
        platform: Platform::Linux,
        transport: dw_core::Transport::Ssh,
        credentials: "c1".into(),
        tls_verify: true,
        allow_plaintext: false,
        port: None,
    }
}

fn healthy_state() -> RawState {
    parse_collector_output(
        "permit_root_login=no\n\
         password_authentication=no\n\
         ufw_active=true\n\
         firewalld_active=false\n\
         auditd_running=true\n\
         selinux_mode=absent\n\
         apparmor_enabled=true\n\
         security_updates_pending=0\n\
         empty_password_users=0\n\
         uid0_users=1\n\
         world_writable_system_files=0\n",
    )
}

fn find<'a>(results: &'a [DriftResult], check: &str) -> &'a DriftResult {
    results.iter().find(|r| r.check_id == check).unwrap()
}

#[test]
fn healthy_host_produces_all_passes() {
    let results = evaluate(&healthy_state(), &target(), "t".into());
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| !r.drifted));
}

#[test]
fn inactive_sibling_firewall_is_not_drift() {
    // ufw active, firewalld inactive: first responding candidate wins
    let results = evaluate(&healthy_state(), &target(), "t".into());
    let fw = find(&results, "firewall");
    assert_eq!(fw.status, DriftStatus::Pass);
    assert!(!fw.drifted);
}

#[test]
fn firewalld_alone_also_passes() {
    let mut state = healthy_state();
    state.insert("ufw_active".into(), json!(false));
    state.insert("firewalld_active".into(), json!(true));
    let results = evaluate(&state, &target(), "t".into());
    assert!(!find(&results, "firewall").drifted);
}

#[test]
fn no_active_firewall_fails() {
    let mut state = healthy_state();
    state.insert("ufw_active".into(), json!(false));
    let results = evaluate(&state, &target(), "t".into());
    let fw = find(&results, "firewall");
    assert_eq!(fw.status, DriftStatus::Fail);
    assert_eq!(fw.recommended_action.as_deref(), Some("RB-LNX-SEC-002"));
}

#[yare::parameterized(
    root_login = { "permit_root_login", json!("yes"), "ssh_hardening" },
    password_auth = { "password_authentication", json!("yes"), "ssh_hardening" },
    auditd_down = { "auditd_running", json!(false), "auditd" },
    patches_pending = { "security_updates_pending", json!(4), "patch" },
    empty_passwords = { "empty_password_users", json!(2), "cis_users" },
    extra_uid0 = { "uid0_users", json!(2), "cis_users" },
)]
fn regressions_fail_their_check(key: &str, value: serde_json::Value, check: &str) {
    let mut state = healthy_state();
    state.insert(key.into(), value);
    let results = evaluate(&state, &target(), "t".into());
    assert_eq!(find(&results, check).status, DriftStatus::Fail, "{check}");
}

#[test]
fn selinux_enforcing_satisfies_mac_without_apparmor() {
    let mut state = healthy_state();
    state.insert("selinux_mode".into(), json!("Enforcing"));
    state.insert("apparmor_enabled".into(), json!(false));
    let results = evaluate(&state, &target(), "t".into());
    assert!(!find(&results, "mac_enforcement").drifted);
}

#[test]
fn neither_mac_subsystem_fails() {
    let mut state = healthy_state();
    state.insert("apparmor_enabled".into(), json!(false));
    let results = evaluate(&state, &target(), "t".into());
    assert_eq!(find(&results, "mac_enforcement").status, DriftStatus::Fail);
}

#[test]
fn world_writable_files_warn() {
    let mut state = healthy_state();
    state.insert("world_writable_system_files".into(), json!(3));
    let results = evaluate(&state, &target(), "t".into());
    assert_eq!(find(&results, "cis_users").status, DriftStatus::Warn);
}
