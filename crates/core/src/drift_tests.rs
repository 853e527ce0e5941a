// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn passing_result_is_consistent_by_construction() {
    let r = DriftResult::passing("chrony", "appliance-01", Platform::NixosSelf, "t".into());
    assert!(r.is_consistent());
    assert!(!r.drifted);
    assert_eq!(r.status, DriftStatus::Pass);
    assert_eq!(r.severity, Severity::Info);
}

#[test]
fn drifted_fail_is_consistent() {
    let r = DriftResult::builder().build();
    assert!(r.drifted);
    assert!(r.is_consistent());
}

#[test]
fn non_drifted_fail_is_flagged_inconsistent() {
    let r = DriftResult::builder().drifted(false).status(DriftStatus::Fail).build();
    assert!(!r.is_consistent());
}

#[test]
fn severity_orders_info_to_critical() {
    assert!(Severity::Info < Severity::Low);
    assert!(Severity::Low < Severity::Medium);
    assert!(Severity::Medium < Severity::High);
    assert!(Severity::High < Severity::Critical);
}

#[test]
fn evidence_fragment_is_hash_addressed() {
    let frag = EvidenceFragment::new("iptables-save output");
    assert_eq!(frag.digest.len(), 64);
    let again = EvidenceFragment::new("iptables-save output");
    assert_eq!(frag.digest, again.digest);
}

#[test]
fn platform_serializes_kebab_case() {
    assert_eq!(serde_json::to_string(&Platform::NixosSelf).unwrap(), "\"nixos-self\"");
    assert_eq!(serde_json::to_string(&Platform::Windows).unwrap(), "\"windows\"");
}
