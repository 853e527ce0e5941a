// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for other crates' tests (behind `test-support`).

use crate::drift::{DriftResult, DriftStatus, Platform, Severity};
use crate::incident::Incident;
use crate::RawState;

/// A drifted Windows firewall failure, the canonical fixture shape.
pub fn firewall_drift(target_id: &str) -> DriftResult {
    let mut pre = RawState::new();
    pre.insert("profile_enabled".into(), serde_json::json!(false));
    pre.insert("profile".into(), serde_json::json!("domain"));
    pre.insert("service_running".into(), serde_json::json!(true));
    DriftResult::builder()
        .check_id("firewall")
        .target_id(target_id)
        .platform(Platform::Windows)
        .status(DriftStatus::Fail)
        .severity(Severity::High)
        .drifted(true)
        .pre_state(pre)
        .recommended_action("RB-WIN-SEC-001".to_string())
        .build()
}

/// An incident built from [`firewall_drift`].
pub fn firewall_incident(site_id: &str, target_id: &str) -> Incident {
    Incident::from_drift(&firewall_drift(target_id), site_id, "2026-01-01T00:00:00.000Z".into())
}
