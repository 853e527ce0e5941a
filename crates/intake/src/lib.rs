// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dw-intake: gRPC push intake for external workstation agents, plus the
//! `/healthz` and `/readyz` HTTP endpoints.
//!
//! Agents register with a public key; every subsequent event is verified
//! against it. Accepted drift events convert into the same [`DriftResult`]
//! a detector would produce and flow down the standard healer/evidence
//! path through the channel the daemon wires in. Unknown or invalid
//! events are dropped and counted, never processed.

mod health;
mod server;

// Generated protobuf types
pub mod proto {
    tonic::include_proto!("driftwarden.intake.v1");
}

pub use health::{serve_health, ReadyState};
pub use server::{serve_intake, IntakeCounters, IntakeService};

use dw_core::{DriftResult, DriftStatus, Platform, RawState, Severity};

/// Convert a verified wire event into the internal drift result.
pub fn drift_result_from_event(event: &proto::DriftEvent) -> Result<DriftResult, String> {
    let platform = match event.platform.as_str() {
        "windows" => Platform::Windows,
        "linux" => Platform::Linux,
        other => return Err(format!("unknown platform {other:?}")),
    };
    let status = match event.status.as_str() {
        "pass" => DriftStatus::Pass,
        "warn" => DriftStatus::Warn,
        "fail" => DriftStatus::Fail,
        "error" => DriftStatus::Error,
        other => return Err(format!("unknown status {other:?}")),
    };
    let severity = match event.severity.as_str() {
        "info" => Severity::Info,
        "low" => Severity::Low,
        "medium" => Severity::Medium,
        "high" => Severity::High,
        "critical" => Severity::Critical,
        other => return Err(format!("unknown severity {other:?}")),
    };
    if !event.drifted && status != DriftStatus::Pass {
        return Err("non-drifted event with non-pass status".to_string());
    }
    let pre_state: RawState = if event.pre_state_json.is_empty() {
        RawState::new()
    } else {
        serde_json::from_str(&event.pre_state_json)
            .map_err(|e| format!("pre_state_json: {e}"))?
    };
    Ok(DriftResult {
        check_id: event.check_id.clone(),
        target_id: event.hostname.clone(),
        platform,
        status,
        severity,
        drifted: event.drifted,
        pre_state,
        recommended_action: None,
        evidence: Vec::new(),
        timestamp: event.timestamp.clone(),
    })
}

/// The canonical byte string an agent signs for a drift event.
pub fn drift_event_message(event: &proto::DriftEvent) -> Vec<u8> {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        event.agent_id,
        event.check_id,
        event.hostname,
        event.status,
        event.pre_state_json,
        event.timestamp
    )
    .into_bytes()
}
