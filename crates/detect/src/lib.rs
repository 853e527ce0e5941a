// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dw-detect: drift detectors for Windows targets, Linux targets, and the
//! appliance itself.
//!
//! A detector makes exactly one probe round-trip per scan (a collector
//! script returning `key=value` lines) and then evaluates every check
//! *purely* over the collected state. The collected map doubles as the
//! incident's `pre_state`, so the L1 engine never re-queries the target.
//! Detectors are idempotent and side-effect-free; remediation belongs to
//! the healer.

mod linux;
mod probe;
mod selfhost;
mod windows;

pub use linux::LinuxDetector;
pub use probe::{parse_collector_output, ScriptProbe, StateProbe};
pub use selfhost::SelfDetector;
pub use windows::WindowsDetector;

use async_trait::async_trait;
use dw_core::{DriftResult, Platform, RawState, Target};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("probe failed for {target}: {detail}")]
    Probe { target: String, detail: String },
}

/// One detector per platform; the set is assembled at startup and driven by
/// the scheduler on each drift-scan tick.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    fn platform(&self) -> Platform;
    async fn run(&self, target: &Target) -> Result<Vec<DriftResult>, DetectError>;
}

/// A probe failure becomes a single `status=error` result so the scan cycle
/// stays observable without aborting other targets.
pub(crate) fn probe_error_result(
    detector: &str,
    target: &Target,
    detail: String,
    timestamp: String,
) -> DriftResult {
    use dw_core::{DriftStatus, Severity};
    let mut state = RawState::new();
    state.insert("probe_error".into(), serde_json::json!(detail));
    DriftResult {
        check_id: format!("{detector}_probe"),
        target_id: target.id.clone(),
        platform: target.platform,
        status: DriftStatus::Error,
        severity: Severity::Medium,
        drifted: true,
        pre_state: state,
        recommended_action: None,
        evidence: Vec::new(),
        timestamp,
    }
}

// --- typed accessors over collected state ---------------------------------

pub(crate) fn get_bool(state: &RawState, key: &str) -> Option<bool> {
    state.get(key)?.as_bool()
}

pub(crate) fn get_i64(state: &RawState, key: &str) -> Option<i64> {
    let v = state.get(key)?;
    v.as_i64().or_else(|| v.as_str()?.trim().parse().ok())
}

pub(crate) fn get_str<'a>(state: &'a RawState, key: &str) -> Option<&'a str> {
    state.get(key)?.as_str()
}
