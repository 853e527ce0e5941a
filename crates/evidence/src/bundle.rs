// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bundle record and id format.

use chrono::NaiveDate;
use dw_core::{RawState, ResolutionTier};
use serde::{Deserialize, Serialize};

/// Terminal outcome recorded in a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleOutcome {
    /// Scan cycle with no drift.
    NoDrift,
    Success,
    Failure,
    Escalated,
    DryRunSuccess,
    DryRunPlan,
}

dw_core::simple_display! {
    BundleOutcome {
        NoDrift => "no_drift",
        Success => "success",
        Failure => "failure",
        Escalated => "escalated",
        DryRunSuccess => "dry_run_success",
        DryRunPlan => "dry_run_plan",
    }
}

/// Immutable once sealed. The hash covers the canonical JSON of every
/// field except `bundle_hash` and `signature`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub bundle_id: String,
    pub site_id: String,
    pub host_id: String,
    pub check_id: String,
    pub outcome: BundleOutcome,
    pub framework_controls: Vec<String>,
    pub pre_state: RawState,
    pub post_state: RawState,
    pub actions_taken: Vec<String>,
    pub healing_tier: Option<ResolutionTier>,
    pub dry_run: bool,
    pub phi_scrubbed: bool,
    /// RFC-3339 UTC, millisecond precision.
    pub created_at: String,
    /// Previous bundle's hash for this (site, host); all-zeros genesis.
    pub parent_hash: String,
    /// SHA-256 over the canonical JSON, hex.
    pub bundle_hash: String,
    /// Ed25519 over the hash bytes, hex.
    pub signature: String,
}

/// Unsealed bundle content, produced by the scan/healer path. `host_id`
/// selects the chain the bundle extends.
#[derive(Debug, Clone)]
pub struct BundleInput {
    pub host_id: String,
    pub check_id: String,
    pub outcome: BundleOutcome,
    pub framework_controls: Vec<String>,
    pub pre_state: RawState,
    pub post_state: RawState,
    pub actions_taken: Vec<String>,
    pub healing_tier: Option<ResolutionTier>,
    pub dry_run: bool,
}

impl BundleInput {
    /// A no-drift cycle record for one check on one host.
    pub fn no_drift(check_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            check_id: check_id.into(),
            outcome: BundleOutcome::NoDrift,
            framework_controls: Vec::new(),
            pre_state: RawState::new(),
            post_state: RawState::new(),
            actions_taken: Vec::new(),
            healing_tier: None,
            dry_run: false,
        }
    }
}

/// `CB-YYYY-MM-DD-NNNN`, monotonically increasing per UTC day.
pub fn format_bundle_id(day: NaiveDate, seq: u32) -> String {
    format!("CB-{}-{seq:04}", day.format("%Y-%m-%d"))
}

/// Parse a bundle id back into its day and sequence.
pub fn parse_bundle_id(id: &str) -> Option<(NaiveDate, u32)> {
    let rest = id.strip_prefix("CB-")?;
    // YYYY-MM-DD is exactly 10 bytes
    if rest.len() < 12 {
        return None;
    }
    let (date_part, seq_part) = rest.split_at(10);
    let day = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let seq: u32 = seq_part.strip_prefix('-')?.parse().ok()?;
    Some((day, seq))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
    }

    #[test]
    fn bundle_id_formats_and_parses() {
        let id = format_bundle_id(day(), 1);
        assert_eq!(id, "CB-2026-01-01-0001");
        assert_eq!(parse_bundle_id(&id), Some((day(), 1)));
    }

    #[test]
    fn bundle_id_sequence_exceeding_four_digits_still_parses() {
        let id = format_bundle_id(day(), 12_345);
        assert_eq!(id, "CB-2026-01-01-12345");
        assert_eq!(parse_bundle_id(&id), Some((day(), 12_345)));
    }

    #[yare::parameterized(
        no_prefix = { "XB-2026-01-01-0001" },
        bad_date = { "CB-2026-13-01-0001" },
        no_seq = { "CB-2026-01-01" },
        junk = { "CB-" },
    )]
    fn malformed_ids_do_not_parse(id: &str) {
        assert_eq!(parse_bundle_id(id), None);
    }

    #[test]
    fn outcome_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&BundleOutcome::DryRunPlan).unwrap(),
            "\"dry_run_plan\""
        );
    }
}
