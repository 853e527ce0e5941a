// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Windows firewall profile disabled → L1 heal → signed, chained bundle in
//! the queue.

use super::prelude::*;
use dw_evidence::{bundle_hash, Signer, GENESIS_PARENT};
use dw_storage::QueueKind;

#[tokio::test]
async fn firewall_drift_heals_at_l1_and_seals_chained_evidence() {
    let h = harness();
    let incident = h.firewall_incident();

    let result = h.healer.handle_incident(&incident).await.unwrap();
    assert_eq!(result.tier, Some(ResolutionTier::L1));
    assert!(result.success);

    // Remediate + verify ran against the target with the contract params
    let calls = h.exec.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].target_id, "WS01");
    assert_eq!(calls[0].params["Hostname"], "WS01");

    // Evidence: first bundle of the day, chained to genesis, verifiable
    let bundle = h.seal_for(&incident, &result);
    assert_eq!(bundle.bundle_id, "CB-2026-01-01-0001");
    assert_eq!(bundle.parent_hash, GENESIS_PARENT);
    assert_eq!(bundle.outcome.to_string(), "success");
    assert_eq!(bundle.healing_tier, Some(ResolutionTier::L1));
    assert!(bundle.framework_controls.contains(&"164.312(c)(1)".to_string()));
    assert_eq!(bundle_hash(&bundle).unwrap(), bundle.bundle_hash);
    let hash_bytes = hex_decode(&bundle.bundle_hash);
    assert!(Signer::verify_hex(&h.pipeline.public_key_hex(), &hash_bytes, &bundle.signature));

    // Present in the queue for delivery (telemetry rides alongside)
    let queued = h.queue.peek(QueueKind::Evidence).unwrap();
    assert_eq!(queued.payload["bundle_id"], serde_json::json!("CB-2026-01-01-0001"));
    assert!(h.queue.peek(QueueKind::Execution).is_some());
}

#[tokio::test]
async fn consecutive_heals_extend_the_chain() {
    let h = harness();
    let first = h.firewall_incident();
    let result = h.healer.handle_incident(&first).await.unwrap();
    let b1 = h.seal_for(&first, &result);

    h.clock.advance(std::time::Duration::from_secs(600));
    let second = h.firewall_incident();
    let result = h.healer.handle_incident(&second).await.unwrap();
    let b2 = h.seal_for(&second, &result);

    assert_eq!(b2.parent_hash, b1.bundle_hash);
    assert_eq!(h.pipeline.verify_day(h.clock.now_utc().date_naive()).unwrap(), 2);
}

fn hex_decode(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}
