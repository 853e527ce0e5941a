// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flap escalation under attack: an actor reverts the firewall after every
//! heal; the sixth incident inside the window routes to L3.

use super::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn sixth_recurrence_in_window_escalates_with_flap_reason() {
    let h = harness();
    let mut signature = String::new();

    // Five cycles resolve at L1, each producing a bundle
    for cycle in 0..5 {
        let incident = h.firewall_incident();
        signature = incident.pattern_signature.clone();
        let result = h.healer.handle_incident(&incident).await.unwrap();
        assert!(result.success, "cycle {cycle}");
        h.seal_for(&incident, &result);
        h.clock.advance(Duration::from_secs(120));
    }
    let executor_calls = h.exec.call_count();

    // The attacker flips it again: sixth incident, same signature
    let sixth = h.firewall_incident();
    assert_eq!(sixth.pattern_signature, signature);
    let result = h.healer.handle_incident(&sixth).await.unwrap();

    assert_eq!(result.tier, Some(ResolutionTier::L3));
    assert_eq!(
        result.escalation_reason.map(|r| r.to_string()),
        Some("flap_detected".to_string())
    );
    assert_eq!(h.exec.call_count(), executor_calls, "L1 and L2 skipped");

    // Ticket delivered with the flap reason
    let tickets = h.tickets.lock();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].reason, "flap_detected");

    // Pattern stats: ≥6 occurrences, at least one failure (the L3 entry)
    let stat = h.patterns.get(&signature).unwrap();
    assert!(stat.occurrences >= 6, "occurrences {}", stat.occurrences);
    assert!(stat.failures >= 1);

    // Chain holds across all six bundles
    let bundle = h.seal_for(&sixth, &result);
    assert_eq!(bundle.outcome.to_string(), "escalated");
    assert_eq!(h.pipeline.verify_day(h.clock.now_utc().date_naive()).unwrap(), 6);
}
