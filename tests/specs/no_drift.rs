// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NixOS firewall false positive avoided: nftables down, iptables loaded,
//! no incident, no failure bundle.

use dw_core::Target;
use dw_detect::{parse_collector_output, Detector, SelfDetector, StateProbe};
use dw_exec::{FakeExecutor, ScriptOutput};
use std::sync::Arc;

#[tokio::test]
async fn populated_iptables_with_inactive_nftables_is_not_drift() {
    let exec = FakeExecutor::new();
    exec.push_output(ScriptOutput::ok(
        "booted_generation=/nix/store/abc-system-42\n\
         current_generation=/nix/store/abc-system-42\n\
         disk_used_pct=40\n\
         chrony_synced=true\n\
         failed_units=0\n\
         nftables_active=false\n\
         iptables_chain_count=7\n\
         iptables_hash=4a5e1e4baab89f3a32518a88c31bc87f\n",
    ));
    let detector = SelfDetector::over(Arc::new(exec));
    let results = detector.run(&Target::local_self("appliance-01")).await.unwrap();

    let firewall = results.iter().find(|r| r.check_id == "firewall").unwrap();
    assert!(!firewall.drifted, "sibling service inactivity must not be drift");
    assert_eq!(firewall.status.to_string(), "pass");
    // The iptables fingerprint is captured as evidence of the authority
    assert!(firewall.evidence.iter().any(|e| e.content.contains("authority=iptables")));

    // Nothing drifted at all on this healthy appliance
    assert!(results.iter().all(|r| !r.drifted));
}

#[tokio::test]
async fn probe_parses_real_collector_shapes() {
    let state = parse_collector_output(
        "nftables_active=false\niptables_chain_count=7\niptables_hash=abc123\n",
    );
    assert_eq!(state["iptables_chain_count"], serde_json::json!(7));
}

/// Guard against the collector round-trip being duplicated per check: one
/// probe call serves the whole detector run.
#[tokio::test]
async fn detector_makes_exactly_one_probe_round_trip() {
    struct CountingProbe(std::sync::atomic::AtomicUsize);

    #[async_trait::async_trait]
    impl StateProbe for CountingProbe {
        async fn collect(
            &self,
            _target: &Target,
        ) -> Result<dw_core::RawState, dw_detect::DetectError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(parse_collector_output("nftables_active=true\ndisk_used_pct=10\nchrony_synced=true\nfailed_units=0\nbooted_generation=g\ncurrent_generation=g\n"))
        }
    }

    let probe = Arc::new(CountingProbe(std::sync::atomic::AtomicUsize::new(0)));
    let detector = SelfDetector::new(probe.clone());
    let results = detector.run(&Target::local_self("a")).await.unwrap();
    assert!(results.len() >= 5);
    assert_eq!(probe.0.load(std::sync::atomic::Ordering::Relaxed), 1);
}
