// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ed25519_dalek::{Signer as _, SigningKey};

fn service(capacity: usize) -> (Arc<IntakeService>, mpsc::Receiver<DriftResult>, Arc<IntakeCounters>) {
    let (tx, rx) = mpsc::channel(capacity);
    let counters = Arc::new(IntakeCounters::default());
    (Arc::new(IntakeService::new(tx, Arc::clone(&counters))), rx, counters)
}

fn agent_key() -> SigningKey {
    SigningKey::from_bytes(&[11u8; 32])
}

async fn register(service: &Arc<IntakeService>, key: &SigningKey) {
    let response = service
        .register(Request::new(RegisterRequest {
            agent_id: "agent-1".into(),
            capabilities: vec!["drift".into()],
            public_key: hex::encode(key.verifying_key().to_bytes()),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(response.accepted);
    assert!(response.config_json.contains("report_interval_sec"));
}

fn signed_event(key: &SigningKey) -> DriftEvent {
    let mut event = DriftEvent {
        agent_id: "agent-1".into(),
        check_id: "firewall".into(),
        hostname: "WS09".into(),
        platform: "windows".into(),
        status: "fail".into(),
        severity: "high".into(),
        drifted: true,
        pre_state_json: r#"{"profile_enabled": false}"#.into(),
        timestamp: "2026-01-01T00:00:00.000Z".into(),
        signature: String::new(),
    };
    event.signature = hex::encode(key.sign(&drift_event_message(&event)).to_bytes());
    event
}

#[tokio::test]
async fn registered_agent_events_flow_into_the_pipeline() {
    let (service, mut rx, counters) = service(8);
    let key = agent_key();
    register(&service, &key).await;

    let ack = service.process_event(&signed_event(&key));
    assert!(ack.accepted, "{}", ack.reason);
    let result = rx.recv().await.unwrap();
    assert_eq!(result.target_id, "WS09");
    assert_eq!(counters.accepted.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn unknown_agents_are_dropped_and_counted() {
    let (service, mut rx, counters) = service(8);
    // No registration
    let ack = service.process_event(&signed_event(&agent_key()));
    assert!(!ack.accepted);
    assert_eq!(ack.reason, "unknown_agent");
    assert_eq!(counters.dropped_unknown_agent.load(Ordering::Relaxed), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn tampered_events_fail_signature_verification() {
    let (service, mut rx, counters) = service(8);
    let key = agent_key();
    register(&service, &key).await;

    let mut event = signed_event(&key);
    event.pre_state_json = r#"{"profile_enabled": true}"#.into();
    let ack = service.process_event(&event);
    assert!(!ack.accepted);
    assert_eq!(ack.reason, "bad_signature");
    assert_eq!(counters.dropped_bad_signature.load(Ordering::Relaxed), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn event_signed_by_a_different_key_is_dropped() {
    let (service, _rx, counters) = service(8);
    let key = agent_key();
    register(&service, &key).await;

    let other = SigningKey::from_bytes(&[99u8; 32]);
    let mut event = signed_event(&other);
    event.agent_id = "agent-1".into();
    // Re-sign over the changed agent id so only the key is wrong
    event.signature = hex::encode(other.sign(&drift_event_message(&event)).to_bytes());
    let ack = service.process_event(&event);
    assert!(!ack.accepted);
    assert_eq!(counters.dropped_bad_signature.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn malformed_but_signed_events_are_counted_separately() {
    let (service, _rx, counters) = service(8);
    let key = agent_key();
    register(&service, &key).await;

    let mut event = signed_event(&key);
    event.platform = "solaris".into();
    event.signature = hex::encode(key.sign(&drift_event_message(&event)).to_bytes());
    let ack = service.process_event(&event);
    assert!(!ack.accepted);
    assert_eq!(counters.dropped_malformed.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn full_intake_channel_rejects_rather_than_blocks() {
    let (service, _rx, _counters) = service(1);
    let key = agent_key();
    register(&service, &key).await;

    assert!(service.process_event(&signed_event(&key)).accepted);
    let ack = service.process_event(&signed_event(&key));
    assert!(!ack.accepted);
    assert_eq!(ack.reason, "intake_full");
}

#[tokio::test]
async fn register_rejects_malformed_keys() {
    let (service, _rx, _counters) = service(8);
    let status = service
        .register(Request::new(RegisterRequest {
            agent_id: "agent-1".into(),
            capabilities: vec![],
            public_key: "not-hex".into(),
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn heartbeat_returns_server_time() {
    let (service, _rx, _counters) = service(8);
    let response = service
        .heartbeat(Request::new(HeartbeatRequest { agent_id: "agent-1".into() }))
        .await
        .unwrap()
        .into_inner();
    assert!(response.server_time.ends_with('Z'));
}
