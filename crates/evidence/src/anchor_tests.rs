// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bundle::{format_bundle_id, BundleOutcome, EvidenceBundle};
use crate::chain::GENESIS_PARENT;
use std::sync::mpsc;

/// One-shot calendar fake: serves scripted (status, body) responses and
/// reports the paths it saw.
fn serve(responses: Vec<(u16, Vec<u8>)>) -> (String, mpsc::Receiver<String>) {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let base = format!("http://{}", server.server_addr());
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for (status, body) in responses {
            let Ok(request) = server.recv() else { return };
            let _ = tx.send(request.url().to_string());
            let response = tiny_http::Response::from_data(body)
                .with_status_code(tiny_http::StatusCode(status));
            let _ = request.respond(response);
        }
    });
    (base, rx)
}

/// A committed bundle so sidecar paths have a directory to land in.
fn committed_bundle(dir: &std::path::Path) -> (BundleStore, String, String) {
    let store = BundleStore::open(dir).unwrap();
    let day = chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
    let bundle = EvidenceBundle {
        bundle_id: format_bundle_id(day, 1),
        site_id: "site-1".into(),
        host_id: "WS01".into(),
        check_id: "firewall".into(),
        outcome: BundleOutcome::Success,
        framework_controls: vec![],
        pre_state: Default::default(),
        post_state: Default::default(),
        actions_taken: vec![],
        healing_tier: None,
        dry_run: false,
        phi_scrubbed: true,
        created_at: "2026-01-01T00:00:00.000Z".into(),
        parent_hash: GENESIS_PARENT.into(),
        bundle_hash: "ab".repeat(32),
        signature: "cd".repeat(64),
    };
    store.commit(&bundle).unwrap();
    (store, bundle.bundle_id, bundle.bundle_hash)
}

#[tokio::test]
async fn successful_submit_writes_the_pending_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let (store, bundle_id, bundle_hash) = committed_bundle(dir.path());
    let (base, rx) = serve(vec![(200, b"proof-v1".to_vec())]);
    let anchor = OtsAnchor::new(vec![base]).unwrap();

    let submitted = anchor.submit(&store, &bundle_id, &bundle_hash).await.unwrap();
    assert!(submitted);
    assert_eq!(rx.recv().unwrap(), "/digest");

    let sidecar = store.sidecar_path(&bundle_id, "ots.pending").unwrap();
    assert_eq!(std::fs::read(&sidecar).unwrap(), b"proof-v1");
    // The final proof does not exist yet
    assert!(!store.sidecar_path(&bundle_id, "ots").unwrap().exists());
}

#[tokio::test]
async fn rejected_submit_is_swallowed_and_leaves_no_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let (store, bundle_id, bundle_hash) = committed_bundle(dir.path());
    let (base, _rx) = serve(vec![(500, b"calendar down".to_vec())]);
    let anchor = OtsAnchor::new(vec![base]).unwrap();

    let submitted = anchor.submit(&store, &bundle_id, &bundle_hash).await.unwrap();
    assert!(!submitted);
    assert!(!store.sidecar_path(&bundle_id, "ots.pending").unwrap().exists());
}

#[tokio::test]
async fn unreachable_calendar_is_swallowed_too() {
    let dir = tempfile::tempdir().unwrap();
    let (store, bundle_id, bundle_hash) = committed_bundle(dir.path());
    // Nothing listens here
    let anchor = OtsAnchor::new(vec!["http://127.0.0.1:9".into()]).unwrap();
    let submitted = anchor.submit(&store, &bundle_id, &bundle_hash).await.unwrap();
    assert!(!submitted);
}

#[tokio::test]
async fn second_calendar_is_tried_after_the_first_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let (store, bundle_id, bundle_hash) = committed_bundle(dir.path());
    let (bad, _bad_rx) = serve(vec![(503, b"busy".to_vec())]);
    let (good, good_rx) = serve(vec![(200, b"proof-v1".to_vec())]);
    let anchor = OtsAnchor::new(vec![bad, good]).unwrap();

    assert!(anchor.submit(&store, &bundle_id, &bundle_hash).await.unwrap());
    assert_eq!(good_rx.recv().unwrap(), "/digest");
}

#[tokio::test]
async fn echoed_proof_stays_pending() {
    let dir = tempfile::tempdir().unwrap();
    let (store, bundle_id, _hash) = committed_bundle(dir.path());
    let pending = store.sidecar_path(&bundle_id, "ots.pending").unwrap();
    std::fs::write(&pending, b"proof-v1").unwrap();

    // The calendar has no attestation yet and echoes the proof unchanged
    let (base, rx) = serve(vec![(200, b"proof-v1".to_vec())]);
    let anchor = OtsAnchor::new(vec![base]).unwrap();

    let upgraded = anchor.upgrade_pending(vec![pending.clone()]).await;
    assert_eq!(upgraded, 0);
    assert_eq!(rx.recv().unwrap(), "/upgrade");
    assert!(pending.exists(), "echoed proof must remain pending");
    assert!(!store.sidecar_path(&bundle_id, "ots").unwrap().exists());
}

#[tokio::test]
async fn advanced_proof_finalizes_the_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let (store, bundle_id, _hash) = committed_bundle(dir.path());
    let pending = store.sidecar_path(&bundle_id, "ots.pending").unwrap();
    std::fs::write(&pending, b"proof-v1").unwrap();

    let (base, _rx) = serve(vec![(200, b"proof-v2-with-attestation".to_vec())]);
    let anchor = OtsAnchor::new(vec![base]).unwrap();

    let upgraded = anchor.upgrade_pending(vec![pending.clone()]).await;
    assert_eq!(upgraded, 1);
    assert!(!pending.exists(), "pending sidecar is replaced");
    let final_proof = store.sidecar_path(&bundle_id, "ots").unwrap();
    assert_eq!(std::fs::read(&final_proof).unwrap(), b"proof-v2-with-attestation");
}

#[tokio::test]
async fn empty_upgrade_response_does_not_finalize() {
    let dir = tempfile::tempdir().unwrap();
    let (store, bundle_id, _hash) = committed_bundle(dir.path());
    let pending = store.sidecar_path(&bundle_id, "ots.pending").unwrap();
    std::fs::write(&pending, b"proof-v1").unwrap();

    let (base, _rx) = serve(vec![(200, Vec::new())]);
    let anchor = OtsAnchor::new(vec![base]).unwrap();
    assert_eq!(anchor.upgrade_pending(vec![pending.clone()]).await, 0);
    assert!(pending.exists());
}

#[tokio::test]
async fn failed_upgrade_keeps_the_proof_pending() {
    let dir = tempfile::tempdir().unwrap();
    let (store, bundle_id, _hash) = committed_bundle(dir.path());
    let pending = store.sidecar_path(&bundle_id, "ots.pending").unwrap();
    std::fs::write(&pending, b"proof-v1").unwrap();

    let (base, _rx) = serve(vec![(503, b"busy".to_vec())]);
    let anchor = OtsAnchor::new(vec![base]).unwrap();
    assert_eq!(anchor.upgrade_pending(vec![pending.clone()]).await, 0);
    assert!(pending.exists());
}
