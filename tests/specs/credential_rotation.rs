// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential rotation via check-in: the returned target set replaces the
//! current one, material lives only in memory, and nothing under the state
//! directory ever contains either secret.

use dw_command::TargetRecord;
use dw_core::{CredentialStore, Platform};
use dw_daemon::TargetSet;
use dw_healer::TargetLookup;
use std::collections::HashMap;

fn record(password: &str) -> TargetRecord {
    serde_json::from_value(serde_json::json!({
        "hostname": "WS01",
        "address": "10.0.0.5",
        "username": "svc-remediate",
        "password": password,
    }))
    .unwrap()
}

/// Adopt one check-in's targets the way the daemon does.
fn adopt(targets: &TargetSet, credentials: &CredentialStore, records: Vec<TargetRecord>) {
    let mut creds = HashMap::new();
    let mut adopted = Vec::new();
    for record in records {
        let (target, credential) = record.into_parts(Platform::Windows);
        creds.insert(target.credentials.clone(), credential);
        adopted.push(target);
    }
    credentials.replace_all(creds);
    targets.replace(adopted);
}

#[test]
fn rotation_replaces_material_and_persists_nothing() {
    let state_dir = tempfile::tempdir().unwrap();
    let targets = TargetSet::new();
    let credentials = CredentialStore::new();

    // First check-in delivers C1
    adopt(&targets, &credentials, vec![record("secret-c1")]);
    let handle = targets.get("WS01").unwrap().credentials;
    assert_eq!(credentials.get(&handle).unwrap().secret.reveal(), "secret-c1");

    // Second check-in rotates to C2: next scan sees C2, C1 is gone
    adopt(&targets, &credentials, vec![record("secret-c2")]);
    let cred = credentials.get(&handle).unwrap();
    assert_eq!(cred.secret.reveal(), "secret-c2");

    // Simulate the durable state a daemon writes while running
    let store =
        dw_storage::IncidentStore::open(&state_dir.path().join("incidents.db")).unwrap();
    let incident = dw_core::test_support::firewall_incident("site-1", "WS01");
    store.record(&incident).unwrap();
    let queue = dw_storage::OfflineQueue::open(
        &state_dir.path().join("queue"),
        chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
    )
    .unwrap();
    queue
        .try_enqueue(
            dw_storage::QueueKind::Evidence,
            serde_json::to_value(&incident).unwrap(),
            incident.created_at.clone(),
        )
        .unwrap();

    // No file under state_dir contains either secret at any point
    for secret in ["secret-c1", "secret-c2"] {
        assert!(
            !dir_contains(state_dir.path(), secret),
            "{secret} leaked into the state directory"
        );
    }

    // And the serialized target itself carries only the handle
    let json = serde_json::to_string(&targets.get("WS01").unwrap()).unwrap();
    assert!(json.contains("cred-WS01"));
    assert!(!json.contains("secret-c2"));
}

fn dir_contains(dir: &std::path::Path, needle: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else { return false };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() {
            if dir_contains(&path, needle) {
                return true;
            }
        } else if let Ok(bytes) = std::fs::read(&path) {
            if String::from_utf8_lossy(&bytes).contains(needle) {
                return true;
            }
        }
    }
    false
}
