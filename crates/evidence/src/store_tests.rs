// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bundle::BundleOutcome;
use crate::chain::GENESIS_PARENT;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
}

fn bundle(seq: u32) -> EvidenceBundle {
    EvidenceBundle {
        bundle_id: format_bundle_id(day(), seq),
        site_id: "site-1".into(),
        host_id: "appliance-01".into(),
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
    }
}

#[test]
fn commit_lands_two_files_under_date_layout() {
    let dir = tempfile::tempdir().unwrap();
    let store = BundleStore::open(dir.path()).unwrap();
    let path = store.commit(&bundle(1)).unwrap();
    assert!(path.ends_with("2026/01/01/CB-2026-01-01-0001"));
    assert!(path.join("bundle.json").is_file());
    assert!(path.join("bundle.sig").is_file());
    // Staging area is empty after the rename
    let staged: Vec<_> = std::fs::read_dir(dir.path().join("evidence/.staging"))
        .unwrap()
        .collect();
    assert!(staged.is_empty());
}

#[test]
fn load_roundtrips_committed_bundles() {
    let dir = tempfile::tempdir().unwrap();
    let store = BundleStore::open(dir.path()).unwrap();
    let b = bundle(1);
    store.commit(&b).unwrap();
    let loaded = store.load(&b.bundle_id).unwrap();
    assert_eq!(loaded.bundle_hash, b.bundle_hash);
    assert_eq!(loaded.signature, b.signature);
}

#[test]
fn next_seq_scans_committed_bundles_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = BundleStore::open(dir.path()).unwrap();
    assert_eq!(store.next_seq(day()), 1);
    store.commit(&bundle(1)).unwrap();
    store.commit(&bundle(2)).unwrap();
    assert_eq!(store.next_seq(day()), 3);
    // A different day starts over
    assert_eq!(store.next_seq(NaiveDate::from_ymd_opt(2026, 1, 2).unwrap()), 1);
}

#[test]
fn list_day_and_newest_are_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let store = BundleStore::open(dir.path()).unwrap();
    store.commit(&bundle(2)).unwrap();
    store.commit(&bundle(1)).unwrap();
    assert_eq!(
        store.list_day(day()),
        vec!["CB-2026-01-01-0001".to_string(), "CB-2026-01-01-0002".to_string()]
    );
    assert_eq!(store.newest(day()).unwrap().bundle_id, "CB-2026-01-01-0002");
}

#[test]
fn missing_bundle_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = BundleStore::open(dir.path()).unwrap();
    assert!(matches!(
        store.load("CB-2026-01-01-0042"),
        Err(crate::EvidenceError::NotFound(_))
    ));
}
