// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use serde_json::json;

fn state(pairs: &[(&str, Value)]) -> RawState {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn equal_states_produce_equal_signatures() {
    let a = state(&[("profile_enabled", json!(false)), ("service", json!("running"))]);
    let b = state(&[("service", json!("running")), ("profile_enabled", json!(false))]);
    assert_eq!(pattern_signature("firewall", &a), pattern_signature("firewall", &b));
}

#[test]
fn different_check_types_differ() {
    let a = state(&[("x", json!(1))]);
    assert_ne!(pattern_signature("firewall", &a), pattern_signature("bitlocker", &a));
}

#[test]
fn volatile_keys_do_not_affect_signature() {
    let a = state(&[("profile_enabled", json!(false)), ("timestamp", json!("t1"))]);
    let b = state(&[("profile_enabled", json!(false)), ("timestamp", json!("t2"))]);
    assert_eq!(pattern_signature("firewall", &a), pattern_signature("firewall", &b));
}

#[test]
fn string_values_are_trimmed_before_hashing() {
    let a = state(&[("mode", json!("enforcing"))]);
    let b = state(&[("mode", json!(" enforcing "))]);
    assert_eq!(pattern_signature("selinux", &a), pattern_signature("selinux", &b));
}

#[test]
fn pattern_stat_counters_are_monotonic() {
    let mut stat = PatternStat::new("sig".into(), "firewall".into(), "t0".into());
    stat.record(true, 100, "t1".into());
    stat.record(false, 300, "t2".into());
    assert_eq!(stat.occurrences, 2);
    assert_eq!(stat.successes, 1);
    assert_eq!(stat.failures, 1);
    assert_eq!(stat.avg_resolution_ms, 200);
    assert_eq!(stat.last_seen, "t2");
}

#[test]
fn state_diff_captures_changed_and_added_keys() {
    let pre = state(&[("enabled", json!(false)), ("profile", json!("domain"))]);
    let post = state(&[("enabled", json!(true)), ("profile", json!("domain")), ("rules", json!(3))]);
    let diff = StateDiff::between(&pre, &post);
    assert_eq!(diff.changed.len(), 2);
    assert_eq!(diff.changed["enabled"].before, Some(json!(false)));
    assert_eq!(diff.changed["enabled"].after, Some(json!(true)));
    assert_eq!(diff.changed["rules"].before, None);
}

#[test]
fn state_diff_of_identical_states_is_empty() {
    let s = state(&[("enabled", json!(true))]);
    assert!(StateDiff::between(&s, &s).is_empty());
}

#[test]
fn pattern_table_tracks_dirty_deltas() {
    let table = PatternTable::new();
    table.record("sig-a", "firewall", true, 100, "t1".into());
    table.record("sig-b", "disk", false, 50, "t1".into());
    table.record("sig-a", "firewall", true, 300, "t2".into());

    let dirty = table.take_dirty();
    assert_eq!(dirty.len(), 2);
    let a = dirty.iter().find(|s| s.pattern_signature == "sig-a").unwrap();
    assert_eq!(a.occurrences, 2);
    assert_eq!(a.successes, 2);

    // Drained: nothing dirty until the next record
    assert!(table.take_dirty().is_empty());
    table.record("sig-a", "firewall", false, 10, "t3".into());
    assert_eq!(table.take_dirty().len(), 1);
}

#[test]
fn pattern_table_mark_dirty_requeues_failed_push() {
    let table = PatternTable::new();
    table.record("sig-a", "firewall", true, 100, "t1".into());
    let _ = table.take_dirty();
    table.mark_dirty("sig-a");
    assert_eq!(table.take_dirty().len(), 1);
}

proptest! {
    #[test]
    fn signature_is_deterministic(
        keys in proptest::collection::btree_map("[a-z]{1,8}", 0u32..1000, 0..8),
        check in "[a-z]{1,12}",
    ) {
        let state: RawState =
            keys.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
        prop_assert_eq!(
            pattern_signature(&check, &state),
            pattern_signature(&check, &state.clone())
        );
    }

    #[test]
    fn counters_never_decrease(results in proptest::collection::vec((any::<bool>(), 0u64..10_000), 1..50)) {
        let mut stat = PatternStat::new("sig".into(), "check".into(), "t".into());
        let mut prev = (0u64, 0u64, 0u64);
        for (success, dur) in results {
            stat.record(success, dur, "t".into());
            let cur = (stat.occurrences, stat.successes, stat.failures);
            prop_assert!(cur.0 >= prev.0 && cur.1 >= prev.1 && cur.2 >= prev.2);
            prev = cur;
        }
        prop_assert_eq!(stat.occurrences, stat.successes + stat.failures);
    }
}
