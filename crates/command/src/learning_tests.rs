// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::NaiveDate;
use dw_storage::EnqueueOutcome;
use std::sync::mpsc;

fn serve(responses: Vec<(u16, String)>) -> (String, mpsc::Receiver<String>) {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let base = format!("http://{}", server.server_addr());
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for (status, body) in responses {
            let Ok(request) = server.recv() else { return };
            let _ = tx.send(request.url().to_string());
            let response = tiny_http::Response::from_string(body)
                .with_status_code(tiny_http::StatusCode(status));
            let _ = request.respond(response);
        }
    });
    (base, rx)
}

struct Fixture {
    sync: LearningSync,
    queue: Arc<OfflineQueue>,
    rules: SharedRules,
    patterns: PatternTable,
    _dir: tempfile::TempDir,
}

fn fixture(base: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let key_file = dir.path().join("api.key");
    std::fs::write(&key_file, "tok").unwrap();
    let client = Arc::new(
        CommandClient::new(&dw_core::CentralCommandConfig {
            url: base.to_string(),
            api_key_file: key_file,
            verify_tls: true,
            server_public_key: None,
        })
        .unwrap(),
    );
    let day = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
    let queue = Arc::new(OfflineQueue::open(&dir.path().join("queue"), day).unwrap());
    let rules_dir = dir.path().join("rules");
    std::fs::create_dir_all(&rules_dir).unwrap();
    let patterns = PatternTable::new();
    let rules = SharedRules::default();
    let sync = LearningSync::new(
        client,
        Arc::clone(&queue),
        patterns.clone(),
        rules.clone(),
        rules_dir,
        dir.path().to_path_buf(),
    );
    Fixture { sync, queue, rules, patterns, _dir: dir }
}

#[tokio::test]
async fn pushes_dirty_stats_and_pulls_promoted_rules() {
    let (base, rx) = serve(vec![
        (200, "{}".into()),
        (
            200,
            r#"{"rules":[{"id":"PR-1","action":"noop","check":"disk"}],"cursor":"c9"}"#.into(),
        ),
    ]);
    let f = fixture(&base);
    f.patterns.record("sig-a", "firewall", true, 100, "t".into());

    let report = f.sync.sync_once("2026-01-01T00:00:00.000Z".into()).await;
    assert_eq!(report.stats_pushed, 1);
    assert_eq!(report.rules_pulled, 1);
    assert_eq!(report.rules_rejected, 0);

    assert_eq!(rx.recv().unwrap(), "/api/agent/sync/pattern-stats");
    assert!(rx.recv().unwrap().starts_with("/api/agent/sync/promoted-rules?since="));

    // The merged set contains builtins plus the promoted rule
    let snapshot = f.rules.snapshot();
    assert!(snapshot.iter().any(|r| r.id == "PR-1" && r.origin == RuleOrigin::Promoted));
    assert!(snapshot.iter().any(|r| r.origin == RuleOrigin::Builtin));

    // Promoted priority 5 sorts ahead of builtin 10
    let pr = snapshot.iter().find(|r| r.id == "PR-1").unwrap();
    assert_eq!(pr.priority, 5);
}

#[tokio::test]
async fn offline_push_spills_stats_into_the_queue_and_keeps_them_dirty() {
    // Nothing listening: both push and pull fail
    let f = fixture("http://127.0.0.1:9");
    f.patterns.record("sig-a", "firewall", true, 100, "t".into());

    let report = f.sync.sync_once("2026-01-01T00:00:00.000Z".into()).await;
    assert_eq!(report.stats_pushed, 0);
    assert_eq!(report.stats_queued, 1);
    assert!(f.queue.peek(QueueKind::PatternStat).is_some());
    // Still dirty for the next direct push
    assert_eq!(f.patterns.take_dirty().len(), 1);
}

#[tokio::test]
async fn bad_promoted_rule_is_rejected_without_poisoning_the_set() {
    let (base, _rx) = serve(vec![
        (
            200,
            r#"{"rules":[{"id":"BAD","action":"reformat_disk"},{"id":"GOOD","action":"noop"}],"cursor":"c1"}"#
                .into(),
        ),
    ]);
    let f = fixture(&base);
    let report = f.sync.sync_once("t".into()).await;
    assert_eq!(report.rules_rejected, 1);
    assert_eq!(report.rules_pulled, 1);
    let snapshot = f.rules.snapshot();
    assert!(snapshot.iter().any(|r| r.id == "GOOD"));
    assert!(!snapshot.iter().any(|r| r.id == "BAD"));
}

#[tokio::test]
async fn cursor_advances_and_persists() {
    let (base, _rx) = serve(vec![(200, r#"{"rules":[],"cursor":"c42"}"#.into())]);
    let f = fixture(&base);
    f.sync.sync_once("t".into()).await;
    let cursors = LearningCursors::load(&f._dir.path().to_path_buf());
    assert_eq!(cursors.promoted_rules, "c42");
}

#[test]
fn rebuild_includes_local_rules_from_disk() {
    let f = fixture("http://127.0.0.1:9");
    std::fs::write(
        f._dir.path().join("rules/local.yaml"),
        "id: LOCAL-1\naction: noop\n",
    )
    .unwrap();
    let size = f.sync.rebuild_ruleset();
    assert!(size > dw_rules::builtin_rules().len());
    let snapshot = f.rules.snapshot();
    let local = snapshot.iter().find(|r| r.id == "LOCAL-1").unwrap();
    assert_eq!(local.origin, RuleOrigin::Local);
    assert_eq!(local.priority, 1);
}

#[test]
fn enqueue_outcome_is_visible_for_backpressure_tests() {
    // Sanity: the queue used by learning honors the shared cap policy
    let f = fixture("http://127.0.0.1:9");
    let outcome = f
        .queue
        .try_enqueue(QueueKind::PatternStat, serde_json::json!({}), "t".into())
        .unwrap();
    assert!(matches!(outcome, EnqueueOutcome::Enqueued(_)));
}
