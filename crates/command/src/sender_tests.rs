// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::NaiveDate;
use serde_json::json;
use std::sync::mpsc;

fn serve(responses: Vec<(u16, &'static str)>) -> (String, mpsc::Receiver<String>) {
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

fn fixture(dir: &std::path::Path, base: &str) -> (QueueSender, Arc<OfflineQueue>) {
    let key_file = dir.join("api.key");
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
    let queue = Arc::new(OfflineQueue::open(&dir.join("queue"), day).unwrap());
    (QueueSender::new(Arc::clone(&queue), client), queue)
}

fn enqueue(queue: &OfflineQueue, kind: QueueKind, tag: u32) -> u64 {
    match queue.try_enqueue(kind, json!({"tag": tag}), "2026-01-01T00:00:00.000Z".into()).unwrap() {
        dw_storage::EnqueueOutcome::Enqueued(seq) => seq,
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn delivered_entries_are_tombstoned_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (base, rx) = serve(vec![(200, "{}"), (200, "{}")]);
    let (sender, queue) = fixture(dir.path(), &base);
    enqueue(&queue, QueueKind::Evidence, 1);
    enqueue(&queue, QueueKind::Evidence, 2);

    let stats = sender.drain_once().await;
    assert_eq!(stats.delivered, 2);
    assert!(queue.is_empty());
    assert_eq!(rx.recv().unwrap(), "/evidence");
    assert_eq!(rx.recv().unwrap(), "/evidence");
}

#[tokio::test]
async fn transient_failure_leaves_entry_at_head_with_holdoff() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _rx) = serve(vec![(503, "down")]);
    let (sender, queue) = fixture(dir.path(), &base);
    let seq = enqueue(&queue, QueueKind::Evidence, 1);

    let stats = sender.drain_once().await;
    assert_eq!(stats.retried, 1);
    assert_eq!(queue.peek(QueueKind::Evidence).unwrap().seq, seq);
    assert_eq!(queue.peek(QueueKind::Evidence).unwrap().attempts, 1);

    // Immediately draining again skips the kind (hold-off in effect)
    let stats = sender.drain_once().await;
    assert_eq!(stats.retried, 0);
    assert_eq!(stats.delivered, 0);
}

#[tokio::test]
async fn schema_rejection_dead_letters_and_unblocks_the_kind() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _rx) = serve(vec![(422, "bad schema"), (200, "{}")]);
    let (sender, queue) = fixture(dir.path(), &base);
    let bad = enqueue(&queue, QueueKind::PatternStat, 1);
    enqueue(&queue, QueueKind::PatternStat, 2);

    let stats = sender.drain_once().await;
    assert_eq!(stats.dead, 1);
    assert_eq!(stats.delivered, 1);
    assert!(queue.is_empty());
    assert!(dir.path().join("queue/dead").join(format!("{bad}.json")).exists());
}

#[tokio::test]
async fn a_stuck_kind_does_not_block_other_kinds() {
    let dir = tempfile::tempdir().unwrap();
    // First request (evidence) fails, second (execution) succeeds
    let (base, rx) = serve(vec![(503, "down"), (200, "{}")]);
    let (sender, queue) = fixture(dir.path(), &base);
    enqueue(&queue, QueueKind::Evidence, 1);
    enqueue(&queue, QueueKind::Execution, 2);

    let stats = sender.drain_once().await;
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(rx.recv().unwrap(), "/evidence");
    assert_eq!(rx.recv().unwrap(), "/api/agent/executions");
}

#[test]
fn backoff_grows_exponentially_with_full_jitter() {
    for attempts in 1..12 {
        let ceiling = BACKOFF_BASE
            .saturating_mul(2u32.saturating_pow(attempts - 1))
            .min(BACKOFF_CAP);
        for _ in 0..20 {
            let d = backoff_delay(attempts);
            assert!(d <= ceiling, "attempt {attempts}: {d:?} > {ceiling:?}");
        }
    }
    // The cap holds even for absurd attempt counts
    assert!(backoff_delay(1000) <= BACKOFF_CAP);
}
