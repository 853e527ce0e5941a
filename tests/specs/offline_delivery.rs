// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable at-least-once delivery: bundles sealed while offline survive a
//! restart and drain to the server once it is reachable, in order.

use dw_command::{CommandClient, QueueSender};
use dw_core::CentralCommandConfig;
use dw_storage::{OfflineQueue, QueueKind};
use std::sync::{mpsc, Arc};

use super::prelude::*;

fn serve_ok(count: usize) -> (String, mpsc::Receiver<String>) {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let base = format!("http://{}", server.server_addr());
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for _ in 0..count {
            let Ok(mut request) = server.recv() else { return };
            let mut body = String::new();
            let _ = std::io::Read::read_to_string(&mut request.as_reader(), &mut body);
            let _ = tx.send(body);
            let _ = request.respond(tiny_http::Response::from_string("{}"));
        }
    });
    (base, rx)
}

#[tokio::test]
async fn bundles_sealed_offline_survive_restart_and_deliver_in_order() {
    let h = harness();

    // Two healed incidents sealed while the uplink is down
    for _ in 0..2 {
        let incident = h.firewall_incident();
        let result = h.healer.handle_incident(&incident).await.unwrap();
        h.seal_for(&incident, &result);
        h.clock.advance(std::time::Duration::from_secs(60));
    }
    assert!(!h.queue.is_empty());

    // "Restart": reopen the queue from disk
    let queue_dir = h.dir.path().join("queue");
    drop(h);
    let queue = Arc::new(
        OfflineQueue::open(&queue_dir, chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap())
            .unwrap(),
    );
    let evidence_pending = {
        let mut ids = Vec::new();
        while let Some(entry) = queue.peek(QueueKind::Evidence) {
            ids.push(entry.payload["bundle_id"].as_str().unwrap().to_string());
            queue.mark_delivered(entry.seq).unwrap();
        }
        // Put them back by re-enqueueing in order for the drain test
        for id in &ids {
            queue
                .try_enqueue(
                    QueueKind::Evidence,
                    serde_json::json!({"bundle_id": id}),
                    "2026-01-01T01:00:00.000Z".into(),
                )
                .unwrap();
        }
        ids
    };
    assert_eq!(
        evidence_pending,
        vec!["CB-2026-01-01-0001".to_string(), "CB-2026-01-01-0002".to_string()]
    );

    // Server comes up; one drain cycle delivers both, oldest first
    let expected = queue.len();
    let (base, rx) = serve_ok(expected);
    let key_dir = tempfile::tempdir().unwrap();
    let key_file = key_dir.path().join("api.key");
    std::fs::write(&key_file, "tok").unwrap();
    let client = Arc::new(
        CommandClient::new(&CentralCommandConfig {
            url: base,
            api_key_file: key_file,
            verify_tls: true,
            server_public_key: None,
        })
        .unwrap(),
    );
    let sender = QueueSender::new(Arc::clone(&queue), client);
    let stats = sender.drain_once().await;
    assert_eq!(stats.delivered, expected);
    assert!(queue.is_empty());

    let first = rx.recv().unwrap();
    let second = rx.recv().unwrap();
    assert!(first.contains("CB-2026-01-01-0001"));
    assert!(second.contains("CB-2026-01-01-0002"));
}
