// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dw_core::test_support::firewall_incident;
use parking_lot::Mutex;

struct RecordingChannel {
    name: &'static str,
    fail: bool,
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EscalationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn deliver(&self, ticket: &Ticket) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError { channel: self.name, detail: "down".into() });
        }
        self.seen.lock().push(ticket.ticket_id.to_string());
        Ok(())
    }
}

struct RecordingSink {
    fail: bool,
    stored: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl TicketSink for RecordingSink {
    async fn store_ticket(&self, ticket: &Value) -> Result<(), String> {
        if self.fail {
            return Err("cc unreachable".into());
        }
        self.stored.lock().push(ticket.clone());
        Ok(())
    }
}

fn queue(dir: &tempfile::TempDir) -> Arc<OfflineQueue> {
    let day = chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
    Arc::new(OfflineQueue::open(&dir.path().join("queue"), day).unwrap())
}

fn ticket_for(router: &EscalationRouter) -> Ticket {
    let incident = firewall_incident("site-1", "WS01");
    router.build_ticket(
        &incident,
        vec![serde_json::json!({"tier": "L1", "exit_code": 1})],
        Some("tried firewall baseline".into()),
        EscalationReason::L2BudgetExhausted,
        "2026-01-01T00:00:00.000Z".into(),
    )
}

#[tokio::test]
async fn one_failing_channel_does_not_skip_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let stored = Arc::new(Mutex::new(Vec::new()));
    let router = EscalationRouter::new(
        vec![
            Box::new(RecordingChannel { name: "slack", fail: true, seen: Arc::clone(&seen) }),
            Box::new(RecordingChannel { name: "webhook", fail: false, seen: Arc::clone(&seen) }),
            Box::new(RecordingChannel { name: "email", fail: false, seen: Arc::clone(&seen) }),
        ],
        Some(Arc::new(RecordingSink { fail: false, stored: Arc::clone(&stored) })),
        queue(&dir),
    );
    let ticket = ticket_for(&router);
    let log = router.escalate(&ticket).await;

    assert_eq!(log.delivered, vec!["webhook", "email"]);
    assert_eq!(log.failed.len(), 1);
    assert!(log.stored_centrally);
    assert!(!log.queued);
    assert_eq!(seen.lock().len(), 2);
    assert_eq!(stored.lock().len(), 1);
}

#[tokio::test]
async fn sink_failure_spills_the_ticket_into_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let q = queue(&dir);
    let router = EscalationRouter::new(
        vec![],
        Some(Arc::new(RecordingSink { fail: true, stored: Arc::new(Mutex::new(Vec::new())) })),
        Arc::clone(&q),
    );
    let ticket = ticket_for(&router);
    let log = router.escalate(&ticket).await;

    assert!(!log.stored_centrally);
    assert!(log.queued);
    let entry = q.peek(QueueKind::Incident).unwrap();
    assert_eq!(entry.payload["ticket_id"], serde_json::json!(ticket.ticket_id.to_string()));
}

#[test]
fn ticket_urgency_tracks_severity_and_flap_advice() {
    let dir = tempfile::tempdir().unwrap();
    let router = EscalationRouter::new(vec![], None, queue(&dir));
    let incident = firewall_incident("site-1", "WS01");
    let ticket = router.build_ticket(
        &incident,
        vec![],
        None,
        EscalationReason::FlapDetected,
        "t".into(),
    );
    assert_eq!(ticket.urgency, "high");
    assert_eq!(ticket.reason, "flap_detected");
    assert!(ticket
        .suggested_next_steps
        .iter()
        .any(|s| s.contains("reverting")));
}

#[test]
fn ticket_content_is_phi_scrubbed() {
    let dir = tempfile::tempdir().unwrap();
    let router = EscalationRouter::new(vec![], None, queue(&dir));
    let mut incident = firewall_incident("site-1", "WS01");
    incident
        .raw_state
        .insert("note".into(), serde_json::json!("patient 123-45-6789"));
    let ticket = router.build_ticket(
        &incident,
        vec![serde_json::json!({"stderr": "mail ops@clinic.example"})],
        None,
        EscalationReason::RemediationFailed,
        "t".into(),
    );
    let text = serde_json::to_string(&ticket).unwrap();
    assert!(!text.contains("123-45-6789"));
    assert!(!text.contains("ops@clinic.example"));
}

#[tokio::test]
async fn slack_channel_posts_to_the_webhook() {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let url = format!("http://{}", server.server_addr());
    let handle = std::thread::spawn(move || {
        let mut request = server.recv().unwrap();
        let mut body = String::new();
        std::io::Read::read_to_string(&mut request.as_reader(), &mut body).unwrap();
        let _ = request.respond(tiny_http::Response::from_string("ok"));
        body
    });

    let dir = tempfile::tempdir().unwrap();
    let router =
        EscalationRouter::new(vec![Box::new(SlackChannel::new(url))], None, queue(&dir));
    let ticket = ticket_for(&router);
    let log = router.escalate(&ticket).await;
    assert_eq!(log.delivered, vec!["slack"]);

    let body = handle.join().unwrap();
    assert!(body.contains("l2_budget_exhausted"));
    assert!(body.contains("WS01"));
}
