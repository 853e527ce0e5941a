// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! L3 escalation router.
//!
//! Builds a ticket from everything the lower tiers learned and fans it out
//! to every enabled channel; one channel failing never skips the rest. The
//! ticket is then stored at Central Command through the wired sink, or
//! spilled into the offline queue when that fails too.

use async_trait::async_trait;
use dw_core::{EscalationConfig, EscalationReason, Incident, PhiScrubber, Severity, TicketId};
use dw_storage::{OfflineQueue, QueueKind};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("channel {channel}: {detail}")]
pub struct ChannelError {
    pub channel: &'static str,
    pub detail: String,
}

/// Escalation ticket. Scrubbed before it leaves the process.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Ticket {
    pub ticket_id: TicketId,
    pub site_id: String,
    pub host_id: String,
    pub reason: String,
    pub urgency: String,
    pub incident: Value,
    /// Every attempted resolution with captured output.
    pub attempts: Vec<Value>,
    pub l2_reasoning: Option<String>,
    pub suggested_next_steps: Vec<String>,
    pub created_at: String,
}

#[async_trait]
pub trait EscalationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, ticket: &Ticket) -> Result<(), ChannelError>;
}

/// Stores tickets at Central Command; wired by the daemon over the REST
/// client so the healer stays transport-free.
#[async_trait]
pub trait TicketSink: Send + Sync {
    async fn store_ticket(&self, ticket: &Value) -> Result<(), String>;
}

pub struct EscalationRouter {
    channels: Vec<Box<dyn EscalationChannel>>,
    sink: Option<Arc<dyn TicketSink>>,
    queue: Arc<OfflineQueue>,
    scrubber: PhiScrubber,
}

/// Per-ticket delivery record attached to the incident log.
#[derive(Debug, Default, Clone)]
pub struct DeliveryLog {
    pub delivered: Vec<&'static str>,
    pub failed: Vec<String>,
    pub stored_centrally: bool,
    pub queued: bool,
}

impl EscalationRouter {
    pub fn new(
        channels: Vec<Box<dyn EscalationChannel>>,
        sink: Option<Arc<dyn TicketSink>>,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        Self { channels, sink, queue, scrubber: PhiScrubber::new() }
    }

    /// Standard channel set from config; a channel exists iff its endpoint
    /// is configured.
    pub fn from_config(
        config: &EscalationConfig,
        sink: Option<Arc<dyn TicketSink>>,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        let mut channels: Vec<Box<dyn EscalationChannel>> = Vec::new();
        if let Some(url) = &config.slack_webhook_url {
            channels.push(Box::new(SlackChannel::new(url.clone())));
        }
        if let Some(key) = &config.pagerduty_routing_key {
            channels.push(Box::new(PagerDutyChannel::new(key.clone())));
        }
        if let Some(url) = &config.webhook_url {
            channels.push(Box::new(WebhookChannel::new(url.clone())));
        }
        if let Some(url) = &config.email_relay_url {
            channels.push(Box::new(EmailRelayChannel::new(url.clone())));
        }
        Self::new(channels, sink, queue)
    }

    /// Build the ticket for an incident and its attempt history.
    pub fn build_ticket(
        &self,
        incident: &Incident,
        attempts: Vec<Value>,
        l2_reasoning: Option<String>,
        reason: EscalationReason,
        created_at: String,
    ) -> Ticket {
        let urgency = match incident.severity {
            Severity::Critical | Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low | Severity::Info => "low",
        };
        let mut suggested = vec![format!(
            "Review {} drift on {} (pattern {})",
            incident.check_type,
            incident.host_id,
            &incident.pattern_signature[..12.min(incident.pattern_signature.len())]
        )];
        if let Some(runbook) = &incident.recommended_action {
            suggested.push(format!("Consider manual run of {runbook}"));
        }
        if reason == EscalationReason::FlapDetected {
            suggested.push(
                "Investigate who or what keeps reverting the remediation".to_string(),
            );
        }
        let incident_value = self
            .scrubber
            .scrub_value(&serde_json::to_value(incident).unwrap_or(Value::Null));
        let attempts = attempts.iter().map(|a| self.scrubber.scrub_value(a)).collect();
        Ticket {
            ticket_id: TicketId::new(),
            site_id: incident.site_id.clone(),
            host_id: incident.host_id.clone(),
            reason: reason.to_string(),
            urgency: urgency.to_string(),
            incident: incident_value,
            attempts,
            l2_reasoning: l2_reasoning.map(|r| self.scrubber.scrub_str(&r)),
            suggested_next_steps: suggested,
            created_at,
        }
    }

    /// Fan out to every channel, then store centrally (queue fallback).
    pub async fn escalate(&self, ticket: &Ticket) -> DeliveryLog {
        let mut log = DeliveryLog::default();
        for channel in &self.channels {
            match channel.deliver(ticket).await {
                Ok(()) => log.delivered.push(channel.name()),
                Err(e) => {
                    tracing::error!(channel = e.channel, detail = %e.detail, "escalation channel failed");
                    log.failed.push(e.to_string());
                }
            }
        }
        let ticket_value = serde_json::to_value(ticket).unwrap_or(Value::Null);
        match &self.sink {
            Some(sink) => match sink.store_ticket(&ticket_value).await {
                Ok(()) => log.stored_centrally = true,
                Err(e) => {
                    tracing::warn!(error = %e, "central ticket store failed, queueing");
                    log.queued = self.spill(ticket_value, &ticket.created_at).await;
                }
            },
            None => {
                log.queued = self.spill(ticket_value, &ticket.created_at).await;
            }
        }
        log
    }

    async fn spill(&self, ticket_value: Value, created_at: &str) -> bool {
        matches!(
            self.queue
                .enqueue(QueueKind::Incident, ticket_value, created_at.to_string())
                .await,
            Ok(dw_storage::EnqueueOutcome::Enqueued(_))
        )
    }
}

// --- channels -------------------------------------------------------------

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_default()
}

async fn post_json(
    client: &reqwest::Client,
    name: &'static str,
    url: &str,
    body: Value,
) -> Result<(), ChannelError> {
    let response = client
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(|e| ChannelError { channel: name, detail: e.to_string() })?;
    if !response.status().is_success() {
        return Err(ChannelError {
            channel: name,
            detail: format!("http {}", response.status()),
        });
    }
    Ok(())
}

pub struct SlackChannel {
    url: String,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(url: String) -> Self {
        Self { url, client: http_client() }
    }
}

#[async_trait]
impl EscalationChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn deliver(&self, ticket: &Ticket) -> Result<(), ChannelError> {
        let text = format!(
            ":rotating_light: [{}] {} on {} — {} (ticket {})",
            ticket.urgency, ticket.reason, ticket.host_id, ticket.site_id, ticket.ticket_id
        );
        post_json(&self.client, self.name(), &self.url, json!({ "text": text })).await
    }
}

pub struct PagerDutyChannel {
    routing_key: String,
    client: reqwest::Client,
    endpoint: String,
}

impl PagerDutyChannel {
    pub fn new(routing_key: String) -> Self {
        Self {
            routing_key,
            client: http_client(),
            endpoint: "https://events.pagerduty.com/v2/enqueue".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }
}

#[async_trait]
impl EscalationChannel for PagerDutyChannel {
    fn name(&self) -> &'static str {
        "pagerduty"
    }

    async fn deliver(&self, ticket: &Ticket) -> Result<(), ChannelError> {
        let body = json!({
            "routing_key": self.routing_key,
            "event_action": "trigger",
            "dedup_key": ticket.ticket_id,
            "payload": {
                "summary": format!("{} escalation on {}", ticket.reason, ticket.host_id),
                "source": ticket.site_id,
                "severity": if ticket.urgency == "high" { "critical" } else { "warning" },
            }
        });
        post_json(&self.client, self.name(), &self.endpoint, body).await
    }
}

pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: String) -> Self {
        Self { url, client: http_client() }
    }
}

#[async_trait]
impl EscalationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, ticket: &Ticket) -> Result<(), ChannelError> {
        let body = serde_json::to_value(ticket)
            .map_err(|e| ChannelError { channel: self.name(), detail: e.to_string() })?;
        post_json(&self.client, self.name(), &self.url, body).await
    }
}

/// Email goes through the site's HTTP mail relay; the appliance speaks no
/// SMTP directly.
pub struct EmailRelayChannel {
    url: String,
    client: reqwest::Client,
}

impl EmailRelayChannel {
    pub fn new(url: String) -> Self {
        Self { url, client: http_client() }
    }
}

#[async_trait]
impl EscalationChannel for EmailRelayChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(&self, ticket: &Ticket) -> Result<(), ChannelError> {
        let body = json!({
            "subject": format!("[driftwarden] {} escalation on {}", ticket.urgency, ticket.host_id),
            "body": serde_json::to_string_pretty(ticket).unwrap_or_default(),
        });
        post_json(&self.client, self.name(), &self.url, body).await
    }
}

#[cfg(test)]
#[path = "l3_tests.rs"]
mod tests;
