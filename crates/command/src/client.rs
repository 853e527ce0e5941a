// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin REST client for Central Command.

use crate::types::{
    CheckinRequest, CheckinResponse, ExecutionRecord, OrderRecord, PromotedRulesResponse,
    TicketRecord,
};
use dw_core::{CentralCommandConfig, PatternStat};
use dw_storage::QueueKind;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("network: {0}")]
    Network(String),
    #[error("protocol: http {status}: {body}")]
    Protocol { status: u16, body: String },
    #[error("cannot read api key file {path}: {source}")]
    ApiKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("client build: {0}")]
    Build(String),
}

/// How the sender should treat one delivery attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Transient: network error, 5xx, or 429. Retry with backoff.
    Retry(String),
    /// Permanent: non-429 4xx. Dead-letter, do not retry.
    Dead(String),
}

pub struct CommandClient {
    base: String,
    api_key_file: PathBuf,
    token: Mutex<String>,
    client: reqwest::Client,
}

impl CommandClient {
    pub fn new(config: &CentralCommandConfig) -> Result<Self, CommandError> {
        let token = read_token(&config.api_key_file)?;
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CommandError::Build(e.to_string()))?;
        Ok(Self {
            base: config.url.trim_end_matches('/').to_string(),
            api_key_file: config.api_key_file.clone(),
            token: Mutex::new(token),
            client,
        })
    }

    /// POST JSON with bearer auth. On 401 the token file is re-read and the
    /// request retried once (key rotation without restart).
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, CommandError> {
        let mut retried = false;
        loop {
            let token = self.token.lock().clone();
            let response = self
                .client
                .post(format!("{}{path}", self.base))
                .bearer_auth(&token)
                .json(body)
                .send()
                .await
                .map_err(|e| CommandError::Network(e.to_string()))?;
            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED && !retried {
                retried = true;
                let fresh = read_token(&self.api_key_file)?;
                *self.token.lock() = fresh;
                continue;
            }
            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(CommandError::Protocol { status: status.as_u16(), body: text });
            }
            return Ok(serde_json::from_str(&text).unwrap_or(Value::Null));
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, CommandError> {
        let mut retried = false;
        loop {
            let token = self.token.lock().clone();
            let response = self
                .client
                .get(format!("{}{path}", self.base))
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| CommandError::Network(e.to_string()))?;
            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED && !retried {
                retried = true;
                let fresh = read_token(&self.api_key_file)?;
                *self.token.lock() = fresh;
                continue;
            }
            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(CommandError::Protocol { status: status.as_u16(), body: text });
            }
            return serde_json::from_str(&text).map_err(|e| CommandError::Network(e.to_string()));
        }
    }

    /// Periodic check-in; the response replaces the target set.
    pub async fn checkin(&self, request: &CheckinRequest) -> Result<CheckinResponse, CommandError> {
        let body = serde_json::to_value(request)
            .map_err(|e| CommandError::Network(e.to_string()))?;
        let value = self.post_json("/api/appliances/checkin", &body).await?;
        serde_json::from_value(value).map_err(|e| CommandError::Network(e.to_string()))
    }

    pub async fn submit_evidence(&self, bundle: &Value) -> Result<(), CommandError> {
        self.post_json("/evidence", bundle).await.map(|_| ())
    }

    pub async fn push_pattern_stats(&self, stats: &[PatternStat]) -> Result<(), CommandError> {
        let body = serde_json::json!({ "stats": stats });
        self.post_json("/api/agent/sync/pattern-stats", &body).await.map(|_| ())
    }

    pub async fn pull_promoted_rules(
        &self,
        cursor: &str,
    ) -> Result<PromotedRulesResponse, CommandError> {
        let value = self
            .get_json(&format!("/api/agent/sync/promoted-rules?since={cursor}"))
            .await?;
        serde_json::from_value(value).map_err(|e| CommandError::Network(e.to_string()))
    }

    pub async fn push_execution(&self, record: &ExecutionRecord) -> Result<(), CommandError> {
        let body = serde_json::to_value(record)
            .map_err(|e| CommandError::Network(e.to_string()))?;
        self.post_json("/api/agent/executions", &body).await.map(|_| ())
    }

    pub async fn store_ticket(&self, ticket: &TicketRecord) -> Result<(), CommandError> {
        let body = serde_json::to_value(ticket)
            .map_err(|e| CommandError::Network(e.to_string()))?;
        self.post_json("/api/agent/escalations", &body).await.map(|_| ())
    }

    pub async fn pending_orders(
        &self,
        appliance_id: &str,
    ) -> Result<Vec<OrderRecord>, CommandError> {
        let value = self
            .get_json(&format!("/api/appliances/{appliance_id}/orders/pending"))
            .await?;
        serde_json::from_value(value).map_err(|e| CommandError::Network(e.to_string()))
    }

    pub async fn ack_order(&self, appliance_id: &str, order_id: &str) -> Result<(), CommandError> {
        let path = format!("/api/appliances/{appliance_id}/orders/{order_id}/ack");
        self.post_json(&path, &Value::Null).await.map(|_| ())
    }

    pub async fn complete_order(
        &self,
        appliance_id: &str,
        order_id: &str,
        result: &Value,
    ) -> Result<(), CommandError> {
        let path = format!("/api/appliances/{appliance_id}/orders/{order_id}/complete");
        self.post_json(&path, result).await.map(|_| ())
    }

    /// Deliver one queue entry to its kind's endpoint, classifying the
    /// outcome for the sender's retry policy.
    pub async fn deliver(&self, kind: QueueKind, payload: &Value) -> DeliveryOutcome {
        let path = match kind {
            QueueKind::Evidence => "/evidence",
            QueueKind::Incident => "/api/agent/incidents",
            QueueKind::PatternStat => "/api/agent/sync/pattern-stats",
            QueueKind::Execution => "/api/agent/executions",
            QueueKind::DomainDiscovery => "/api/agent/domain-discovery",
            QueueKind::EnumerationResult => "/api/agent/enumeration-results",
            QueueKind::CheckinMeta => "/api/agent/checkin-meta",
        };
        match self.post_json(path, payload).await {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(CommandError::Protocol { status: 429, body }) => DeliveryOutcome::Retry(body),
            Err(CommandError::Protocol { status, body }) if (400..500).contains(&status) => {
                DeliveryOutcome::Dead(format!("http {status}: {body}"))
            }
            Err(e) => DeliveryOutcome::Retry(e.to_string()),
        }
    }
}

fn read_token(path: &PathBuf) -> Result<String, CommandError> {
    std::fs::read_to_string(path)
        .map(|t| t.trim().to_string())
        .map_err(|source| CommandError::ApiKey { path: path.clone(), source })
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
