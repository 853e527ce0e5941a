// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! L2 planner client and budget tracking.
//!
//! The planner is remote and agnostic (cloud LLM or local model). The
//! agent enforces a daily USD budget, an hourly call count, and an
//! in-flight concurrency cap; a budget denial is not an error, it is an
//! immediate promotion to L3.

use async_trait::async_trait;
use dw_core::{Incident, L2Config};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Estimated planner call cost, charged against the daily budget.
const COST_PER_CALL_USD: f64 = 0.05;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner transport: {0}")]
    Transport(String),
    #[error("planner returned undecodable output: {0}")]
    Parse(String),
}

/// Compact context shipped to the planner. Runbook ids are names only;
/// schemas stay local.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerContext {
    pub incident: Incident,
    /// Most recent resolutions for this (host, check), newest first, ≤10.
    pub recent_resolutions: Vec<serde_json::Value>,
    pub available_runbooks: Vec<String>,
    pub maintenance_window: Option<String>,
    pub dry_run: bool,
    /// Set on the one retry after a parse failure.
    pub strict: bool,
}

/// Structured planner decision.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerDecision {
    #[serde(default)]
    pub runbook_id: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default)]
    pub escalate: bool,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, context: &PlannerContext) -> Result<PlannerDecision, PlannerError>;
}

/// HTTP planner endpoint: POST context, receive a decision.
pub struct HttpPlanner {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpPlanner {
    pub fn new(endpoint: String) -> Result<Self, PlannerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PlannerError::Transport(e.to_string()))?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn plan(&self, context: &PlannerContext) -> Result<PlannerDecision, PlannerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(context)
            .send()
            .await
            .map_err(|e| PlannerError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PlannerError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(PlannerError::Transport(format!("http {status}: {text}")));
        }
        serde_json::from_str(&text).map_err(|e| PlannerError::Parse(e.to_string()))
    }
}

/// Why a call was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDenied {
    DailyBudget,
    HourlyCalls,
    Concurrency,
}

/// Sliding budget windows keyed off wall-clock epoch milliseconds so a
/// fake clock can drive them in tests.
pub struct BudgetTracker {
    config: L2Config,
    inner: Mutex<BudgetInner>,
    in_flight: Arc<tokio::sync::Semaphore>,
}

#[derive(Default)]
struct BudgetInner {
    day_start_ms: u64,
    spent_today_usd: f64,
    hour_start_ms: u64,
    calls_this_hour: u32,
}

/// Releases the concurrency slot on drop.
#[derive(Debug)]
pub struct CallPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl BudgetTracker {
    pub fn new(config: L2Config) -> Self {
        let permits = config.max_concurrent.max(1) as usize;
        Self {
            config,
            inner: Mutex::new(BudgetInner::default()),
            in_flight: Arc::new(tokio::sync::Semaphore::new(permits)),
        }
    }

    /// Charge one call against the windows, or say why not.
    pub fn try_begin(&self, now_epoch_ms: u64) -> Result<CallPermit, BudgetDenied> {
        const DAY_MS: u64 = 24 * 3600 * 1000;
        const HOUR_MS: u64 = 3600 * 1000;
        let mut inner = self.inner.lock();
        if now_epoch_ms.saturating_sub(inner.day_start_ms) >= DAY_MS {
            inner.day_start_ms = now_epoch_ms - (now_epoch_ms % DAY_MS);
            inner.spent_today_usd = 0.0;
        }
        if now_epoch_ms.saturating_sub(inner.hour_start_ms) >= HOUR_MS {
            inner.hour_start_ms = now_epoch_ms - (now_epoch_ms % HOUR_MS);
            inner.calls_this_hour = 0;
        }
        if inner.spent_today_usd + COST_PER_CALL_USD > self.config.daily_budget_usd {
            return Err(BudgetDenied::DailyBudget);
        }
        if inner.calls_this_hour >= self.config.max_calls_per_hour {
            return Err(BudgetDenied::HourlyCalls);
        }
        let Ok(permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
            return Err(BudgetDenied::Concurrency);
        };
        inner.spent_today_usd += COST_PER_CALL_USD;
        inner.calls_this_hour += 1;
        Ok(CallPermit { _permit: permit })
    }
}
