// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/healthz` and `/readyz`.
//!
//! Liveness is unconditional while the process runs. Readiness requires
//! completed startup and a successful check-in within the last five
//! minutes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const READY_CHECKIN_WINDOW_MS: u64 = 5 * 60 * 1000;

#[derive(Default)]
pub struct ReadyState {
    started: AtomicBool,
    last_checkin_epoch_ms: AtomicU64,
}

impl ReadyState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub fn record_checkin(&self, epoch_ms: u64) {
        self.last_checkin_epoch_ms.store(epoch_ms, Ordering::Release);
    }

    pub fn is_ready(&self, now_epoch_ms: u64) -> bool {
        if !self.started.load(Ordering::Acquire) {
            return false;
        }
        let last = self.last_checkin_epoch_ms.load(Ordering::Acquire);
        last != 0 && now_epoch_ms.saturating_sub(last) <= READY_CHECKIN_WINDOW_MS
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<Arc<ReadyState>>) -> StatusCode {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    if state.is_ready(now) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub fn health_router(state: Arc<ReadyState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Serve the health endpoints until cancellation.
pub async fn serve_health(
    state: Arc<ReadyState>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health endpoints listening");
    axum::serve(listener, health_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
