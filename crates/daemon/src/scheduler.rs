// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cadence orchestration.
//!
//! One loop per cadence, each sleeping its interval with independent ±10%
//! jitter and re-checking the cancellation token on every await. Shutdown
//! cancels the root token, gives in-flight work the drain budget, and
//! abandons (with a warning) anything still running after it.

use crate::lifecycle::{Agent, DRAIN_TIMEOUT};
use crate::{checkin, scan};
use dw_core::Clock;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Jitter a base interval by ±`pct` (uniform).
pub fn jittered(base: Duration, pct: f64) -> Duration {
    if pct <= 0.0 {
        return base;
    }
    let spread = base.as_secs_f64() * pct;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.05))
}

/// Run every cadence until cancellation, then drain.
pub async fn run(agent: Arc<Agent>, mut drift_rx: tokio::sync::mpsc::Receiver<dw_core::DriftResult>) {
    let cancel = agent.cancel.clone();
    let mut tasks = JoinSet::new();

    // Intake feed: push events flow through the standard pipeline
    {
        let agent = Arc::clone(&agent);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = drift_rx.recv() => match event {
                        Some(result) => scan::process_drift_result(&agent, result).await,
                        None => break,
                    },
                }
            }
        });
    }

    // gRPC intake + health endpoints
    if agent.config.grpc.enabled {
        let service = Arc::clone(&agent.intake);
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], agent.config.grpc.port));
        let grpc_cancel = cancel.clone();
        tasks.spawn(async move {
            if let Err(e) = dw_intake::serve_intake(service, addr, grpc_cancel).await {
                tracing::error!(error = %e, "grpc intake exited");
            }
        });
        let ready = Arc::clone(&agent.ready);
        let health_addr =
            std::net::SocketAddr::from(([0, 0, 0, 0], agent.config.grpc.health_port));
        let health_cancel = cancel.clone();
        tasks.spawn(async move {
            if let Err(e) = dw_intake::serve_health(ready, health_addr, health_cancel).await {
                tracing::error!(error = %e, "health endpoints exited");
            }
        });
    }

    // Check-in
    spawn_cadence(&mut tasks, Arc::clone(&agent), agent.config.intervals.checkin(), "checkin", |agent| async move {
        match checkin::checkin_once(&agent).await {
            Ok(triggers) => {
                if triggers.immediate_scan {
                    agent.scan_trigger.notify_one();
                }
                if triggers.enumeration {
                    agent.enumeration_trigger.notify_one();
                }
            }
            Err(e) => tracing::warn!(error = %e, "check-in failed"),
        }
    });

    // Drift scan (cadence + immediate trigger)
    {
        let agent = Arc::clone(&agent);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let pct = agent.config.intervals.jitter_pct;
            loop {
                let sleep = jittered(agent.config.intervals.drift_scan(), pct);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(sleep) => {}
                    _ = agent.scan_trigger.notified() => {
                        tracing::info!("immediate scan triggered");
                    }
                }
                scan::drift_scan(&agent).await;
            }
        });
    }

    // Workstation discovery refresh
    {
        let agent = Arc::clone(&agent);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let pct = agent.config.intervals.jitter_pct;
            loop {
                let sleep = jittered(agent.config.intervals.discovery(), pct);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(sleep) => {}
                    _ = agent.enumeration_trigger.notified() => {
                        tracing::info!("enumeration triggered");
                    }
                }
                discovery_tick(&agent).await;
            }
        });
    }

    // Workstation compliance over push agents
    spawn_cadence(&mut tasks, Arc::clone(&agent), agent.config.intervals.workstation(), "workstation", |agent| async move {
        workstation_tick(&agent).await;
    });

    // Learning sync (and the OTS upgrade replay, which shares its pace)
    spawn_cadence(&mut tasks, Arc::clone(&agent), agent.config.intervals.learning_sync(), "learning", |agent| async move {
        let now = dw_core::rfc3339_ms(agent.clock.now_utc());
        let report = agent.learning.sync_once(now).await;
        tracing::info!(
            stats_pushed = report.stats_pushed,
            rules_pulled = report.rules_pulled,
            ruleset = report.ruleset_size,
            "learning sync cycle"
        );
        if let Some(anchor) = &agent.anchor {
            let pending = pending_ots_proofs(&agent.config.state_dir.join("evidence"));
            if !pending.is_empty() {
                let upgraded = anchor.upgrade_pending(pending).await;
                tracing::info!(upgraded, "ots proofs upgraded");
            }
        }
    });

    // Queue drain + daily rotation
    spawn_cadence(&mut tasks, Arc::clone(&agent), agent.config.intervals.queue_drain(), "queue-drain", |agent| async move {
        let stats = agent.sender.drain_once().await;
        if stats.delivered + stats.dead > 0 {
            tracing::debug!(delivered = stats.delivered, dead = stats.dead, "queue drained");
        }
        let today = agent.clock.now_utc().date_naive();
        if let Err(e) = agent.queue.rotate(today) {
            tracing::warn!(error = %e, "queue rotation failed");
        }
    });

    // Flap GC + maintenance-window drain
    spawn_cadence(&mut tasks, Arc::clone(&agent), agent.config.intervals.flap_gc(), "flap-gc", |agent| async move {
        agent.healer.flap_gc();
        scan::drain_deferred(&agent).await;
    });

    agent.ready.mark_started();

    // Wait for shutdown, then drain with a bound.
    cancel.cancelled().await;
    tracing::info!("shutdown: draining in-flight work");
    let drain = async {
        while tasks.join_next().await.is_some() {}
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("drain budget exceeded, abandoning remaining workers");
        tasks.abort_all();
    }
    tracing::info!("scheduler stopped");
}

fn spawn_cadence<F, Fut>(
    tasks: &mut JoinSet<()>,
    agent: Arc<Agent>,
    interval: Duration,
    name: &'static str,
    action: F,
) where
    F: Fn(Arc<Agent>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let cancel = agent.cancel.clone();
    tasks.spawn(async move {
        let pct = agent.config.intervals.jitter_pct;
        loop {
            let sleep = jittered(interval, pct);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
            tracing::trace!(cadence = name, "tick");
            action(Arc::clone(&agent)).await;
        }
    });
}

/// Pending OTS proof sidecars under the evidence tree.
fn pending_ots_proofs(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut pending = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().and_then(|n| n.to_str()) == Some("bundle.ots.pending") {
                pending.push(path);
            }
        }
    }
    pending
}

/// Refresh the workstation list. Enumeration itself is an external
/// module; the agent records that a refresh ran and forwards the request
/// shape upstream.
async fn discovery_tick(agent: &Arc<Agent>) {
    let runs = agent.discovery_runs.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
    let payload = serde_json::json!({
        "site_id": agent.config.site_id,
        "requested_at": dw_core::rfc3339_ms(agent.clock.now_utc()),
        "run": runs,
        "registered_agents": agent.intake.registered_count(),
    });
    let now = dw_core::rfc3339_ms(agent.clock.now_utc());
    if let Err(e) =
        agent.queue.enqueue(dw_storage::QueueKind::DomainDiscovery, payload, now).await
    {
        tracing::warn!(error = %e, "discovery record enqueue failed");
    }
}

/// Lightweight compliance pass over push-based workstation agents:
/// liveness within the cadence window, stale agents reported upstream.
async fn workstation_tick(agent: &Arc<Agent>) {
    let now_ms = agent.clock.epoch_ms();
    let window_ms = agent.config.intervals.workstation_sec * 1000 * 2;
    let online = agent.intake.online_agents(now_ms, window_ms);
    let registered = agent.intake.registered_count();
    let stale = registered.saturating_sub(online.len());
    if stale > 0 {
        tracing::warn!(online = online.len(), stale, "workstation agents missing heartbeats");
    }
    let payload = serde_json::json!({
        "site_id": agent.config.site_id,
        "online": online,
        "registered": registered,
        "checked_at": dw_core::rfc3339_ms(agent.clock.now_utc()),
    });
    let now = dw_core::rfc3339_ms(agent.clock.now_utc());
    if let Err(e) = agent.queue.enqueue(dw_storage::QueueKind::CheckinMeta, payload, now).await {
        tracing::warn!(error = %e, "workstation summary enqueue failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_ten_percent() {
        let base = Duration::from_secs(300);
        for _ in 0..200 {
            let d = jittered(base, 0.1);
            assert!(d >= Duration::from_secs(270), "{d:?}");
            assert!(d <= Duration::from_secs(330), "{d:?}");
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        assert_eq!(jittered(Duration::from_secs(60), 0.0), Duration::from_secs(60));
    }

    #[test]
    fn jitter_never_collapses_to_zero() {
        let d = jittered(Duration::from_millis(100), 0.5);
        assert!(d >= Duration::from_millis(50));
    }
}
