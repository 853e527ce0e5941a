// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Check-in cycle: announce the appliance, adopt the returned target set
//! and credentials, honor trigger flags, poll signed orders.

use crate::lifecycle::Agent;
use dw_command::{CheckinRequest, OrderDecision};
use dw_core::{Credential, Platform, Target};
use dw_healer::TargetLookup;
use parking_lot::RwLock;
use std::collections::HashMap;

/// The scheduler-owned target set. Replaced wholesale on every check-in;
/// readers take an immutable snapshot per cycle.
#[derive(Default)]
pub struct TargetSet {
    inner: RwLock<HashMap<String, Target>>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, targets: Vec<Target>) {
        let map = targets.into_iter().map(|t| (t.id.clone(), t)).collect();
        *self.inner.write() = map;
    }

    pub fn snapshot(&self) -> Vec<Target> {
        self.inner.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TargetLookup for TargetSet {
    fn get(&self, host_id: &str) -> Option<Target> {
        self.inner.read().get(host_id).cloned()
    }
}

/// Trigger flags returned by one check-in.
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckinTriggers {
    pub immediate_scan: bool,
    pub enumeration: bool,
}

/// One check-in round trip. Credentials from the response replace the
/// in-memory map atomically and never touch disk.
pub async fn checkin_once(agent: &Agent) -> Result<CheckinTriggers, dw_command::CommandError> {
    let request = CheckinRequest {
        site_id: agent.config.site_id.clone(),
        hostname: agent.config.host_id.clone(),
        mac: primary_mac().unwrap_or_else(|| "00:00:00:00:00:00".to_string()),
        ips: Vec::new(),
        uptime_sec: host_uptime_sec(),
        agent_version: env!("CARGO_PKG_VERSION").to_string(),
        public_key: Some(agent.pipeline.public_key_hex()),
    };
    let response = agent.client.checkin(&request).await?;

    let mut targets = Vec::new();
    let mut credentials: HashMap<String, Credential> = HashMap::new();
    for record in response.windows_targets {
        let (target, credential) = record.into_parts(Platform::Windows);
        credentials.insert(target.credentials.clone(), credential);
        targets.push(target);
    }
    for record in response.linux_targets {
        let (target, credential) = record.into_parts(Platform::Linux);
        credentials.insert(target.credentials.clone(), credential);
        targets.push(target);
    }
    // Credentials first so a concurrent scan never sees a target whose
    // handle has no material behind it.
    agent.credentials.replace_all(credentials);
    agent.targets.replace(targets);
    agent.catalog.set_enabled(response.enabled_runbooks);
    *agent.appliance_id.lock() = Some(response.appliance_id.clone());
    agent.ready.record_checkin(dw_core::Clock::epoch_ms(&agent.clock));

    tracing::info!(
        appliance_id = %response.appliance_id,
        targets = agent.targets.len(),
        "check-in complete"
    );

    poll_orders(agent, &response.appliance_id).await;

    Ok(CheckinTriggers {
        immediate_scan: response.trigger_immediate_scan,
        enumeration: response.trigger_enumeration,
    })
}

/// Fetch, verify, acknowledge, execute, and complete pending orders.
async fn poll_orders(agent: &Agent, appliance_id: &str) {
    let orders = match agent.client.pending_orders(appliance_id).await {
        Ok(orders) => orders,
        Err(e) => {
            tracing::debug!(error = %e, "order poll failed");
            return;
        }
    };
    for order in orders {
        let now = dw_core::Clock::now_utc(&agent.clock);
        match agent.orders.verify(&order, now) {
            OrderDecision::Execute => {}
            decision => {
                tracing::warn!(order_id = %order.id, ?decision, "order rejected");
                agent.rejected_orders.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                continue;
            }
        }
        if let Err(e) = agent.client.ack_order(appliance_id, &order.id).await {
            tracing::warn!(order_id = %order.id, error = %e, "order ack failed");
            continue;
        }
        let result = execute_order(agent, &order).await;
        let completion = serde_json::json!({
            "order_id": order.id,
            "success": result.is_ok(),
            "detail": result.as_ref().err(),
        });
        if let Err(e) = agent.client.complete_order(appliance_id, &order.id, &completion).await {
            tracing::warn!(order_id = %order.id, error = %e, "order completion post failed");
        }
    }
}

async fn execute_order(agent: &Agent, order: &dw_command::OrderRecord) -> Result<(), String> {
    tracing::info!(order_id = %order.id, action = %order.action, "executing order");
    match order.action.as_str() {
        // The host updater consumes the order file; the agent only signals
        "update_agent" => {
            let path = agent.config.state_dir.join("update.order");
            let bytes = serde_json::to_vec_pretty(order).map_err(|e| e.to_string())?;
            std::fs::write(&path, bytes).map_err(|e| e.to_string())
        }
        "immediate_scan" => {
            agent.scan_trigger.notify_one();
            Ok(())
        }
        "run_enumeration" => {
            agent.enumeration_trigger.notify_one();
            Ok(())
        }
        other => Err(format!("unsupported order action {other:?}")),
    }
}

fn primary_mac() -> Option<String> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name();
        if name == "lo" {
            continue;
        }
        if let Ok(mac) = std::fs::read_to_string(entry.path().join("address")) {
            let mac = mac.trim();
            if !mac.is_empty() && mac != "00:00:00:00:00:00" {
                return Some(mac.to_string());
            }
        }
    }
    None
}

fn host_uptime_sec() -> u64 {
    std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|text| text.split_whitespace().next().map(str::to_string))
        .and_then(|first| first.parse::<f64>().ok())
        .map(|seconds| seconds as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str) -> Target {
        Target {
            id: id.into(),
            address: "10.0.0.5".into(),
            platform: Platform::Windows,
            transport: dw_core::Transport::Winrm,
            credentials: format!("cred-{id}"),
            tls_verify: true,
            allow_plaintext: false,
            port: None,
        }
    }

    #[test]
    fn replace_swaps_the_whole_set() {
        let set = TargetSet::new();
        set.replace(vec![target("WS01"), target("WS02")]);
        assert_eq!(set.len(), 2);
        assert!(set.get("WS01").is_some());

        set.replace(vec![target("WS03")]);
        assert_eq!(set.len(), 1);
        assert!(set.get("WS01").is_none(), "old targets are gone");
        assert!(set.get("WS03").is_some());
    }

    #[test]
    fn snapshot_is_detached_from_later_replacements() {
        let set = TargetSet::new();
        set.replace(vec![target("WS01")]);
        let snapshot = set.snapshot();
        set.replace(vec![]);
        assert_eq!(snapshot.len(), 1, "snapshot keeps the cycle's view");
        assert!(set.is_empty());
    }
}
