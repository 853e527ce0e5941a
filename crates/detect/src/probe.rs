// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collector-script state probe.

use crate::DetectError;
use async_trait::async_trait;
use dw_core::{RawState, Target};
use dw_exec::Executor;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Source of raw state for a detector. Separated from the detectors so
/// check evaluation is unit-testable without a target.
#[async_trait]
pub trait StateProbe: Send + Sync {
    async fn collect(&self, target: &Target) -> Result<RawState, DetectError>;
}

/// Runs a fixed collector script through an executor and parses its
/// `key=value` stdout.
pub struct ScriptProbe {
    executor: Arc<dyn Executor>,
    script: &'static str,
    timeout: Duration,
}

impl ScriptProbe {
    pub fn new(executor: Arc<dyn Executor>, script: &'static str) -> Self {
        Self { executor, script, timeout: Duration::from_secs(120) }
    }
}

#[async_trait]
impl StateProbe for ScriptProbe {
    async fn collect(&self, target: &Target) -> Result<RawState, DetectError> {
        let output = self
            .executor
            .run_script(target, self.script, &HashMap::new(), self.timeout)
            .await
            .map_err(|e| DetectError::Probe { target: target.id.clone(), detail: e.to_string() })?;
        if output.timed_out {
            return Err(DetectError::Probe {
                target: target.id.clone(),
                detail: "collector timed out".into(),
            });
        }
        if output.exit_code != 0 {
            return Err(DetectError::Probe {
                target: target.id.clone(),
                detail: format!("collector exit {}: {}", output.exit_code, output.stderr.trim()),
            });
        }
        Ok(parse_collector_output(&output.stdout))
    }
}

/// Parse `key=value` lines into state. Values are coerced to JSON booleans
/// and numbers where they parse as such; everything else stays a string.
/// Blank lines and `#` comments are skipped; keys are lowercased.
pub fn parse_collector_output(stdout: &str) -> RawState {
    let mut state = RawState::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else { continue };
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            continue;
        }
        state.insert(key, coerce(value.trim()));
    }
    state
}

fn coerce(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_booleans_numbers_and_strings() {
        let state = parse_collector_output(
            "firewall_service_running=true\nmissing_critical_count=2\nprofile=domain\ndisk_used_pct=97.5\n",
        );
        assert_eq!(state["firewall_service_running"], json!(true));
        assert_eq!(state["missing_critical_count"], json!(2));
        assert_eq!(state["profile"], json!("domain"));
        assert_eq!(state["disk_used_pct"], json!(97.5));
    }

    #[test]
    fn skips_comments_blanks_and_malformed_lines() {
        let state = parse_collector_output("# header\n\nnot a pair\nkey=ok\n=novalue\n");
        assert_eq!(state.len(), 1);
        assert_eq!(state["key"], json!("ok"));
    }

    #[test]
    fn keys_are_lowercased_values_keep_case() {
        let state = parse_collector_output("SELinux_Mode=Enforcing");
        assert_eq!(state["selinux_mode"], json!("Enforcing"));
    }

    #[test]
    fn values_may_contain_equals_signs() {
        let state = parse_collector_output("sshd_config=PermitRootLogin=no");
        assert_eq!(state["sshd_config"], json!("PermitRootLogin=no"));
    }

    #[tokio::test]
    async fn script_probe_maps_nonzero_exit_to_probe_error() {
        let fake = dw_exec::FakeExecutor::new();
        fake.push_output(dw_exec::ScriptOutput::failed(2, "boom"));
        let probe = ScriptProbe::new(Arc::new(fake), "collector");
        let err = probe.collect(&dw_core::Target::local_self("a")).await.unwrap_err();
        assert!(matches!(err, DetectError::Probe { .. }));
    }

    #[tokio::test]
    async fn script_probe_parses_successful_output() {
        let fake = dw_exec::FakeExecutor::new();
        fake.push_output(dw_exec::ScriptOutput::ok("nftables_active=true\n"));
        let probe = ScriptProbe::new(Arc::new(fake), "collector");
        let state = probe.collect(&dw_core::Target::local_self("a")).await.unwrap();
        assert_eq!(state["nftables_active"], json!(true));
    }
}
