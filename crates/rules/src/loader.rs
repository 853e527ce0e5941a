// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rule document parsing and the rules directory loader.
//!
//! Documents are YAML (JSON parses through the same path); a file holds one
//! rule or a list. Action names resolve to [`RuleAction`] here (including
//! the legacy-name migration pass), so unknown actions are refused before a
//! rule can ever reach the engine.

use crate::model::{CondOp, Condition, L1Rule, RuleAction, RuleOrigin};
use dw_core::Platform;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unparseable rule document {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("rule {id}: unknown action {action:?}")]
    UnknownAction { id: String, action: String },
    #[error("rule {id}: action {action:?} missing required parameter {param:?}")]
    MissingParam { id: String, action: String, param: &'static str },
    #[error("rule {id}: bad regex in condition on {field:?}: {source}")]
    BadRegex {
        id: String,
        field: String,
        #[source]
        source: regex::Error,
    },
    #[error("duplicate rule ({id}, {origin})")]
    Duplicate { id: String, origin: RuleOrigin },
}

#[derive(Debug, Deserialize)]
struct ConditionDoc {
    field: String,
    op: CondOp,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct RuleDocument {
    id: String,
    #[serde(default)]
    priority: Option<u32>,
    #[serde(default)]
    platform: Option<Platform>,
    #[serde(default, alias = "check_type")]
    check: Option<String>,
    #[serde(default)]
    conditions: Vec<ConditionDoc>,
    action: String,
    #[serde(default)]
    params: BTreeMap<String, Value>,
    #[serde(default)]
    cooldown_sec: Option<u64>,
    #[serde(default, alias = "hipaa_controls")]
    framework_controls: Vec<String>,
}

/// Parse one document body (single rule or list) with the given origin.
pub fn parse_rule_documents(
    text: &str,
    origin: RuleOrigin,
    source_name: &str,
) -> Result<Vec<L1Rule>, RuleError> {
    let parsed: Value = serde_yaml::from_str(text)
        .map_err(|source| RuleError::Parse { path: source_name.to_string(), source })?;
    let docs: Vec<RuleDocument> = if parsed.is_array() {
        serde_json::from_value(parsed).map_err(|e| RuleError::Parse {
            path: source_name.to_string(),
            source: serde::de::Error::custom(e.to_string()),
        })?
    } else {
        vec![serde_json::from_value(parsed).map_err(|e| RuleError::Parse {
            path: source_name.to_string(),
            source: serde::de::Error::custom(e.to_string()),
        })?]
    };
    docs.into_iter().map(|doc| finish(doc, origin)).collect()
}

fn finish(doc: RuleDocument, origin: RuleOrigin) -> Result<L1Rule, RuleError> {
    let action = resolve_action(&doc.id, &doc.action, &doc.params)?;
    let mut conditions = Vec::with_capacity(doc.conditions.len());
    for c in doc.conditions {
        let mut cond = Condition::new(c.field, c.op, c.value);
        cond.compile().map_err(|source| RuleError::BadRegex {
            id: doc.id.clone(),
            field: cond.field.clone(),
            source,
        })?;
        conditions.push(cond);
    }
    Ok(L1Rule {
        priority: doc.priority.unwrap_or_else(|| origin.default_priority()),
        id: doc.id,
        origin,
        platform: doc.platform,
        check_type: doc.check,
        conditions,
        action,
        cooldown_sec: doc.cooldown_sec,
        framework_controls: doc.framework_controls,
    })
}

/// Legacy action names from earlier rule generations, mapped during load so
/// the engine never carries compatibility shims.
fn migrate_legacy(name: &str) -> Option<RuleAction> {
    match name {
        "restore_firewall_baseline" => {
            Some(RuleAction::RunWindowsRunbook { runbook: "RB-WIN-SEC-001".into() })
        }
        "enable_defender_realtime" => {
            Some(RuleAction::RunWindowsRunbook { runbook: "RB-WIN-SEC-004".into() })
        }
        "restart_auditd" => Some(RuleAction::RunLinuxRunbook { runbook: "RB-LNX-SEC-003".into() }),
        _ => None,
    }
}

fn resolve_action(
    id: &str,
    name: &str,
    params: &BTreeMap<String, Value>,
) -> Result<RuleAction, RuleError> {
    if let Some(migrated) = migrate_legacy(name) {
        tracing::debug!(rule = %id, legacy = %name, "migrated legacy action name");
        return Ok(migrated);
    }
    let str_param = |param: &'static str| -> Result<String, RuleError> {
        params
            .get(param)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RuleError::MissingParam {
                id: id.to_string(),
                action: name.to_string(),
                param,
            })
    };
    match name {
        "run_windows_runbook" => Ok(RuleAction::RunWindowsRunbook { runbook: str_param("runbook")? }),
        "run_linux_runbook" => Ok(RuleAction::RunLinuxRunbook { runbook: str_param("runbook")? }),
        "run_local_script" => Ok(RuleAction::RunLocalScript { script: str_param("script")? }),
        "escalate" => Ok(RuleAction::Escalate),
        "noop" => Ok(RuleAction::Noop),
        other => {
            Err(RuleError::UnknownAction { id: id.to_string(), action: other.to_string() })
        }
    }
}

/// Load every `.yaml`/`.yml`/`.json` file in the rules directory as
/// locally-authored rules, enforcing `(id, origin)` uniqueness.
pub fn load_rules_dir(dir: &Path) -> Result<Vec<L1Rule>, RuleError> {
    let mut rules = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|source| RuleError::Io { path: dir.display().to_string(), source })?;
    let mut paths: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml") | Some("json")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let name = path.display().to_string();
        let text = std::fs::read_to_string(&path)
            .map_err(|source| RuleError::Io { path: name.clone(), source })?;
        for rule in parse_rule_documents(&text, RuleOrigin::Local, &name)? {
            if !seen.insert(rule.id.clone()) {
                return Err(RuleError::Duplicate { id: rule.id, origin: RuleOrigin::Local });
            }
            rules.push(rule);
        }
    }
    tracing::info!(count = rules.len(), dir = %dir.display(), "loaded local rules");
    Ok(rules)
}

/// Built-in baseline rules, priority 10.
pub fn builtin_rules() -> Vec<L1Rule> {
    fn rule(
        id: &str,
        platform: Platform,
        check: &str,
        conditions: Vec<Condition>,
        action: RuleAction,
        controls: &[&str],
    ) -> L1Rule {
        L1Rule {
            id: id.to_string(),
            priority: RuleOrigin::Builtin.default_priority(),
            origin: RuleOrigin::Builtin,
            platform: Some(platform),
            check_type: Some(check.to_string()),
            conditions,
            action,
            cooldown_sec: None,
            framework_controls: controls.iter().map(|s| s.to_string()).collect(),
        }
    }
    use serde_json::json;
    vec![
        rule(
            "L1-FIREWALL-001",
            Platform::Windows,
            "firewall",
            vec![
                Condition::new("status", CondOp::Eq, json!("fail")),
                Condition::new("profile_enabled", CondOp::Eq, json!(false)),
                Condition::new("service_running", CondOp::Eq, json!(true)),
            ],
            RuleAction::RunWindowsRunbook { runbook: "RB-WIN-SEC-001".into() },
            &["164.312(c)(1)"],
        ),
        rule(
            "L1-DEFENDER-001",
            Platform::Windows,
            "defender",
            vec![Condition::new("defender_realtime", CondOp::Eq, json!(false))],
            RuleAction::RunWindowsRunbook { runbook: "RB-WIN-SEC-004".into() },
            &["164.308(a)(5)(ii)(B)"],
        ),
        rule(
            "L1-LNXFW-001",
            Platform::Linux,
            "firewall",
            vec![Condition::new("status", CondOp::Eq, json!("fail"))],
            RuleAction::RunLinuxRunbook { runbook: "RB-LNX-SEC-002".into() },
            &["164.312(c)(1)"],
        ),
        rule(
            "L1-AUDITD-001",
            Platform::Linux,
            "auditd",
            vec![Condition::new("auditd_running", CondOp::Eq, json!(false))],
            RuleAction::RunLinuxRunbook { runbook: "RB-LNX-SEC-003".into() },
            &["164.312(b)"],
        ),
        rule(
            "L1-CHRONY-001",
            Platform::NixosSelf,
            "chrony",
            vec![Condition::new("chrony_synced", CondOp::Eq, json!(false))],
            RuleAction::RunLocalScript {
                script: "systemctl restart chronyd && sleep 2 && chronyc tracking".into(),
            },
            &[],
        ),
    ]
}

#[cfg(test)]
#[path = "loader_tests.rs"]
mod tests;
