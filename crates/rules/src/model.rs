// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rule data model.

use dw_core::Platform;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a rule came from. Priority defaults per origin: local 1,
/// promoted 5, builtin 10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrigin {
    Builtin,
    Local,
    Promoted,
}

dw_core::simple_display! {
    RuleOrigin {
        Builtin => "builtin",
        Local => "local",
        Promoted => "promoted",
    }
}

impl RuleOrigin {
    pub fn default_priority(&self) -> u32 {
        match self {
            RuleOrigin::Local => 1,
            RuleOrigin::Promoted => 5,
            RuleOrigin::Builtin => 10,
        }
    }
}

/// Condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Matches,
}

/// One condition over the incident raw state. `matches` regexes are
/// compiled at load time; an uncompiled matches-condition never matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: CondOp,
    pub value: Value,
    #[serde(skip)]
    pub(crate) regex: Option<Regex>,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: CondOp, value: Value) -> Self {
        Self { field: field.into(), op, value, regex: None }
    }

    /// Compile the regex for a `matches` condition. Load-time refusal of
    /// bad patterns lives here.
    pub fn compile(&mut self) -> Result<(), regex::Error> {
        if self.op == CondOp::Matches {
            let pattern = match &self.value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            self.regex = Some(Regex::new(&pattern)?);
        }
        Ok(())
    }
}

/// Dispatchable action, resolved from the document's `action` name at load
/// time. The engine never sees a name it cannot handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    RunWindowsRunbook { runbook: String },
    RunLinuxRunbook { runbook: String },
    RunLocalScript { script: String },
    Escalate,
    Noop,
}

impl RuleAction {
    /// The runbook this action dispatches, if it dispatches one.
    pub fn runbook_id(&self) -> Option<&str> {
        match self {
            RuleAction::RunWindowsRunbook { runbook } | RuleAction::RunLinuxRunbook { runbook } => {
                Some(runbook)
            }
            _ => None,
        }
    }
}

/// A deterministic L1 rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1Rule {
    pub id: String,
    pub priority: u32,
    pub origin: RuleOrigin,
    /// Skipped unless it matches the incident's platform.
    #[serde(default)]
    pub platform: Option<Platform>,
    /// Skipped unless it matches the incident's check type.
    #[serde(default)]
    pub check_type: Option<String>,
    pub conditions: Vec<Condition>,
    pub action: RuleAction,
    /// Per-rule cooldown override; precedence over the global default.
    #[serde(default)]
    pub cooldown_sec: Option<u64>,
    /// HIPAA / framework control ids carried into evidence bundles.
    #[serde(default)]
    pub framework_controls: Vec<String>,
}
