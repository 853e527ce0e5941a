// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure, total rule evaluation over incident raw state.

use crate::model::{CondOp, Condition, L1Rule};
use dw_core::{Incident, RawState};
use serde_json::Value;

/// A rule matches iff its platform and check-type constraints hold and
/// *all* conditions evaluate true over the incident's raw state.
pub fn rule_matches(rule: &L1Rule, incident: &Incident) -> bool {
    if let Some(platform) = rule.platform {
        if platform != incident.platform {
            return false;
        }
    }
    if let Some(check) = &rule.check_type {
        if check != &incident.check_type {
            return false;
        }
    }
    rule.conditions.iter().all(|c| eval_condition(c, &incident.raw_state))
}

/// Evaluate one condition. Total: missing fields and type mismatches
/// evaluate to false, never to an error.
pub fn eval_condition(cond: &Condition, state: &RawState) -> bool {
    let field = cond.field.strip_prefix("raw.").unwrap_or(&cond.field);
    let Some(actual) = state.get(field) else {
        // `ne` against a missing field holds; nothing else does.
        return cond.op == CondOp::Ne;
    };
    match cond.op {
        CondOp::Eq => loose_eq(actual, &cond.value),
        CondOp::Ne => !loose_eq(actual, &cond.value),
        CondOp::Gt => compare(actual, &cond.value).is_some_and(|o| o.is_gt()),
        CondOp::Gte => compare(actual, &cond.value).is_some_and(|o| o.is_ge()),
        CondOp::Lt => compare(actual, &cond.value).is_some_and(|o| o.is_lt()),
        CondOp::Lte => compare(actual, &cond.value).is_some_and(|o| o.is_le()),
        CondOp::Contains => contains(actual, &cond.value),
        CondOp::Matches => match &cond.regex {
            Some(re) => re.is_match(&render(actual)),
            None => false,
        },
    }
}

/// Equality that tolerates the YAML/collector representation gap:
/// `"fail" == fail`, `5 == "5"`, `true == "true"`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (number_of(a), number_of(b)) {
        (Some(x), Some(y)) => return (x - y).abs() < f64::EPSILON,
        _ => {}
    }
    render(a) == render(b)
}

/// Numeric ordering; number-like strings coerce. Non-numeric operands have
/// no ordering.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    let x = number_of(a)?;
    let y = number_of(b)?;
    x.partial_cmp(&y)
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::String(s) => s.contains(&render(needle)),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        _ => false,
    }
}

fn number_of(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "eval_tests.rs"]
mod tests;
