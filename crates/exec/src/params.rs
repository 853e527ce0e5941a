// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parameter injection preambles.
//!
//! The prefixes are part of the executor contract: runbook scripts rely on
//! `$params_Hostname` (PowerShell) and `PARAMS_HOSTNAME` (POSIX shell)
//! existing verbatim.

use std::collections::HashMap;

/// Render parameters as PowerShell variable assignments with the `$params_`
/// prefix, single-quoted with `''` doubling.
pub fn powershell_preamble(params: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    let mut out = String::new();
    for key in keys {
        let name = sanitize_ident(key);
        let value = params[key].replace('\'', "''");
        out.push_str(&format!("$params_{name} = '{value}'\n"));
    }
    out
}

/// Render parameters as shell-quoted `PARAMS_<UPPER>` environment exports.
pub fn shell_env_preamble(params: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    let mut out = String::new();
    for key in keys {
        let name = sanitize_ident(key).to_uppercase();
        let value = shell_quote(&params[key]);
        out.push_str(&format!("PARAMS_{name}={value}\nexport PARAMS_{name}\n"));
    }
    out
}

/// POSIX single-quote, closing and reopening around embedded quotes.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Keep only identifier-safe characters so injected names cannot break out
/// of an assignment.
fn sanitize_ident(key: &str) -> String {
    key.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect()
}
