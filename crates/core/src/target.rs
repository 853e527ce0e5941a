// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Targets and the in-memory credential store.
//!
//! Credentials are a handle into a process-local map that is replaced
//! wholesale on every check-in (the credential-pull contract). Credential
//! material never derives `Serialize` and never reaches disk.

use crate::drift::Platform;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Transport used to reach a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Winrm,
    Ssh,
    Local,
}

crate::simple_display! {
    Transport {
        Winrm => "winrm",
        Ssh => "ssh",
        Local => "local",
    }
}

/// Authentication scheme carried by a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    Basic,
    Ntlm,
    Kerberos,
    SshKey,
    SshPassword,
}

/// Secret material wrapper: redacted `Debug`, no `Serialize`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// One target credential. Lives only in the [`CredentialStore`].
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub secret: Secret,
    pub scheme: AuthScheme,
    /// Pre-negotiated token for single-leg Negotiate auth (WinRM).
    pub negotiate_token: Option<Secret>,
}

/// A remediation/scan target. Serializable: it carries a credential
/// *handle*, never material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Logical hostname; doubles as the host id in incidents and bundles.
    pub id: String,
    pub address: String,
    pub platform: Platform,
    pub transport: Transport,
    /// Key into the in-memory credential store.
    pub credentials: String,
    /// Verify TLS certificates (WinRM HTTPS).
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    /// Allow plaintext WinRM on 5985; lab-only, off by default.
    #[serde(default)]
    pub allow_plaintext: bool,
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_true() -> bool {
    true
}

impl Target {
    /// The appliance itself as a target.
    pub fn local_self(host_id: &str) -> Self {
        Self {
            id: host_id.to_string(),
            address: "127.0.0.1".to_string(),
            platform: Platform::NixosSelf,
            transport: Transport::Local,
            credentials: String::new(),
            tls_verify: true,
            allow_plaintext: false,
            port: None,
        }
    }
}

/// Process-local credential map.
///
/// `replace_all` swaps the whole map atomically; readers clone entries out
/// under the lock so a check-in mid-scan cannot tear a credential.
#[derive(Clone, Default)]
pub struct CredentialStore {
    inner: Arc<Mutex<HashMap<String, Credential>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every stored credential. Old material is dropped (and with
    /// it, overwritten) in one step.
    pub fn replace_all(&self, creds: HashMap<String, Credential>) {
        *self.inner.lock() = creds;
    }

    pub fn get(&self, handle: &str) -> Option<Credential> {
        self.inner.lock().get(handle).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CredentialStore({} entries)", self.len())
    }
}

#[cfg(test)]
#[path = "target_tests.rs"]
mod tests;
