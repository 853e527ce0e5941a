// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire DTOs for the Central Command REST API.
//!
//! Check-in responses carry credential material (the credential-pull
//! contract). [`TargetRecord::into_parts`] splits a record into the
//! serializable [`Target`] and the in-memory-only [`Credential`]; the DTO
//! itself is dropped immediately after and its Debug is redacted.

use dw_core::{AuthScheme, Credential, Platform, Secret, Target, Transport};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct CheckinRequest {
    pub site_id: String,
    pub hostname: String,
    pub mac: String,
    pub ips: Vec<String>,
    pub uptime_sec: u64,
    pub agent_version: String,
    /// Appliance signing public key (hex), published at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// One target as delivered by the server. Password fields never appear in
/// Debug output.
#[derive(Clone, Deserialize)]
pub struct TargetRecord {
    pub hostname: String,
    pub address: String,
    #[serde(default)]
    pub transport: Option<Transport>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    #[serde(default)]
    pub allow_plaintext: bool,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub auth_scheme: Option<AuthScheme>,
    #[serde(default)]
    pub negotiate_token: Option<String>,
}

fn default_true() -> bool {
    true
}

impl std::fmt::Debug for TargetRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRecord")
            .field("hostname", &self.hostname)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"****")
            .finish_non_exhaustive()
    }
}

impl TargetRecord {
    /// Split into the target (credential *handle* only) and its credential.
    pub fn into_parts(self, platform: Platform) -> (Target, Credential) {
        let transport = self.transport.unwrap_or(match platform {
            Platform::Windows => Transport::Winrm,
            Platform::Linux => Transport::Ssh,
            Platform::NixosSelf => Transport::Local,
        });
        let scheme = self.auth_scheme.unwrap_or(match transport {
            Transport::Winrm => AuthScheme::Basic,
            Transport::Ssh => AuthScheme::SshPassword,
            Transport::Local => AuthScheme::Basic,
        });
        let handle = format!("cred-{}", self.hostname);
        let target = Target {
            id: self.hostname,
            address: self.address,
            platform,
            transport,
            credentials: handle,
            tls_verify: self.tls_verify,
            allow_plaintext: self.allow_plaintext,
            port: self.port,
        };
        let credential = Credential {
            username: self.username,
            secret: Secret::new(self.password),
            scheme,
            negotiate_token: self.negotiate_token.map(Secret::new),
        };
        (target, credential)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckinResponse {
    pub appliance_id: String,
    pub server_time: String,
    #[serde(default)]
    pub windows_targets: Vec<TargetRecord>,
    #[serde(default)]
    pub linux_targets: Vec<TargetRecord>,
    #[serde(default)]
    pub enabled_runbooks: Vec<String>,
    #[serde(default)]
    pub trigger_enumeration: bool,
    #[serde(default)]
    pub trigger_immediate_scan: bool,
}

/// A signed, expiring server order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Value,
    pub issued_at: String,
    pub expires_at: String,
    /// Ed25519 (hex) over the canonical JSON of the order minus this field.
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromotedRulesResponse {
    #[serde(default)]
    pub rules: Vec<Value>,
    pub cursor: String,
}

/// Execution telemetry, one per terminal healing result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub incident_id: String,
    pub site_id: String,
    pub host_id: String,
    pub check_type: String,
    pub tier: Option<String>,
    pub runbook_id: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
    pub pattern_signature: String,
    /// Pre/post state diff captured by the healer.
    #[serde(default)]
    pub state_diff: Value,
}

/// Escalation ticket stored at Central Command by the L3 router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub site_id: String,
    pub host_id: String,
    pub incident: Value,
    pub attempts: Vec<Value>,
    #[serde(default)]
    pub l2_reasoning: Option<String>,
    pub suggested_next_steps: Vec<String>,
    pub urgency: String,
    pub reason: String,
    pub created_at: String,
}
