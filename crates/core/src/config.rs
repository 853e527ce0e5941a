// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration: defaults < YAML file < environment.
//!
//! The environment layer is non-negotiable: the appliance OS may be
//! read-only, so every runtime toggle must be settable without editing a
//! file. Built once at startup, validated, never mutated.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unparseable config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("invalid maintenance window {0:?} (expected HH:MM-HH:MM)")]
    Window(String),
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { key, reason: reason.into() }
}

/// Maintenance window in UTC wall-clock time; may cross midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl MaintenanceWindow {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let (start, end) =
            s.split_once('-').ok_or_else(|| ConfigError::Window(s.to_string()))?;
        let parse = |part: &str| {
            NaiveTime::parse_from_str(part.trim(), "%H:%M")
                .map_err(|_| ConfigError::Window(s.to_string()))
        };
        Ok(Self { start: parse(start)?, end: parse(end)? })
    }

    /// Whether `t` falls inside the window. A window whose end precedes its
    /// start wraps across midnight.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

impl Serialize for MaintenanceWindow {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!(
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        ))
    }
}

impl<'de> Deserialize<'de> for MaintenanceWindow {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        MaintenanceWindow::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Cadence intervals in seconds, each jittered ±`jitter_pct` per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Intervals {
    pub checkin_sec: u64,
    pub drift_scan_sec: u64,
    pub discovery_sec: u64,
    pub workstation_sec: u64,
    pub learning_sync_sec: u64,
    pub queue_drain_sec: u64,
    pub flap_gc_sec: u64,
    pub jitter_pct: f64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            checkin_sec: 60,
            drift_scan_sec: 300,
            discovery_sec: 3600,
            workstation_sec: 600,
            learning_sync_sec: 14_400,
            queue_drain_sec: 5,
            flap_gc_sec: 60,
            jitter_pct: 0.1,
        }
    }
}

impl Intervals {
    pub fn checkin(&self) -> Duration {
        Duration::from_secs(self.checkin_sec)
    }
    pub fn drift_scan(&self) -> Duration {
        Duration::from_secs(self.drift_scan_sec)
    }
    pub fn discovery(&self) -> Duration {
        Duration::from_secs(self.discovery_sec)
    }
    pub fn workstation(&self) -> Duration {
        Duration::from_secs(self.workstation_sec)
    }
    pub fn learning_sync(&self) -> Duration {
        Duration::from_secs(self.learning_sync_sec)
    }
    pub fn queue_drain(&self) -> Duration {
        Duration::from_secs(self.queue_drain_sec)
    }
    pub fn flap_gc(&self) -> Duration {
        Duration::from_secs(self.flap_gc_sec)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralCommandConfig {
    pub url: String,
    pub api_key_file: PathBuf,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    /// Pinned Ed25519 public key (hex) for order signature verification.
    #[serde(default)]
    pub server_public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct L2Config {
    pub daily_budget_usd: f64,
    pub max_calls_per_hour: u32,
    pub max_concurrent: u32,
    /// Planner endpoint; cloud or local model, the agent is agnostic.
    pub endpoint: Option<String>,
}

impl Default for L2Config {
    fn default() -> Self {
        Self { daily_budget_usd: 10.0, max_calls_per_hour: 60, max_concurrent: 3, endpoint: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failures_to_open: u32,
    pub open_duration_sec: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { failures_to_open: 5, open_duration_sec: 1800 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlapConfig {
    pub window_sec: u64,
    pub threshold: u32,
}

impl Default for FlapConfig {
    fn default() -> Self {
        Self { window_sec: 1800, threshold: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    pub enabled: bool,
    pub dry_run: bool,
    pub l2_enabled: bool,
    pub l2: L2Config,
    pub circuit: CircuitConfig,
    pub flap: FlapConfig,
    /// Global cooldown between attempts per (host, check); rules may
    /// override per rule.
    pub cooldown_sec: u64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: false,
            l2_enabled: false,
            l2: L2Config::default(),
            circuit: CircuitConfig::default(),
            flap: FlapConfig::default(),
            cooldown_sec: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcConfig {
    pub enabled: bool,
    pub port: u16,
    /// Health/readiness HTTP port served alongside the intake server.
    pub health_port: u16,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self { enabled: true, port: 50051, health_port: 8080 }
    }
}

/// Evidence extras (enterprise tier).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Submit bundle hashes to OpenTimestamps calendars after sealing.
    pub ots_enabled: bool,
    pub ots_calendars: Vec<String>,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            ots_enabled: false,
            ots_calendars: vec![
                "https://a.pool.opentimestamps.org".to_string(),
                "https://b.pool.opentimestamps.org".to_string(),
            ],
        }
    }
}

/// L3 escalation channel endpoints; a channel is enabled when its endpoint
/// is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub slack_webhook_url: Option<String>,
    pub pagerduty_routing_key: Option<String>,
    pub webhook_url: Option<String>,
    pub email_relay_url: Option<String>,
}

impl EscalationConfig {
    pub fn any_enabled(&self) -> bool {
        self.slack_webhook_url.is_some()
            || self.pagerduty_routing_key.is_some()
            || self.webhook_url.is_some()
            || self.email_relay_url.is_some()
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub site_id: String,
    pub host_id: String,
    pub central_command: CentralCommandConfig,
    #[serde(default)]
    pub intervals: Intervals,
    #[serde(default)]
    pub maintenance_window: Option<MaintenanceWindow>,
    #[serde(default)]
    pub healing: HealingConfig,
    pub rules_dir: PathBuf,
    pub signing_key_path: PathBuf,
    pub state_dir: PathBuf,
    #[serde(default)]
    pub grpc: GrpcConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
}

fn default_true() -> bool {
    true
}

impl AgentConfig {
    /// Load from a YAML file, then overlay process environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let mut config: AgentConfig = serde_yaml::from_str(&text)?;
        let env: HashMap<String, String> = std::env::vars().collect();
        config.apply_env(&env)?;
        Ok(config)
    }

    /// Overlay environment variables. Environment wins over the file.
    pub fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<(), ConfigError> {
        if let Some(dir) = env.get("STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(v) = env.get("HEALING_DRY_RUN") {
            self.healing.dry_run = parse_bool("HEALING_DRY_RUN", v)?;
        }
        if let Some(v) = env.get("HEALING_ENABLED") {
            self.healing.enabled = parse_bool("HEALING_ENABLED", v)?;
        }
        if let Some(url) = env.get("CENTRAL_COMMAND_URL") {
            self.central_command.url = url.clone();
        }
        if let Some(port) = env.get("GRPC_PORT") {
            self.grpc.port = port
                .parse()
                .map_err(|_| invalid("grpc.port", format!("not a port: {port:?}")))?;
        }
        Ok(())
    }

    /// Validate the merged configuration. Failure is fatal (exit code 1).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site_id.trim().is_empty() {
            return Err(invalid("site_id", "must be non-empty"));
        }
        if self.host_id.trim().is_empty() {
            return Err(invalid("host_id", "must be non-empty"));
        }
        if !(0.0..=0.5).contains(&self.intervals.jitter_pct) {
            return Err(invalid(
                "intervals.jitter_pct",
                format!("{} outside [0, 0.5]", self.intervals.jitter_pct),
            ));
        }
        if !self.signing_key_path.is_file() {
            return Err(invalid(
                "signing_key_path",
                format!("{} does not exist", self.signing_key_path.display()),
            ));
        }
        key_mode_at_most_0600(&self.signing_key_path)?;
        if !self.central_command.api_key_file.is_file() {
            return Err(invalid(
                "central_command.api_key_file",
                format!("{} does not exist", self.central_command.api_key_file.display()),
            ));
        }
        if !self.rules_dir.is_dir() {
            std::fs::create_dir_all(&self.rules_dir).map_err(|e| {
                invalid("rules_dir", format!("{} not creatable: {e}", self.rules_dir.display()))
            })?;
        }
        Ok(())
    }
}

fn parse_bool(key: &'static str, v: &str) -> Result<bool, ConfigError> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(key, format!("not a boolean: {other:?}"))),
    }
}

#[cfg(unix)]
fn key_mode_at_most_0600(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::MetadataExt;
    let mode = path
        .metadata()
        .map_err(|e| invalid("signing_key_path", format!("unreadable: {e}")))?
        .mode()
        & 0o777;
    if mode & 0o177 != 0 {
        return Err(invalid(
            "signing_key_path",
            format!("mode {mode:o} too permissive (want <= 0600)"),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn key_mode_at_most_0600(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
