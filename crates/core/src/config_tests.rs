// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::NaiveTime;
use std::io::Write;

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

#[yare::parameterized(
    inside = { "02:00-04:00", 3, 0, true },
    before = { "02:00-04:00", 1, 59, false },
    at_start = { "02:00-04:00", 2, 0, true },
    at_end_exclusive = { "02:00-04:00", 4, 0, false },
    wrap_late = { "23:00-01:00", 23, 30, true },
    wrap_early = { "23:00-01:00", 0, 30, true },
    wrap_outside = { "23:00-01:00", 12, 0, false },
)]
fn maintenance_window_contains(spec: &str, h: u32, m: u32, expected: bool) {
    let window = MaintenanceWindow::parse(spec).unwrap();
    assert_eq!(window.contains(t(h, m)), expected, "{spec} at {h}:{m:02}");
}

#[yare::parameterized(
    missing_dash = { "0200-0400" },
    not_a_time = { "aa:bb-cc:dd" },
    empty = { "" },
)]
fn maintenance_window_rejects_bad_input(spec: &str) {
    assert!(MaintenanceWindow::parse(spec).is_err());
}

fn minimal_yaml(dir: &std::path::Path) -> String {
    let key = dir.join("signing.key");
    std::fs::write(&key, [0u8; 32]).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o600)).unwrap();
    }
    let token = dir.join("api.key");
    let mut f = std::fs::File::create(&token).unwrap();
    writeln!(f, "test-token").unwrap();
    format!(
        r#"
site_id: clinic-042
host_id: appliance-01
central_command:
  url: https://command.example
  api_key_file: {token}
rules_dir: {rules}
signing_key_path: {key}
state_dir: {state}
"#,
        token = token.display(),
        rules = dir.join("rules").display(),
        key = key.display(),
        state = dir.join("state").display(),
    )
}

#[test]
fn defaults_match_specified_values() {
    let dir = tempfile::tempdir().unwrap();
    let config: AgentConfig = serde_yaml::from_str(&minimal_yaml(dir.path())).unwrap();
    assert_eq!(config.intervals.checkin_sec, 60);
    assert_eq!(config.intervals.drift_scan_sec, 300);
    assert_eq!(config.intervals.learning_sync_sec, 14_400);
    assert!((config.intervals.jitter_pct - 0.1).abs() < f64::EPSILON);
    assert!(config.healing.enabled);
    assert!(!config.healing.dry_run);
    assert!(!config.healing.l2_enabled);
    assert!((config.healing.l2.daily_budget_usd - 10.0).abs() < f64::EPSILON);
    assert_eq!(config.healing.circuit.failures_to_open, 5);
    assert_eq!(config.healing.flap.threshold, 5);
    assert_eq!(config.healing.cooldown_sec, 300);
    assert!(config.central_command.verify_tls);
    assert!(config.grpc.enabled);
    assert_eq!(config.grpc.port, 50051);
}

#[test]
fn validate_accepts_minimal_config_and_creates_rules_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config: AgentConfig = serde_yaml::from_str(&minimal_yaml(dir.path())).unwrap();
    config.validate().unwrap();
    assert!(dir.path().join("rules").is_dir());
}

#[test]
fn validate_rejects_empty_site_id() {
    let dir = tempfile::tempdir().unwrap();
    let mut config: AgentConfig = serde_yaml::from_str(&minimal_yaml(dir.path())).unwrap();
    config.site_id = "  ".into();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid { key: "site_id", .. })));
}

#[test]
fn validate_rejects_out_of_range_jitter() {
    let dir = tempfile::tempdir().unwrap();
    let mut config: AgentConfig = serde_yaml::from_str(&minimal_yaml(dir.path())).unwrap();
    config.intervals.jitter_pct = 0.75;
    assert!(config.validate().is_err());
}

#[cfg(unix)]
#[test]
fn validate_rejects_world_readable_signing_key() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempfile::tempdir().unwrap();
    let config: AgentConfig = serde_yaml::from_str(&minimal_yaml(dir.path())).unwrap();
    std::fs::set_permissions(
        &config.signing_key_path,
        std::fs::Permissions::from_mode(0o644),
    )
    .unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn env_overrides_win_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut config: AgentConfig = serde_yaml::from_str(&minimal_yaml(dir.path())).unwrap();
    let env: std::collections::HashMap<String, String> = [
        ("STATE_DIR".to_string(), "/run/dw".to_string()),
        ("HEALING_DRY_RUN".to_string(), "true".to_string()),
        ("GRPC_PORT".to_string(), "50099".to_string()),
    ]
    .into_iter()
    .collect();
    config.apply_env(&env).unwrap();
    assert_eq!(config.state_dir, std::path::PathBuf::from("/run/dw"));
    assert!(config.healing.dry_run);
    assert_eq!(config.grpc.port, 50099);
}

#[test]
fn env_rejects_malformed_boolean() {
    let dir = tempfile::tempdir().unwrap();
    let mut config: AgentConfig = serde_yaml::from_str(&minimal_yaml(dir.path())).unwrap();
    let env: std::collections::HashMap<String, String> =
        [("HEALING_DRY_RUN".to_string(), "maybe".to_string())].into_iter().collect();
    assert!(config.apply_env(&env).is_err());
}

#[test]
fn maintenance_window_roundtrips_through_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!("{}maintenance_window: 23:30-02:00\n", minimal_yaml(dir.path()));
    let config: AgentConfig = serde_yaml::from_str(&yaml).unwrap();
    let window = config.maintenance_window.unwrap();
    assert!(window.contains(t(23, 45)));
    assert!(window.contains(t(1, 0)));
    assert!(!window.contains(t(3, 0)));
}
