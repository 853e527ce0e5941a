// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dwd: the Driftwarden compliance appliance agent.
//!
//! Exit codes: 0 normal shutdown, 1 fatal config error, 2 fatal crypto
//! error, 64+ internal invariant violations.

use dw_core::AgentConfig;
use dw_daemon::{lifecycle::FatalError, scheduler, Agent};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "/etc/driftwarden/config.yaml";
const INTAKE_CHANNEL_CAPACITY: usize = 256;

fn main() -> ExitCode {
    init_tracing();

    let config_path = std::env::var("DW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, path = %config_path.display(), "fatal config error");
            return ExitCode::from(1);
        }
    };

    let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(4);
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "runtime build failed");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(config: AgentConfig) -> Result<u8, FatalError> {
    let (agent, drift_rx) = Agent::start(config, INTAKE_CHANNEL_CAPACITY)?;

    // A single shutdown signal propagates through cancellation tokens
    let signal_cancel = agent.cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "sigterm handler unavailable");
                let _ = ctrl_c.await;
                signal_cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
        tracing::info!("shutdown signal received");
        signal_cancel.cancel();
    });

    scheduler::run(agent.clone(), drift_rx).await;
    let code = agent.exit_code();
    tracing::info!(exit_code = code, "agent stopped");
    Ok(code)
}

fn load_config(path: &std::path::Path) -> Result<AgentConfig, dw_core::ConfigError> {
    let config = AgentConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Structured JSON lines to stdout; `LOG_LEVEL` maps onto the env filter.
fn init_tracing() {
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| level.parse::<EnvFilter>().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .init();
}
