// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drift scan: detectors over the target snapshot, incidents into the
//! store, healer dispatch, evidence per terminal result.

use crate::lifecycle::Agent;
use dw_core::{
    Clock, DeferralReason, DriftResult, HealingResult, Incident, Platform, RawState,
    ResolutionTier, Target,
};
use dw_evidence::{BundleInput, BundleOutcome};
use serde_json::json;
use std::sync::Arc;

/// One full drift scan over the current target snapshot plus the
/// appliance itself. Healings on distinct resources run in parallel up to
/// the worker-pool limit; the per-resource serialization lives inside the
/// healer.
pub async fn drift_scan(agent: &Arc<Agent>) {
    let mut targets = agent.targets.snapshot();
    targets.push(Target::local_self(&agent.config.host_id));
    tracing::info!(targets = targets.len(), "drift scan started");

    let mut joins = tokio::task::JoinSet::new();
    for target in targets {
        let agent = Arc::clone(agent);
        let permit = Arc::clone(&agent.scan_pool).acquire_owned().await;
        let Ok(permit) = permit else { break };
        joins.spawn(async move {
            let _permit = permit;
            scan_target(&agent, &target).await;
        });
    }
    while let Some(result) = joins.join_next().await {
        if let Err(e) = result {
            tracing::warn!(error = %e, "scan task aborted");
        }
    }
    tracing::info!("drift scan finished");
}

async fn scan_target(agent: &Arc<Agent>, target: &Target) {
    let detector = match target.platform {
        Platform::Windows => &agent.detectors.windows,
        Platform::Linux => &agent.detectors.linux,
        Platform::NixosSelf => &agent.detectors.selfhost,
    };
    let results = match detector.run(target).await {
        Ok(results) => results,
        Err(e) => {
            tracing::warn!(target = %target.id, error = %e, "detector failed");
            return;
        }
    };
    for result in results {
        process_drift_result(agent, result).await;
    }
}

/// Route one check result: non-drifted seals a no-drift bundle; drifted
/// becomes an incident and runs the healer ladder. Intake-pushed events
/// come through here too.
pub async fn process_drift_result(agent: &Arc<Agent>, result: DriftResult) {
    if !result.is_consistent() {
        tracing::error!(check = %result.check_id, "inconsistent drift result dropped");
        return;
    }
    if !result.drifted {
        seal_bundle(
            agent,
            BundleInput::no_drift(result.check_id.clone(), result.target_id.clone()),
        );
        return;
    }

    let now = dw_core::rfc3339_ms(agent.clock.now_utc());
    let incident = Incident::from_drift(&result, &agent.config.site_id, now);
    if let Err(e) = agent.store.record(&incident) {
        tracing::error!(error = %e, "incident record failed");
        return;
    }
    tracing::info!(
        incident_id = %incident.id,
        host = %incident.host_id,
        check = %incident.check_type,
        severity = %incident.severity,
        "incident created"
    );
    heal_and_record(agent, incident).await;
}

/// Run the healer on one incident and seal evidence for terminal results.
pub async fn heal_and_record(agent: &Arc<Agent>, incident: Incident) {
    match agent.healer.handle_incident(&incident).await {
        Ok(result) if result.is_deferred() => match result.deferral {
            Some(DeferralReason::MaintenanceWindow) => {
                tracing::info!(incident_id = %incident.id, "parked for maintenance window");
                agent.deferred.lock().push(incident);
            }
            other => {
                tracing::debug!(incident_id = %incident.id, ?other, "healing deferred");
            }
        },
        Ok(result) => {
            let input = bundle_input_for(agent, &incident, &result);
            seal_bundle(agent, input);
        }
        Err(e) => {
            // Store invariant violations force a shutdown with a distinct
            // exit code; crash recovery repairs on the next boot.
            tracing::error!(incident_id = %incident.id, error = %e, "healer invariant violation");
            agent.fatal_invariant();
        }
    }
}

/// Drain incidents parked for the maintenance window once it opens.
pub async fn drain_deferred(agent: &Arc<Agent>) {
    let Some(window) = agent.config.maintenance_window else { return };
    if !window.contains(agent.clock.now_utc().time()) {
        return;
    }
    let parked: Vec<Incident> = std::mem::take(&mut *agent.deferred.lock());
    if parked.is_empty() {
        return;
    }
    tracing::info!(count = parked.len(), "maintenance window open, draining deferred incidents");
    for incident in parked {
        heal_and_record(agent, incident).await;
    }
}

fn bundle_input_for(agent: &Arc<Agent>, incident: &Incident, result: &HealingResult) -> BundleInput {
    let outcome = if result.dry_run {
        if result.action.as_deref().unwrap_or("none") == "none" {
            BundleOutcome::DryRunSuccess
        } else {
            BundleOutcome::DryRunPlan
        }
    } else if result.success {
        BundleOutcome::Success
    } else if result.tier == Some(ResolutionTier::L3) {
        BundleOutcome::Escalated
    } else {
        BundleOutcome::Failure
    };

    let framework_controls = agent
        .rules
        .snapshot()
        .first_match(incident)
        .map(|rule| rule.framework_controls.clone())
        .unwrap_or_default();

    let post_state: RawState = if result.success {
        let mut post = incident.raw_state.clone();
        post.insert("status".into(), json!("pass"));
        post.insert("verified".into(), json!(true));
        post
    } else {
        incident.raw_state.clone()
    };

    let mut actions = Vec::new();
    if let Some(action) = &result.action {
        actions.push(action.clone());
    }

    BundleInput {
        host_id: incident.host_id.clone(),
        check_id: incident.check_type.clone(),
        outcome,
        framework_controls,
        pre_state: incident.raw_state.clone(),
        post_state,
        actions_taken: actions,
        healing_tier: result.tier,
        dry_run: result.dry_run,
    }
}

fn seal_bundle(agent: &Arc<Agent>, input: BundleInput) {
    let now = agent.clock.now_utc();
    match agent.pipeline.seal(input, now) {
        Ok(bundle) => {
            tracing::debug!(bundle_id = %bundle.bundle_id, host = %bundle.host_id, "bundle sealed");
            if let Some(anchor) = &agent.anchor {
                let anchor = std::sync::Arc::clone(anchor);
                let store = std::sync::Arc::clone(&agent.bundle_store);
                tokio::spawn(async move {
                    if let Err(e) =
                        anchor.submit(&store, &bundle.bundle_id, &bundle.bundle_hash).await
                    {
                        tracing::warn!(error = %e, "ots submit failed");
                    }
                });
            }
        }
        Err(dw_evidence::EvidenceError::Crypto(e)) => {
            tracing::error!(error = %e, "evidence crypto failure");
            agent.fatal_crypto();
        }
        Err(e) => {
            tracing::error!(error = %e, "bundle seal failed");
        }
    }
}
