// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dw-healer: the three-tier auto-healer.
//!
//! `handle_incident` is the single public entry point. Pre-checks run in a
//! fixed order (dry-run, maintenance window, cooldown, flap circuit,
//! breaker); then the ladder: L1 deterministic rules, L2 planner, L3 human
//! escalation. Incidents on the same `(host, check)` are serialized
//! through keyed locks; distinct resources heal in parallel under the
//! daemon's worker pool.

mod circuit;
mod cooldown;
mod flap;
mod l2;
mod l3;

pub use circuit::{CircuitBreaker, CircuitDecision};
pub use cooldown::CooldownTracker;
pub use flap::FlapTracker;
pub use l2::{BudgetDenied, BudgetTracker, HttpPlanner, Planner, PlannerContext, PlannerDecision, PlannerError};
pub use l3::{
    ChannelError, DeliveryLog, EmailRelayChannel, EscalationChannel, EscalationRouter,
    PagerDutyChannel, SlackChannel, Ticket, TicketSink, WebhookChannel,
};

use chrono::Duration as ChronoDuration;
use dw_core::{
    rfc3339_ms, Clock, DeferralReason, EscalationReason, HealingConfig, HealingResult, Incident,
    MaintenanceWindow, Outcome, PatternTable, RawState, ResolutionTier, StateDiff, Target,
};
use dw_exec::{Executor, ScriptOutput};
use dw_rules::{RuleAction, RunbookCatalog, SharedRules};
use dw_storage::{IncidentStore, OfflineQueue, QueueKind};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Per-call execution timeout for runbook phases.
const RUNBOOK_TIMEOUT: Duration = dw_exec::DEFAULT_TIMEOUT;
/// Recent-resolution context window for the planner.
const PLANNER_HISTORY_HOURS: i64 = 24;
const PLANNER_HISTORY_LIMIT: usize = 10;
/// Planner decisions below this confidence escalate.
const MIN_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Error)]
pub enum HealerError {
    /// Store failures include invariant-class transition violations; the
    /// daemon turns those into a forced shutdown.
    #[error(transparent)]
    Store(#[from] dw_storage::StoreError),
}

/// Resolves a host id to its current target. The scheduler owns the target
/// set; the healer only looks up.
pub trait TargetLookup: Send + Sync {
    fn get(&self, host_id: &str) -> Option<Target>;
}

/// Fixed map lookup, for tests and simple wiring.
pub struct StaticTargets(pub HashMap<String, Target>);

impl TargetLookup for StaticTargets {
    fn get(&self, host_id: &str) -> Option<Target> {
        self.0.get(host_id).cloned()
    }
}

/// Transport-appropriate executors.
pub struct ExecutorSet {
    pub winrm: Arc<dyn Executor>,
    pub ssh: Arc<dyn Executor>,
    pub local: Arc<dyn Executor>,
}

impl ExecutorSet {
    fn for_target(&self, target: &Target) -> &Arc<dyn Executor> {
        match target.transport {
            dw_core::Transport::Winrm => &self.winrm,
            dw_core::Transport::Ssh => &self.ssh,
            dw_core::Transport::Local => &self.local,
        }
    }
}

/// Everything the healer collaborates with; constructed in main and passed
/// in (no ambient globals).
pub struct HealerDeps {
    pub store: Arc<IncidentStore>,
    pub rules: SharedRules,
    pub catalog: RunbookCatalog,
    pub targets: Arc<dyn TargetLookup>,
    pub executors: ExecutorSet,
    pub patterns: PatternTable,
    pub queue: Arc<OfflineQueue>,
    pub router: EscalationRouter,
    pub planner: Option<Arc<dyn Planner>>,
}

/// Keyed async locks serializing per-resource healing.
#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let slot = {
            let mut inner = self.inner.lock();
            Arc::clone(inner.entry(key.to_string()).or_default())
        };
        slot.lock_owned().await
    }
}

/// One executed remediation attempt (any tier).
struct Attempt {
    action: String,
    runbook_id: Option<String>,
    success: bool,
    output: String,
    error: Option<String>,
}

impl Attempt {
    fn as_json(&self, tier: &str) -> Value {
        json!({
            "tier": tier,
            "action": self.action,
            "runbook_id": self.runbook_id,
            "success": self.success,
            "output": self.output,
            "error": self.error,
        })
    }
}

enum L1Outcome {
    Executed(Attempt),
    EscalateDirected,
    NoMatch,
}

pub struct AutoHealer<C: Clock> {
    config: HealingConfig,
    window: Option<MaintenanceWindow>,
    clock: C,
    deps: HealerDeps,
    cooldowns: CooldownTracker,
    flaps: FlapTracker,
    breaker: CircuitBreaker,
    budget: BudgetTracker,
    locks: KeyedLocks,
}

impl<C: Clock> AutoHealer<C> {
    pub fn new(
        config: HealingConfig,
        window: Option<MaintenanceWindow>,
        deps: HealerDeps,
        clock: C,
    ) -> Self {
        let cooldowns =
            CooldownTracker::new(Duration::from_secs(config.cooldown_sec), HashMap::new());
        let flaps =
            FlapTracker::new(Duration::from_secs(config.flap.window_sec), config.flap.threshold);
        let breaker = CircuitBreaker::new(
            config.circuit.failures_to_open,
            Duration::from_secs(config.circuit.open_duration_sec),
        );
        let budget = BudgetTracker::new(config.l2.clone());
        Self {
            config,
            window,
            clock,
            deps,
            cooldowns,
            flaps,
            breaker,
            budget,
            locks: KeyedLocks::default(),
        }
    }

    /// Expire flap records past the window (driven by the flap-GC tick).
    pub fn flap_gc(&self) {
        self.flaps.gc(self.clock.now());
    }

    /// Resolve one incident through the ladder. The single entry point;
    /// there is deliberately no `heal` alias.
    pub async fn handle_incident(&self, incident: &Incident) -> Result<HealingResult, HealerError> {
        let key = format!("{}:{}", incident.host_id, incident.check_type);
        let _resource_guard = self.locks.acquire(&key).await;
        let started = self.clock.now();
        let now = rfc3339_ms(self.clock.now_utc());

        if !self.config.enabled {
            tracing::info!(incident_id = %incident.id, "healing disabled, incident left open");
            return Ok(HealingResult::deferred(incident.id, DeferralReason::Disabled));
        }

        let rules = self.deps.rules.snapshot();
        let first_match = rules.first_match(incident);
        let candidate_runbook = first_match
            .and_then(|r| r.action.runbook_id().map(str::to_string))
            .or_else(|| incident.recommended_action.clone());

        // 1. Dry-run gate: log the plan, record a synthetic L1 failure,
        //    never touch an executor. The flag is visible on every result
        //    and every bundle built from it.
        if self.config.dry_run {
            let planned = candidate_runbook.clone().unwrap_or_else(|| "none".to_string());
            tracing::info!(
                incident_id = %incident.id,
                check = %incident.check_type,
                planned_runbook = %planned,
                "dry-run: skipping remediation"
            );
            self.deps.store.mark_resolving(incident.id, now.clone())?;
            self.deps.store.set_resolution(
                incident.id,
                ResolutionTier::L1,
                Outcome::Failure,
                candidate_runbook.clone(),
                now.clone(),
                None,
                Some("dry_run".to_string()),
            )?;
            self.record_terminal(incident, false, started, &now);
            return Ok(HealingResult {
                incident_id: incident.id,
                tier: Some(ResolutionTier::L1),
                action: Some(planned),
                success: false,
                duration_ms: elapsed_ms(started, &self.clock),
                output: None,
                error: Some("dry_run".to_string()),
                deferral: None,
                escalation_reason: None,
                dry_run: true,
            });
        }

        // 2. Maintenance-window gate: disruptive work waits for the window.
        if let (Some(runbook), Some(window)) = (&candidate_runbook, &self.window) {
            if self.deps.catalog.is_disruptive(runbook)
                && !window.contains(self.clock.now_utc().time())
            {
                tracing::info!(incident_id = %incident.id, runbook = %runbook, "deferred to maintenance window");
                return Ok(HealingResult::deferred(
                    incident.id,
                    DeferralReason::MaintenanceWindow,
                ));
            }
        }

        // 3. Cooldown: rule override > type default > global.
        let rule_cooldown = first_match
            .and_then(|r| r.cooldown_sec)
            .map(Duration::from_secs);
        let cooldown = self.cooldowns.effective(&incident.check_type, rule_cooldown);
        if !self.cooldowns.allows(&key, cooldown, started) {
            return Ok(HealingResult::deferred(incident.id, DeferralReason::Cooldown));
        }

        // 4. Flap circuit: repeated resolve→recur skips straight to L3.
        if self.flaps.note_incident(&incident.pattern_signature, started) {
            return self
                .escalate(incident, Vec::new(), None, EscalationReason::FlapDetected, started)
                .await;
        }

        // 5. Global breaker per incident type.
        match self.breaker.check(&key, started) {
            CircuitDecision::Open => {
                return self
                    .escalate(incident, Vec::new(), None, EscalationReason::CircuitOpen, started)
                    .await;
            }
            CircuitDecision::Proceed | CircuitDecision::HalfOpenProbe => {}
        }

        self.deps.store.mark_resolving(incident.id, now.clone())?;

        // L1: deterministic engine.
        let mut attempts: Vec<Value> = Vec::new();
        match self.run_l1(incident, &rules, &key, started).await {
            L1Outcome::Executed(attempt) if attempt.success => {
                self.breaker.record(&key, true, self.clock.now());
                return self.finish(incident, ResolutionTier::L1, attempt, started).await;
            }
            L1Outcome::Executed(attempt) => {
                self.breaker.record(&key, false, self.clock.now());
                attempts.push(attempt.as_json("L1"));
                self.try_l2(incident, &key, attempts, EscalationReason::RemediationFailed, started)
                    .await
            }
            L1Outcome::EscalateDirected => {
                self.escalate(incident, attempts, None, EscalationReason::RuleDirected, started)
                    .await
            }
            L1Outcome::NoMatch => {
                self.try_l2(incident, &key, attempts, EscalationReason::NoMatchingRule, started)
                    .await
            }
        }
    }

    /// Walk matching rules in priority order. An unknown or unloadable
    /// runbook is an execution error, not an escalation: it is logged and
    /// the next rule is tried.
    async fn run_l1(
        &self,
        incident: &Incident,
        rules: &dw_rules::RuleSet,
        key: &str,
        started: Instant,
    ) -> L1Outcome {
        for rule in rules.matches(incident) {
            match &rule.action {
                RuleAction::Noop => {
                    tracing::debug!(rule = %rule.id, "noop rule matched");
                    return L1Outcome::Executed(Attempt {
                        action: "noop".into(),
                        runbook_id: None,
                        success: true,
                        output: String::new(),
                        error: None,
                    });
                }
                RuleAction::Escalate => return L1Outcome::EscalateDirected,
                RuleAction::RunLocalScript { script } => {
                    self.cooldowns.touch(key, started);
                    let output = self
                        .run_on_self(script)
                        .await
                        .unwrap_or_else(|e| ScriptOutput::failed(-1, e));
                    let success = output.succeeded();
                    return L1Outcome::Executed(Attempt {
                        action: "run_local_script".into(),
                        runbook_id: None,
                        success,
                        output: output.stdout,
                        error: (!success).then_some(output.stderr),
                    });
                }
                RuleAction::RunWindowsRunbook { runbook }
                | RuleAction::RunLinuxRunbook { runbook } => {
                    let Some(book) = self.deps.catalog.get(runbook) else {
                        tracing::error!(rule = %rule.id, runbook = %runbook, "runbook missing or not enabled, trying next rule");
                        continue;
                    };
                    self.cooldowns.touch(key, started);
                    let attempt =
                        self.execute_runbook(incident, &book, &HashMap::new()).await;
                    return L1Outcome::Executed(attempt);
                }
            }
        }
        L1Outcome::NoMatch
    }

    /// L2: planner-driven remediation, budget permitting.
    async fn try_l2(
        &self,
        incident: &Incident,
        key: &str,
        mut attempts: Vec<Value>,
        fallback_reason: EscalationReason,
        started: Instant,
    ) -> Result<HealingResult, HealerError> {
        let planner = match (&self.deps.planner, self.config.l2_enabled) {
            (Some(planner), true) => planner,
            _ => return self.escalate(incident, attempts, None, fallback_reason, started).await,
        };
        let _permit = match self.budget.try_begin(self.clock.epoch_ms()) {
            Ok(permit) => permit,
            Err(denied) => {
                tracing::warn!(incident_id = %incident.id, ?denied, "l2 budget denied");
                return self
                    .escalate(
                        incident,
                        attempts,
                        None,
                        EscalationReason::L2BudgetExhausted,
                        started,
                    )
                    .await;
            }
        };

        let mut context = self.planner_context(incident, false);
        let decision = match planner.plan(&context).await {
            Ok(decision) => decision,
            Err(PlannerError::Parse(first)) => {
                tracing::warn!(error = %first, "planner output undecodable, retrying strict");
                context.strict = true;
                match planner.plan(&context).await {
                    Ok(decision) => decision,
                    Err(e) => {
                        return self
                            .escalate(
                                incident,
                                attempts,
                                Some(e.to_string()),
                                EscalationReason::L2ParseFailure,
                                started,
                            )
                            .await;
                    }
                }
            }
            Err(PlannerError::Transport(e)) => {
                return self
                    .escalate(
                        incident,
                        attempts,
                        Some(e),
                        EscalationReason::L2ParseFailure,
                        started,
                    )
                    .await;
            }
        };

        if decision.escalate {
            return self
                .escalate(
                    incident,
                    attempts,
                    Some(decision.reasoning),
                    EscalationReason::L2RequestedEscalation,
                    started,
                )
                .await;
        }
        if decision.confidence < MIN_CONFIDENCE {
            return self
                .escalate(
                    incident,
                    attempts,
                    Some(decision.reasoning),
                    EscalationReason::L2LowConfidence,
                    started,
                )
                .await;
        }
        let Some(runbook_id) = &decision.runbook_id else {
            return self
                .escalate(
                    incident,
                    attempts,
                    Some(decision.reasoning),
                    EscalationReason::L2ParseFailure,
                    started,
                )
                .await;
        };
        let Some(book) = self.deps.catalog.get(runbook_id) else {
            return self
                .escalate(
                    incident,
                    attempts,
                    Some(decision.reasoning),
                    EscalationReason::L2RequestedEscalation,
                    started,
                )
                .await;
        };

        self.cooldowns.touch(key, self.clock.now());
        let attempt = self.execute_runbook(incident, &book, &decision.parameters).await;
        if attempt.success {
            self.breaker.record(key, true, self.clock.now());
            self.finish(incident, ResolutionTier::L2, attempt, started).await
        } else {
            self.breaker.record(key, false, self.clock.now());
            attempts.push(attempt.as_json("L2"));
            self.escalate(
                incident,
                attempts,
                Some(decision.reasoning),
                EscalationReason::RemediationFailed,
                started,
            )
            .await
        }
    }

    fn planner_context(&self, incident: &Incident, strict: bool) -> PlannerContext {
        let since = self.clock.now_utc() - ChronoDuration::hours(PLANNER_HISTORY_HOURS);
        let mut recent: Vec<Value> = self
            .deps
            .store
            .query_signature(&incident.pattern_signature, since)
            .into_iter()
            .rev()
            .take(PLANNER_HISTORY_LIMIT)
            .map(|i| {
                json!({
                    "tier": i.tier.map(|t| t.to_string()),
                    "outcome": i.outcome.map(|o| o.to_string()),
                    "runbook_id": i.runbook_id,
                    "resolved_at": i.resolved_at,
                })
            })
            .collect();
        recent.truncate(PLANNER_HISTORY_LIMIT);
        PlannerContext {
            incident: incident.clone(),
            recent_resolutions: recent,
            available_runbooks: self.deps.catalog.known_ids(),
            maintenance_window: self.window.map(|w| {
                format!("{}-{}", w.start.format("%H:%M"), w.end.format("%H:%M"))
            }),
            dry_run: self.config.dry_run,
            strict,
        }
    }

    /// Run remediate, then verify; success requires both to exit zero.
    async fn execute_runbook(
        &self,
        incident: &Incident,
        book: &dw_rules::Runbook,
        extra_params: &HashMap<String, String>,
    ) -> Attempt {
        let Some(target) = self.deps.targets.get(&incident.host_id) else {
            return Attempt {
                action: "run_runbook".into(),
                runbook_id: Some(book.id.clone()),
                success: false,
                output: String::new(),
                error: Some(format!("no current target for host {}", incident.host_id)),
            };
        };
        let mut params = extra_params.clone();
        params.insert("Hostname".to_string(), incident.host_id.clone());
        params.insert("CheckType".to_string(), incident.check_type.clone());
        params.insert("IncidentId".to_string(), incident.id.to_string());

        let executor = self.deps.executors.for_target(&target);
        let remediate = match executor
            .run_script(&target, &book.remediate, &params, RUNBOOK_TIMEOUT)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return Attempt {
                    action: "run_runbook".into(),
                    runbook_id: Some(book.id.clone()),
                    success: false,
                    output: String::new(),
                    error: Some(e.to_string()),
                };
            }
        };
        if !remediate.succeeded() {
            return Attempt {
                action: "run_runbook".into(),
                runbook_id: Some(book.id.clone()),
                success: false,
                output: remediate.stdout,
                error: Some(format!("remediate exit {}: {}", remediate.exit_code, remediate.stderr)),
            };
        }

        let verify = match executor
            .run_script(&target, &book.verify, &params, RUNBOOK_TIMEOUT)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return Attempt {
                    action: "run_runbook".into(),
                    runbook_id: Some(book.id.clone()),
                    success: false,
                    output: remediate.stdout,
                    error: Some(format!("verify failed to run: {e}")),
                };
            }
        };
        let success = verify.succeeded();
        Attempt {
            action: "run_runbook".into(),
            runbook_id: Some(book.id.clone()),
            success,
            output: format!("{}\n{}", remediate.stdout, verify.stdout),
            error: (!success)
                .then(|| format!("verify exit {}: {}", verify.exit_code, verify.stderr)),
        }
    }

    async fn run_on_self(&self, script: &str) -> Result<ScriptOutput, String> {
        let target = Target::local_self("self");
        self.deps
            .executors
            .local
            .run_script(&target, script, &HashMap::new(), RUNBOOK_TIMEOUT)
            .await
            .map_err(|e| e.to_string())
    }

    /// Record a successful (or failed-but-terminal) tiered resolution.
    async fn finish(
        &self,
        incident: &Incident,
        tier: ResolutionTier,
        attempt: Attempt,
        started: Instant,
    ) -> Result<HealingResult, HealerError> {
        let now = rfc3339_ms(self.clock.now_utc());
        let outcome = if attempt.success { Outcome::Success } else { Outcome::Failure };
        self.deps.store.set_resolution(
            incident.id,
            tier,
            outcome,
            attempt.runbook_id.clone(),
            now.clone(),
            Some(attempt.output.clone()),
            attempt.error.clone(),
        )?;
        if attempt.success {
            self.flaps.note_resolved(&incident.pattern_signature, self.clock.now());
        }
        self.record_terminal(incident, attempt.success, started, &now);
        self.emit_telemetry(incident, Some(tier), &attempt, elapsed_ms(started, &self.clock), &now)
            .await;
        tracing::info!(
            incident_id = %incident.id,
            tier = %tier,
            success = attempt.success,
            runbook = attempt.runbook_id.as_deref().unwrap_or("-"),
            "healing finished"
        );
        Ok(HealingResult {
            incident_id: incident.id,
            tier: Some(tier),
            action: Some(attempt.action),
            success: attempt.success,
            duration_ms: elapsed_ms(started, &self.clock),
            output: Some(attempt.output),
            error: attempt.error,
            deferral: None,
            escalation_reason: None,
            dry_run: false,
        })
    }

    /// Route to L3: ticket out, incident escalated.
    async fn escalate(
        &self,
        incident: &Incident,
        attempts: Vec<Value>,
        l2_reasoning: Option<String>,
        reason: EscalationReason,
        started: Instant,
    ) -> Result<HealingResult, HealerError> {
        let now = rfc3339_ms(self.clock.now_utc());
        let ticket = self.deps.router.build_ticket(
            incident,
            attempts.clone(),
            l2_reasoning,
            reason,
            now.clone(),
        );
        let delivery = self.deps.router.escalate(&ticket).await;
        if delivery.delivered.is_empty() && !delivery.stored_centrally && !delivery.queued {
            tracing::error!(
                incident_id = %incident.id,
                failures = ?delivery.failed,
                "escalation delivered nowhere"
            );
        }
        self.deps.store.mark_resolving(incident.id, now.clone())?;
        self.deps.store.set_resolution(
            incident.id,
            ResolutionTier::L3,
            Outcome::Failure,
            None,
            now.clone(),
            None,
            Some(reason.to_string()),
        )?;
        self.record_terminal(incident, false, started, &now);
        let attempt = Attempt {
            action: "escalate".into(),
            runbook_id: None,
            success: false,
            output: String::new(),
            error: Some(reason.to_string()),
        };
        self.emit_telemetry(
            incident,
            Some(ResolutionTier::L3),
            &attempt,
            elapsed_ms(started, &self.clock),
            &now,
        )
        .await;
        Ok(HealingResult {
            incident_id: incident.id,
            tier: Some(ResolutionTier::L3),
            action: Some("escalate".into()),
            success: false,
            duration_ms: elapsed_ms(started, &self.clock),
            output: None,
            error: None,
            deferral: None,
            escalation_reason: Some(reason),
            dry_run: false,
        })
    }

    fn record_terminal(&self, incident: &Incident, success: bool, started: Instant, now: &str) {
        self.deps.patterns.record(
            &incident.pattern_signature,
            &incident.check_type,
            success,
            elapsed_ms(started, &self.clock),
            now.to_string(),
        );
    }

    /// Execution telemetry rides the offline queue; the sender owns
    /// delivery. Subject to the queue's bounded backpressure wait.
    async fn emit_telemetry(
        &self,
        incident: &Incident,
        tier: Option<ResolutionTier>,
        attempt: &Attempt,
        duration_ms: u64,
        now: &str,
    ) {
        let post_state: RawState = if attempt.success {
            let mut post = incident.raw_state.clone();
            post.insert("status".into(), json!("pass"));
            post.insert("verified".into(), json!(true));
            post
        } else {
            incident.raw_state.clone()
        };
        let diff = StateDiff::between(&incident.raw_state, &post_state);
        let payload = json!({
            "incident_id": incident.id.to_string(),
            "site_id": incident.site_id,
            "host_id": incident.host_id,
            "check_type": incident.check_type,
            "tier": tier.map(|t| t.to_string()),
            "runbook_id": attempt.runbook_id,
            "success": attempt.success,
            "duration_ms": duration_ms,
            "pattern_signature": incident.pattern_signature,
            "state_diff": serde_json::to_value(&diff).unwrap_or(Value::Null),
        });
        match self.deps.queue.enqueue(QueueKind::Execution, payload, now.to_string()).await {
            Ok(dw_storage::EnqueueOutcome::Enqueued(_)) => {}
            Ok(dw_storage::EnqueueOutcome::Dropped) => {
                tracing::warn!(incident_id = %incident.id, "execution telemetry dropped at queue cap");
            }
            Err(e) => tracing::warn!(error = %e, "execution telemetry enqueue failed"),
        }
    }
}

fn elapsed_ms<C: Clock>(started: Instant, clock: &C) -> u64 {
    clock.now().duration_since(started).as_millis() as u64
}

#[cfg(test)]
#[path = "healer_tests.rs"]
mod tests;
