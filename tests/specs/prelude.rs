// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture: a fully wired pipeline (store, queue, evidence, rules,
//! runbooks, healer) over fake executors and a recording escalation
//! channel; everything real except the network and the remote hosts.

use dw_core::test_support::firewall_drift;
use dw_core::{
    FakeClock, HealingConfig, HealingResult, Incident, PatternTable, Platform, Target,
    Transport,
};
use dw_evidence::{BundleInput, BundleOutcome, BundleStore, EvidencePipeline, Signer};
use dw_exec::FakeExecutor;
use dw_healer::{
    AutoHealer, EscalationChannel, EscalationRouter, ExecutorSet, HealerDeps, StaticTargets,
    Ticket,
};
use dw_rules::{builtin_rules, parse_rule_documents, Runbook, RunbookCatalog, RuleOrigin, RuleSet, SharedRules};
use dw_storage::{IncidentStore, OfflineQueue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub use dw_core::{Clock, ResolutionTier};

pub struct Harness {
    pub clock: FakeClock,
    pub exec: FakeExecutor,
    pub store: Arc<IncidentStore>,
    pub queue: Arc<OfflineQueue>,
    pub pipeline: Arc<EvidencePipeline>,
    pub healer: AutoHealer<FakeClock>,
    pub rules: SharedRules,
    pub patterns: PatternTable,
    pub tickets: Arc<Mutex<Vec<Ticket>>>,
    pub dir: tempfile::TempDir,
}

struct RecordingChannel(Arc<Mutex<Vec<Ticket>>>);

#[async_trait::async_trait]
impl EscalationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, ticket: &Ticket) -> Result<(), dw_healer::ChannelError> {
        self.0.lock().push(ticket.clone());
        Ok(())
    }
}

pub fn harness() -> Harness {
    harness_with(HealingConfig { cooldown_sec: 0, ..HealingConfig::default() })
}

pub fn harness_with(config: HealingConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let exec = FakeExecutor::new();
    let store = Arc::new(IncidentStore::open(&dir.path().join("incidents.db")).unwrap());
    let queue = Arc::new(
        OfflineQueue::open(&dir.path().join("queue"), clock.now_utc().date_naive()).unwrap(),
    );
    let pipeline = Arc::new(EvidencePipeline::new(
        "site-1".into(),
        dir.path().to_path_buf(),
        Signer::from_seed([5u8; 32]),
        BundleStore::open(dir.path()).unwrap(),
        Arc::clone(&queue),
    ));

    let local_rules = parse_rule_documents(
        r#"
- id: L1-FIREWALL-002
  priority: 1
  platform: windows
  check: firewall
  conditions:
    - field: status
      op: eq
      value: fail
    - field: raw.profile_enabled
      op: eq
      value: false
  action: run_windows_runbook
  params:
    runbook: RB-WIN-SEC-001
  framework_controls: ["164.312(c)(1)"]
"#,
        RuleOrigin::Local,
        "harness",
    )
    .unwrap();
    let rules = SharedRules::new(RuleSet::merge(builtin_rules(), local_rules, vec![]));

    let catalog = RunbookCatalog::new();
    catalog.insert(Runbook {
        id: "RB-WIN-SEC-001".into(),
        platform: Some(Platform::Windows),
        disruptive: false,
        remediate: "Set-NetFirewallProfile -All -Enabled True".into(),
        verify: "if ((Get-NetFirewallProfile | Where-Object Enabled -eq $false)) { exit 1 }".into(),
        description: None,
    });

    let mut targets = HashMap::new();
    targets.insert(
        "WS01".to_string(),
        Target {
            id: "WS01".into(),
            address: "10.0.0.5".into(),
            platform: Platform::Windows,
            transport: Transport::Winrm,
            credentials: "cred-WS01".into(),
            tls_verify: true,
            allow_plaintext: false,
            port: None,
        },
    );

    let tickets = Arc::new(Mutex::new(Vec::new()));
    let router = EscalationRouter::new(
        vec![Box::new(RecordingChannel(Arc::clone(&tickets)))],
        None,
        Arc::clone(&queue),
    );
    let patterns = PatternTable::new();

    let healer = AutoHealer::new(
        config,
        None,
        HealerDeps {
            store: Arc::clone(&store),
            rules: rules.clone(),
            catalog,
            targets: Arc::new(StaticTargets(targets)),
            executors: ExecutorSet {
                winrm: Arc::new(exec.clone()),
                ssh: Arc::new(exec.clone()),
                local: Arc::new(exec.clone()),
            },
            patterns: patterns.clone(),
            queue: Arc::clone(&queue),
            router,
            planner: None,
        },
        clock.clone(),
    );

    Harness { clock, exec, store, queue, pipeline, healer, rules, patterns, tickets, dir }
}

impl Harness {
    /// Create and record a firewall incident for WS01.
    pub fn firewall_incident(&self) -> Incident {
        let drift = firewall_drift("WS01");
        let incident = Incident::from_drift(
            &drift,
            "site-1",
            dw_core::rfc3339_ms(self.clock.now_utc()),
        );
        self.store.record(&incident).unwrap();
        incident
    }

    /// Seal evidence for a terminal healing result, the way the scan loop
    /// does.
    pub fn seal_for(&self, incident: &Incident, result: &HealingResult) -> dw_evidence::EvidenceBundle {
        let outcome = if result.success {
            BundleOutcome::Success
        } else if result.tier == Some(ResolutionTier::L3) {
            BundleOutcome::Escalated
        } else {
            BundleOutcome::Failure
        };
        let controls = self
            .rules
            .snapshot()
            .first_match(incident)
            .map(|r| r.framework_controls.clone())
            .unwrap_or_default();
        let input = BundleInput {
            host_id: incident.host_id.clone(),
            check_id: incident.check_type.clone(),
            outcome,
            framework_controls: controls,
            pre_state: incident.raw_state.clone(),
            post_state: incident.raw_state.clone(),
            actions_taken: result.action.clone().into_iter().collect(),
            healing_tier: result.tier,
            dry_run: result.dry_run,
        };
        self.pipeline.seal(input, self.clock.now_utc()).unwrap()
    }
}
