// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup (bottom-up), shutdown (reverse, bounded drain), and the wired
//! component graph.

use crate::checkin::TargetSet;
use async_trait::async_trait;
use dw_command::{CommandClient, LearningSync, OrderProcessor, QueueSender, TicketRecord};
use dw_core::{AgentConfig, Clock, CredentialStore, PatternTable, SystemClock};
use dw_detect::{Detector, LinuxDetector, SelfDetector, WindowsDetector};
use dw_evidence::{BundleStore, EvidencePipeline, OtsAnchor, Signer};
use dw_exec::{LocalExecutor, SshExecutor, WinRmExecutor};
use dw_healer::{
    AutoHealer, EscalationRouter, ExecutorSet, HealerDeps, HttpPlanner, Planner, TicketSink,
};
use dw_intake::{IntakeCounters, IntakeService, ReadyState};
use dw_rules::{RunbookCatalog, SharedRules};
use dw_storage::{IncidentStore, NonceCache, OfflineQueue};
use fs2::FileExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Bounded shutdown drain for in-flight healings.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Fatal startup/runtime failures mapped onto process exit codes.
#[derive(Debug, Error)]
pub enum FatalError {
    /// Exit code 1.
    #[error("config: {0}")]
    Config(String),
    /// Exit code 2.
    #[error("crypto: {0}")]
    Crypto(String),
    /// Exit code 64+.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl FatalError {
    pub fn exit_code(&self) -> u8 {
        match self {
            FatalError::Config(_) => 1,
            FatalError::Crypto(_) => 2,
            FatalError::Invariant(_) => 64,
        }
    }
}

/// Per-platform detectors, wired once at startup.
pub struct Detectors {
    pub windows: Arc<dyn Detector>,
    pub linux: Arc<dyn Detector>,
    pub selfhost: Arc<dyn Detector>,
}

/// The fully wired agent. Constructed bottom-up in [`Agent::start`];
/// nothing here is a process-wide singleton.
pub struct Agent {
    pub config: AgentConfig,
    pub clock: SystemClock,
    pub cancel: CancellationToken,

    pub store: Arc<IncidentStore>,
    pub queue: Arc<OfflineQueue>,
    pub pipeline: Arc<EvidencePipeline>,
    pub client: Arc<CommandClient>,
    pub sender: Arc<QueueSender>,
    pub healer: Arc<AutoHealer<SystemClock>>,
    pub learning: Arc<LearningSync>,
    pub detectors: Detectors,
    pub rules: SharedRules,
    pub catalog: RunbookCatalog,
    pub patterns: PatternTable,
    pub orders: OrderProcessor,

    pub targets: Arc<TargetSet>,
    pub credentials: CredentialStore,
    pub deferred: Mutex<Vec<dw_core::Incident>>,
    pub appliance_id: Mutex<Option<String>>,
    pub scan_trigger: tokio::sync::Notify,
    pub enumeration_trigger: tokio::sync::Notify,
    pub scan_pool: Arc<tokio::sync::Semaphore>,
    pub rejected_orders: AtomicU64,
    pub discovery_runs: AtomicU64,

    pub intake: Arc<IntakeService>,
    pub intake_counters: Arc<IntakeCounters>,
    pub ready: Arc<ReadyState>,

    /// Second handle onto the bundle directory, for OTS sidecars.
    pub bundle_store: Arc<BundleStore>,
    pub anchor: Option<Arc<OtsAnchor>>,

    fatal: AtomicU8,
    _state_lock: std::fs::File,
}

/// Stores escalation tickets through the Central Command client.
struct ClientTicketSink {
    client: Arc<CommandClient>,
}

#[async_trait]
impl TicketSink for ClientTicketSink {
    async fn store_ticket(&self, ticket: &serde_json::Value) -> Result<(), String> {
        let record: TicketRecord =
            serde_json::from_value(ticket.clone()).map_err(|e| e.to_string())?;
        self.client.store_ticket(&record).await.map_err(|e| e.to_string())
    }
}

impl Agent {
    /// Bottom-up start: incident store → evidence → queue → client →
    /// healer → detectors → learning → intake wiring. The caller then
    /// runs [`crate::scheduler::run`].
    pub fn start(
        config: AgentConfig,
        drift_capacity: usize,
    ) -> Result<(Arc<Self>, tokio::sync::mpsc::Receiver<dw_core::DriftResult>), FatalError> {
        let clock = SystemClock;
        let cancel = CancellationToken::new();

        std::fs::create_dir_all(&config.state_dir)
            .map_err(|e| FatalError::Config(format!("state dir: {e}")))?;
        // Exclusive lock: one agent per state directory
        let lock_path = config.state_dir.join("agent.lock");
        let state_lock = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| FatalError::Config(format!("lock file: {e}")))?;
        state_lock
            .try_lock_exclusive()
            .map_err(|e| FatalError::Config(format!("another agent holds {}: {e}", lock_path.display())))?;

        // 1. Incident store + crash recovery
        let store = Arc::new(
            IncidentStore::open(&config.state_dir.join("incidents.db"))
                .map_err(|e| FatalError::Config(format!("incident store: {e}")))?,
        );
        let orphans = store
            .recover_orphans(clock.now_utc())
            .map_err(|e| FatalError::Invariant(e.to_string()))?;
        if !orphans.is_empty() {
            tracing::warn!(count = orphans.len(), "orphaned incidents repaired");
        }

        // 2. Offline queue (evidence depends on it)
        let today = clock.now_utc().date_naive();
        let queue = Arc::new(
            OfflineQueue::open(&config.state_dir.join("queue"), today)
                .map_err(|e| FatalError::Config(format!("queue: {e}")))?,
        );

        // 3. Evidence pipeline; key load failure is fatal (exit 2)
        let signer = Signer::load(&config.signing_key_path)
            .map_err(|e| FatalError::Crypto(e.to_string()))?;
        let bundle_store = BundleStore::open(&config.state_dir)
            .map_err(|e| FatalError::Config(format!("bundle store: {e}")))?;
        let pipeline = Arc::new(EvidencePipeline::new(
            config.site_id.clone(),
            config.state_dir.clone(),
            signer,
            bundle_store,
            Arc::clone(&queue),
        ));
        let promoted = pipeline
            .recover(today)
            .map_err(|e| FatalError::Invariant(e.to_string()))?;
        for bundle_id in promoted {
            tracing::warn!(%bundle_id, "chain repaired from orphaned bundle");
        }

        // 4. Central Command client + queue sender + order verification
        let client = Arc::new(
            CommandClient::new(&config.central_command)
                .map_err(|e| FatalError::Config(e.to_string()))?,
        );
        let sender = Arc::new(QueueSender::new(Arc::clone(&queue), Arc::clone(&client)));
        let nonces = Arc::new(
            NonceCache::open(&config.state_dir)
                .map_err(|e| FatalError::Config(format!("nonce cache: {e}")))?,
        );
        let orders =
            OrderProcessor::new(config.central_command.server_public_key.as_deref(), nonces);

        // 5. Rules, runbooks, healer
        let rules = SharedRules::default();
        let catalog = RunbookCatalog::new();
        catalog
            .load_dir(&config.rules_dir)
            .map_err(|e| FatalError::Config(format!("runbook catalog: {e}")))?;
        let patterns = PatternTable::new();
        let credentials = CredentialStore::new();
        let targets = Arc::new(TargetSet::new());

        let winrm = WinRmExecutor::new(credentials.clone(), cancel.child_token())
            .map_err(|e| FatalError::Config(e.to_string()))?;
        let ssh = SshExecutor::new(credentials.clone(), cancel.child_token());
        let local = LocalExecutor::new(cancel.child_token());
        let winrm: Arc<dyn dw_exec::Executor> = Arc::new(winrm);
        let ssh: Arc<dyn dw_exec::Executor> = Arc::new(ssh);
        let local: Arc<dyn dw_exec::Executor> = Arc::new(local);

        let sink: Arc<dyn TicketSink> =
            Arc::new(ClientTicketSink { client: Arc::clone(&client) });
        let router =
            EscalationRouter::from_config(&config.escalation, Some(sink), Arc::clone(&queue));
        let planner: Option<Arc<dyn Planner>> = match (config.healing.l2_enabled, &config.healing.l2.endpoint)
        {
            (true, Some(endpoint)) => Some(Arc::new(
                HttpPlanner::new(endpoint.clone())
                    .map_err(|e| FatalError::Config(e.to_string()))?,
            )),
            _ => None,
        };
        let healer = Arc::new(AutoHealer::new(
            config.healing.clone(),
            config.maintenance_window,
            HealerDeps {
                store: Arc::clone(&store),
                rules: rules.clone(),
                catalog: catalog.clone(),
                targets: Arc::clone(&targets) as Arc<dyn dw_healer::TargetLookup>,
                executors: ExecutorSet {
                    winrm: Arc::clone(&winrm),
                    ssh: Arc::clone(&ssh),
                    local: Arc::clone(&local),
                },
                patterns: patterns.clone(),
                queue: Arc::clone(&queue),
                router,
                planner,
            },
            clock.clone(),
        ));

        // 6. Detectors over the shared executors
        let detectors = Detectors {
            windows: Arc::new(WindowsDetector::over(Arc::clone(&winrm))),
            linux: Arc::new(LinuxDetector::over(Arc::clone(&ssh))),
            selfhost: Arc::new(SelfDetector::over(Arc::clone(&local))),
        };

        // 7. Learning sync, with the initial ruleset swap
        let learning = Arc::new(LearningSync::new(
            Arc::clone(&client),
            Arc::clone(&queue),
            patterns.clone(),
            rules.clone(),
            config.rules_dir.clone(),
            config.state_dir.clone(),
        ));
        learning.rebuild_ruleset();

        // 7b. Optional OTS anchoring over a second bundle-store handle
        let anchor_store = Arc::new(
            BundleStore::open(&config.state_dir)
                .map_err(|e| FatalError::Config(format!("bundle store: {e}")))?,
        );
        let anchor = if config.evidence.ots_enabled {
            Some(Arc::new(
                OtsAnchor::new(config.evidence.ots_calendars.clone())
                    .map_err(|e| FatalError::Config(e.to_string()))?,
            ))
        } else {
            None
        };

        // 8. Intake server state (served by the scheduler)
        let intake_counters = Arc::new(IntakeCounters::default());
        let (drift_tx, drift_rx) = tokio::sync::mpsc::channel(drift_capacity);
        let intake = Arc::new(IntakeService::new(drift_tx, Arc::clone(&intake_counters)));
        let ready = ReadyState::new();

        // Appliances are resource-constrained: min(4, ncpu) workers
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(4);

        let agent = Arc::new(Agent {
            config,
            clock,
            cancel,
            store,
            queue,
            pipeline,
            client,
            sender,
            healer,
            learning,
            detectors,
            rules,
            catalog,
            patterns,
            orders,
            targets,
            credentials,
            deferred: Mutex::new(Vec::new()),
            appliance_id: Mutex::new(None),
            scan_trigger: tokio::sync::Notify::new(),
            enumeration_trigger: tokio::sync::Notify::new(),
            scan_pool: Arc::new(tokio::sync::Semaphore::new(workers)),
            rejected_orders: AtomicU64::new(0),
            discovery_runs: AtomicU64::new(0),
            intake,
            intake_counters,
            ready,
            bundle_store: anchor_store,
            anchor,
            fatal: AtomicU8::new(0),
            _state_lock: state_lock,
        });
        tracing::info!(site = %agent.config.site_id, host = %agent.config.host_id, "agent started");
        Ok((agent, drift_rx))
    }

    /// Record a crypto-class fatal failure and begin shutdown.
    pub fn fatal_crypto(&self) {
        self.fatal.store(2, Ordering::Release);
        self.cancel.cancel();
    }

    /// Record an invariant-class fatal failure and begin shutdown.
    pub fn fatal_invariant(&self) {
        self.fatal.store(64, Ordering::Release);
        self.cancel.cancel();
    }

    /// Exit code accumulated by fatal failures (0 when clean).
    pub fn exit_code(&self) -> u8 {
        self.fatal.load(Ordering::Acquire)
    }
}
