// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seal → scrub → sign → chain → commit → enqueue.

use crate::bundle::{format_bundle_id, BundleInput, EvidenceBundle};
use crate::canonical::bundle_hash;
use crate::chain::ChainState;
use crate::signer::Signer;
use crate::store::BundleStore;
use crate::EvidenceError;
use chrono::{DateTime, NaiveDate, Utc};
use dw_core::{rfc3339_ms, PhiScrubber};
use dw_storage::{OfflineQueue, QueueKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// The only writer of bundles and chain state on this appliance. Chains
/// are kept per `(site, host)`; bundle ids are monotonic per UTC day
/// across all chains.
pub struct EvidencePipeline {
    site_id: String,
    state_dir: PathBuf,
    signer: Signer,
    chains: Mutex<HashMap<String, Arc<ChainState>>>,
    store: BundleStore,
    scrubber: PhiScrubber,
    queue: Arc<OfflineQueue>,
    /// Serializes seal: id allocation, commit, and chain advance must not
    /// interleave.
    seal_lock: Mutex<()>,
}

impl EvidencePipeline {
    pub fn new(
        site_id: String,
        state_dir: PathBuf,
        signer: Signer,
        store: BundleStore,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        Self {
            site_id,
            state_dir,
            signer,
            chains: Mutex::new(HashMap::new()),
            store,
            scrubber: PhiScrubber::new(),
            queue,
            seal_lock: Mutex::new(()),
        }
    }

    pub fn public_key_hex(&self) -> String {
        self.signer.public_key_hex()
    }

    /// The chain for one host, opened lazily and cached.
    fn chain(&self, host_id: &str) -> Result<Arc<ChainState>, EvidenceError> {
        let mut chains = self.chains.lock();
        if let Some(chain) = chains.get(host_id) {
            return Ok(Arc::clone(chain));
        }
        let chain = Arc::new(ChainState::open(&self.state_dir, &self.site_id, host_id)?);
        chains.insert(host_id.to_string(), Arc::clone(&chain));
        Ok(chain)
    }

    /// Startup repair for a crash between bundle commit and chain advance:
    /// for each host's newest committed bundle, if it chains *from* the
    /// persisted parent but the parent was never advanced to its hash,
    /// finish the advance from the on-disk content. Returns promoted ids.
    pub fn recover(&self, today: NaiveDate) -> Result<Vec<String>, EvidenceError> {
        let _guard = self.seal_lock.lock();
        let mut promoted = Vec::new();
        for day in [today - chrono::Duration::days(1), today] {
            // Ascending ids; the last seen per host is its newest
            let mut newest_per_host: HashMap<String, EvidenceBundle> = HashMap::new();
            for id in self.store.list_day(day) {
                if let Ok(bundle) = self.store.load(&id) {
                    newest_per_host.insert(bundle.host_id.clone(), bundle);
                }
            }
            for (host, newest) in newest_per_host {
                let chain = self.chain(&host)?;
                let parent = chain.parent();
                if newest.parent_hash == parent && newest.bundle_hash != parent {
                    chain.advance(&newest.bundle_hash)?;
                    tracing::warn!(
                        bundle_id = %newest.bundle_id,
                        host = %host,
                        "promoted orphaned bundle into chain after crash"
                    );
                    promoted.push(newest.bundle_id);
                }
            }
        }
        Ok(promoted)
    }

    /// Seal one terminal scan outcome into a signed, chained, committed,
    /// enqueued bundle.
    pub fn seal(
        &self,
        input: BundleInput,
        now: DateTime<Utc>,
    ) -> Result<EvidenceBundle, EvidenceError> {
        let _guard = self.seal_lock.lock();
        let day = now.date_naive();
        let bundle_id = format_bundle_id(day, self.store.next_seq(day));
        let chain = self.chain(&input.host_id)?;

        let mut bundle = EvidenceBundle {
            bundle_id,
            site_id: self.site_id.clone(),
            host_id: input.host_id,
            check_id: input.check_id,
            outcome: input.outcome,
            framework_controls: input.framework_controls,
            pre_state: self.scrubber.scrub_state(&input.pre_state),
            post_state: self.scrubber.scrub_state(&input.post_state),
            actions_taken: input
                .actions_taken
                .iter()
                .map(|a| self.scrubber.scrub_str(a))
                .collect(),
            healing_tier: input.healing_tier,
            dry_run: input.dry_run,
            phi_scrubbed: true,
            created_at: rfc3339_ms(now),
            parent_hash: chain.parent(),
            bundle_hash: String::new(),
            signature: String::new(),
        };

        bundle.bundle_hash = bundle_hash(&bundle)?;
        let hash_bytes = hex::decode(&bundle.bundle_hash)
            .map_err(|e| EvidenceError::Crypto(format!("hash encode: {e}")))?;
        bundle.signature = self.signer.sign_hex(&hash_bytes);

        // Commit before advancing the parent: a crash in between is
        // repaired by recover(); the reverse order would break the chain.
        self.store.commit(&bundle)?;
        chain.advance(&bundle.bundle_hash)?;

        let payload = serde_json::to_value(&bundle)
            .map_err(|e| EvidenceError::Serialize(e.to_string()))?;
        // Evidence never blocks: at the cap it evicts, so the immediate
        // path is the whole story here.
        self.queue.try_enqueue(QueueKind::Evidence, payload, bundle.created_at.clone())?;

        tracing::info!(
            bundle_id = %bundle.bundle_id,
            host = %bundle.host_id,
            outcome = %bundle.outcome,
            check = %bundle.check_id,
            "evidence bundle sealed"
        );
        Ok(bundle)
    }

    /// Verify a day's committed bundles: recomputed hashes, per-host parent
    /// links, and signatures. Returns the number of bundles checked.
    pub fn verify_day(&self, day: NaiveDate) -> Result<usize, EvidenceError> {
        let ids = self.store.list_day(day);
        let pubkey = self.signer.public_key_hex();
        let mut prev_by_host: HashMap<String, String> = HashMap::new();
        for id in &ids {
            let bundle = self.store.load(id)?;
            let recomputed = bundle_hash(&bundle)?;
            if recomputed != bundle.bundle_hash {
                return Err(EvidenceError::Crypto(format!("{id}: hash mismatch")));
            }
            if let Some(prev) = prev_by_host.get(&bundle.host_id) {
                if &bundle.parent_hash != prev {
                    return Err(EvidenceError::Crypto(format!("{id}: broken parent link")));
                }
            }
            let hash_bytes = hex::decode(&bundle.bundle_hash)
                .map_err(|e| EvidenceError::Crypto(e.to_string()))?;
            if !Signer::verify_hex(&pubkey, &hash_bytes, &bundle.signature) {
                return Err(EvidenceError::Crypto(format!("{id}: bad signature")));
            }
            prev_by_host.insert(bundle.host_id.clone(), bundle.bundle_hash.clone());
        }
        Ok(ids.len())
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
