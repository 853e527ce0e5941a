// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optional OpenTimestamps anchoring (enterprise tier).
//!
//! After a bundle seals, its hash is submitted to one or more calendar
//! servers; the returned proof is stored as a sidecar next to the bundle
//! (`bundle.ots.pending`) and replayed for upgrade until the calendar
//! embeds a Bitcoin confirmation, at which point the sidecar is renamed to
//! `bundle.ots`. The bundle itself never changes; proofs ride alongside.

use crate::store::BundleStore;
use crate::EvidenceError;
use std::path::PathBuf;
use std::time::Duration;

/// Public calendar pool defaults.
pub const DEFAULT_CALENDARS: &[&str] =
    &["https://a.pool.opentimestamps.org", "https://b.pool.opentimestamps.org"];

pub struct OtsAnchor {
    calendars: Vec<String>,
    client: reqwest::Client,
}

impl OtsAnchor {
    pub fn new(calendars: Vec<String>) -> Result<Self, EvidenceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EvidenceError::Serialize(format!("http client: {e}")))?;
        Ok(Self { calendars, client })
    }

    pub fn with_default_calendars() -> Result<Self, EvidenceError> {
        Self::new(DEFAULT_CALENDARS.iter().map(|s| s.to_string()).collect())
    }

    /// Submit a bundle hash to the calendar pool; the first proof returned
    /// is stored as a pending sidecar. Failures are logged, not fatal;
    /// anchoring is best-effort on top of an already-signed chain.
    pub async fn submit(
        &self,
        store: &BundleStore,
        bundle_id: &str,
        bundle_hash_hex: &str,
    ) -> Result<bool, EvidenceError> {
        let digest = hex::decode(bundle_hash_hex)
            .map_err(|e| EvidenceError::Crypto(format!("bundle hash: {e}")))?;
        for calendar in &self.calendars {
            match self
                .client
                .post(format!("{calendar}/digest"))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(digest.clone())
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    let proof = response.bytes().await.map_err(|e| {
                        EvidenceError::Serialize(format!("calendar response: {e}"))
                    })?;
                    if let Some(path) = store.sidecar_path(bundle_id, "ots.pending") {
                        std::fs::write(&path, &proof)?;
                        tracing::info!(bundle_id, calendar = %calendar, "ots proof pending");
                        return Ok(true);
                    }
                }
                Ok(response) => {
                    tracing::warn!(calendar = %calendar, status = %response.status(), "ots submit rejected");
                }
                Err(e) => {
                    tracing::warn!(calendar = %calendar, error = %e, "ots submit failed");
                }
            }
        }
        Ok(false)
    }

    /// Replay pending proofs for upgrade. A calendar that cannot upgrade
    /// yet echoes the submitted proof back unchanged; only a response that
    /// actually advances the proof (new, non-empty bytes) completes the
    /// anchor and drops the sidecar's `.pending` suffix. Returns the
    /// number of proofs upgraded.
    pub async fn upgrade_pending(&self, pending: Vec<PathBuf>) -> usize {
        let mut upgraded = 0;
        for path in pending {
            let Ok(proof) = std::fs::read(&path) else { continue };
            for calendar in &self.calendars {
                match self
                    .client
                    .post(format!("{calendar}/upgrade"))
                    .body(proof.clone())
                    .send()
                    .await
                {
                    Ok(response) if response.status().is_success() => {
                        let Ok(updated) = response.bytes().await else { continue };
                        if updated.is_empty() || updated.as_ref() == proof.as_slice() {
                            // Still pending on this calendar; ask the next
                            continue;
                        }
                        let final_path = path.with_extension("");
                        if std::fs::write(&final_path, &updated).is_ok()
                            && std::fs::remove_file(&path).is_ok()
                        {
                            tracing::info!(proof = %final_path.display(), "ots proof upgraded");
                            upgraded += 1;
                        }
                        break;
                    }
                    _ => continue,
                }
            }
        }
        upgraded
    }
}

#[cfg(test)]
#[path = "anchor_tests.rs"]
mod tests;
