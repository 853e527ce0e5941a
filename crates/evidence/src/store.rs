// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk bundle store: `evidence/YYYY/MM/DD/<bundle-id>/`.
//!
//! A bundle is two files, `bundle.json` and `bundle.sig`, committed
//! all-or-nothing by staging the directory and renaming it into place.

use crate::bundle::{format_bundle_id, parse_bundle_id, EvidenceBundle};
use crate::EvidenceError;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

pub struct BundleStore {
    root: PathBuf,
}

impl BundleStore {
    pub fn open(state_dir: &Path) -> std::io::Result<Self> {
        let root = state_dir.join("evidence");
        std::fs::create_dir_all(root.join(".staging"))?;
        Ok(Self { root })
    }

    fn day_dir(&self, day: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{:04}", chrono::Datelike::year(&day)))
            .join(format!("{:02}", chrono::Datelike::month(&day)))
            .join(format!("{:02}", chrono::Datelike::day(&day)))
    }

    fn bundle_dir(&self, id: &str) -> Option<PathBuf> {
        let (day, _) = parse_bundle_id(id)?;
        Some(self.day_dir(day).join(id))
    }

    /// Next unused sequence for the day, by scanning committed bundles.
    /// Crash-safe: a bundle is only visible once its directory rename
    /// landed, so scanning never hands out a taken id.
    pub fn next_seq(&self, day: NaiveDate) -> u32 {
        let dir = self.day_dir(day);
        let max = std::fs::read_dir(&dir)
            .ok()
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|name| parse_bundle_id(&name).map(|(_, seq)| seq))
            .max()
            .unwrap_or(0);
        max + 1
    }

    /// Commit a sealed bundle. Two-file write in a staging directory, then
    /// one rename makes it durable and visible.
    pub fn commit(&self, bundle: &EvidenceBundle) -> Result<PathBuf, EvidenceError> {
        let Some((day, _)) = parse_bundle_id(&bundle.bundle_id) else {
            return Err(EvidenceError::Serialize(format!(
                "malformed bundle id {:?}",
                bundle.bundle_id
            )));
        };
        let staging = self.root.join(".staging").join(&bundle.bundle_id);
        std::fs::create_dir_all(&staging)?;
        let json = serde_json::to_vec_pretty(bundle)
            .map_err(|e| EvidenceError::Serialize(e.to_string()))?;
        write_file_synced(&staging.join("bundle.json"), &json)?;
        write_file_synced(&staging.join("bundle.sig"), bundle.signature.as_bytes())?;

        let day_dir = self.day_dir(day);
        std::fs::create_dir_all(&day_dir)?;
        let target = day_dir.join(&bundle.bundle_id);
        std::fs::rename(&staging, &target)?;
        Ok(target)
    }

    /// Load a committed bundle by id.
    pub fn load(&self, id: &str) -> Result<EvidenceBundle, EvidenceError> {
        let dir = self
            .bundle_dir(id)
            .ok_or_else(|| EvidenceError::NotFound(id.to_string()))?;
        let path = dir.join("bundle.json");
        let bytes = std::fs::read(&path)
            .map_err(|_| EvidenceError::NotFound(id.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| EvidenceError::Serialize(e.to_string()))
    }

    /// Committed bundle ids for a day, ascending.
    pub fn list_day(&self, day: NaiveDate) -> Vec<String> {
        let mut ids: Vec<String> = std::fs::read_dir(self.day_dir(day))
            .ok()
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| parse_bundle_id(name).is_some())
            .collect();
        ids.sort();
        ids
    }

    /// Newest committed bundle for a day, if any.
    pub fn newest(&self, day: NaiveDate) -> Option<EvidenceBundle> {
        let id = self.list_day(day).into_iter().next_back()?;
        self.load(&id).ok()
    }

    /// Path a proof sidecar (e.g. OTS) lives at for a bundle id.
    pub fn sidecar_path(&self, id: &str, extension: &str) -> Option<PathBuf> {
        self.bundle_dir(id).map(|d| d.join(format!("bundle.{extension}")))
    }
}

fn write_file_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let mut f = std::fs::File::create(path)?;
    f.write_all(bytes)?;
    f.sync_data()
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
