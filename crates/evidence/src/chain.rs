// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable per-(site, host) chain parent.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Parent of the first bundle in a chain.
pub const GENESIS_PARENT: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Owns `chain/<site>-<host>.parent`. The pipeline is the only writer;
/// nothing else may read or write chain state.
pub struct ChainState {
    path: PathBuf,
    parent: Mutex<String>,
}

impl ChainState {
    pub fn open(state_dir: &Path, site_id: &str, host_id: &str) -> std::io::Result<Self> {
        let dir = state_dir.join("chain");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{site_id}-{host_id}.parent"));
        let parent = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let trimmed = text.trim().to_string();
                if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
                    trimmed
                } else {
                    tracing::warn!(path = %path.display(), "unreadable chain parent, using genesis");
                    GENESIS_PARENT.to_string()
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => GENESIS_PARENT.to_string(),
            Err(e) => return Err(e),
        };
        Ok(Self { path, parent: Mutex::new(parent) })
    }

    pub fn parent(&self) -> String {
        self.parent.lock().clone()
    }

    /// Persist the new parent (write-temp-rename) before exposing it.
    pub fn advance(&self, new_hash: &str) -> std::io::Result<()> {
        let mut guard = self.parent.lock();
        write_parent_atomic(&self.path, new_hash)?;
        *guard = new_hash.to_string();
        Ok(())
    }
}

pub(crate) fn write_parent_atomic(path: &Path, hash: &str) -> std::io::Result<()> {
    use std::io::Write;
    let tmp = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        writeln!(f, "{hash}")?;
        f.sync_data()?;
    }
    std::fs::rename(&tmp, path)
}
