// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dw-storage: durable local state.
//!
//! Three stores, each single-writer and append-only at the disk layer:
//! the incident store (operation log replayed into memory on open), the
//! offline queue (daily segments with tombstones and a dead-letter
//! partition), and the order replay-nonce cache. Every write that a caller
//! depends on is fsync'd before the call returns; multi-byte file replaces
//! go through write-temp-then-rename.

mod incidents;
mod nonces;
mod queue;

pub use incidents::{IncidentStore, StoreError};
pub use nonces::NonceCache;
pub use queue::{EnqueueOutcome, OfflineQueue, QueueEntry, QueueError, QueueKind};

use std::path::Path;

/// Write a file atomically: temp file in the same directory, fsync, rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let tmp = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_data()?;
    }
    std::fs::rename(&tmp, path)
}
