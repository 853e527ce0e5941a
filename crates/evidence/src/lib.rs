// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dw-evidence: sealed, signed, hash-chained evidence bundles.
//!
//! One writer per `(site, host)` builds a bundle per terminal scan outcome,
//! scrubs it, hashes its canonical JSON (signature and hash fields
//! excluded), signs the hash with the appliance Ed25519 key, links it to
//! the previous bundle's hash, commits it to disk atomically, advances the
//! durable chain parent, and enqueues it for delivery. A crash at any point
//! leaves either the old parent in place or a committed bundle the startup
//! recovery pass can promote, never a broken chain.

mod anchor;
mod bundle;
mod canonical;
mod chain;
mod pipeline;
mod signer;
mod store;

pub use anchor::OtsAnchor;
pub use bundle::{format_bundle_id, parse_bundle_id, BundleInput, BundleOutcome, EvidenceBundle};
pub use canonical::{bundle_hash, canonical_bytes};
pub use chain::{ChainState, GENESIS_PARENT};
pub use pipeline::EvidencePipeline;
pub use signer::Signer;
pub use store::BundleStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvidenceError {
    /// Key load / signature failures are fatal (exit code 2).
    #[error("crypto: {0}")]
    Crypto(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serialize(String),
    #[error("bundle {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Queue(#[from] dw_storage::QueueError),
}
