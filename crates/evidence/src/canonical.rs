// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical JSON (JCS) serialization and the bundle hash.

use crate::bundle::EvidenceBundle;
use crate::EvidenceError;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// JCS bytes: sorted keys, no whitespace, UTF-8.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, EvidenceError> {
    serde_jcs::to_vec(value).map_err(|e| EvidenceError::Serialize(e.to_string()))
}

/// SHA-256 (hex) over the bundle's canonical JSON with `bundle_hash` and
/// `signature` excluded. Depends only on content, so re-hashing a stored
/// bundle reproduces the sealed value.
pub fn bundle_hash(bundle: &EvidenceBundle) -> Result<String, EvidenceError> {
    let mut value =
        serde_json::to_value(bundle).map_err(|e| EvidenceError::Serialize(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        map.remove("bundle_hash");
        map.remove("signature");
    }
    let bytes = canonical_bytes(&value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
