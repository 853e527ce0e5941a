// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server order verification: pinned-key signature, expiry, replay nonce.

use crate::types::OrderRecord;
use chrono::{DateTime, Utc};
use dw_core::parse_rfc3339;
use dw_storage::NonceCache;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde_json::Value;
use std::sync::Arc;

/// Outcome of order verification. Rejections are counted by the caller;
/// only `Execute` proceeds to acknowledgement.
#[derive(Debug, PartialEq, Eq)]
pub enum OrderDecision {
    Execute,
    BadSignature,
    Expired,
    Replayed,
    /// No pinned key configured; orders cannot be trusted.
    NoPinnedKey,
}

pub struct OrderProcessor {
    pinned_key: Option<VerifyingKey>,
    nonces: Arc<NonceCache>,
}

impl OrderProcessor {
    pub fn new(pinned_key_hex: Option<&str>, nonces: Arc<NonceCache>) -> Self {
        let pinned_key = pinned_key_hex.and_then(|hex_key| {
            let bytes = hex::decode(hex_key).ok()?;
            let array = <[u8; 32]>::try_from(bytes.as_slice()).ok()?;
            VerifyingKey::from_bytes(&array).ok()
        });
        Self { pinned_key, nonces }
    }

    /// Verify one order. Checks run in trust order: signature first (an
    /// unsigned order tells us nothing), then expiry, then the replay
    /// cache; a replayed id is rejected regardless of signature validity.
    pub fn verify(&self, order: &OrderRecord, now: DateTime<Utc>) -> OrderDecision {
        let Some(key) = &self.pinned_key else {
            return OrderDecision::NoPinnedKey;
        };
        if !signature_valid(key, order) {
            return OrderDecision::BadSignature;
        }
        match parse_rfc3339(&order.expires_at) {
            Ok(expires) if expires > now => {}
            _ => return OrderDecision::Expired,
        }
        match self.nonces.check_and_insert(&order.id, now) {
            Ok(true) => OrderDecision::Execute,
            Ok(false) => OrderDecision::Replayed,
            Err(e) => {
                tracing::error!(order_id = %order.id, error = %e, "nonce cache write failed");
                // Fail closed: without a durable nonce record the order
                // could replay after restart.
                OrderDecision::Replayed
            }
        }
    }
}

/// Signature covers the canonical JSON of the order minus `signature`.
fn signature_valid(key: &VerifyingKey, order: &OrderRecord) -> bool {
    let Ok(mut value) = serde_json::to_value(order) else { return false };
    if let Value::Object(map) = &mut value {
        map.remove("signature");
    }
    let Ok(message) = serde_jcs::to_vec(&value) else { return false };
    let Ok(sig_bytes) = hex::decode(&order.signature) else { return false };
    let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else { return false };
    key.verify(&message, &Signature::from_bytes(&sig_array)).is_ok()
}

#[cfg(test)]
#[path = "orders_tests.rs"]
mod tests;
