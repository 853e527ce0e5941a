// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Appliance Ed25519 identity.

use crate::EvidenceError;
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use std::path::Path;

#[derive(Debug)]
pub struct Signer {
    key: SigningKey,
}

impl Signer {
    /// Load the signing key: raw 32-byte seed, PKCS#8 DER, or PKCS#8 PEM.
    /// Failure here is fatal: the agent refuses to start unsigned.
    pub fn load(path: &Path) -> Result<Self, EvidenceError> {
        let bytes = std::fs::read(path).map_err(|e| {
            EvidenceError::Crypto(format!("cannot read signing key {}: {e}", path.display()))
        })?;
        let key = if bytes.len() == 32 {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes);
            SigningKey::from_bytes(&seed)
        } else if bytes.starts_with(b"-----") {
            let pem = String::from_utf8(bytes)
                .map_err(|_| EvidenceError::Crypto("signing key PEM is not UTF-8".into()))?;
            SigningKey::from_pkcs8_pem(&pem)
                .map_err(|e| EvidenceError::Crypto(format!("bad PKCS#8 PEM key: {e}")))?
        } else {
            SigningKey::from_pkcs8_der(&bytes)
                .map_err(|e| EvidenceError::Crypto(format!("bad PKCS#8 DER key: {e}")))?
        };
        Ok(Self { key })
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { key: SigningKey::from_bytes(&seed) }
    }

    /// Sign a message (the bundle hash bytes); hex signature.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.key.sign(message).to_bytes())
    }

    /// Hex public key, published to Central Command at startup.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    /// Verify a hex signature against a hex public key.
    pub fn verify_hex(public_key_hex: &str, message: &[u8], signature_hex: &str) -> bool {
        let Ok(pk_bytes) = hex::decode(public_key_hex) else { return false };
        let Ok(pk_array) = <[u8; 32]>::try_from(pk_bytes.as_slice()) else { return false };
        let Ok(key) = VerifyingKey::from_bytes(&pk_array) else { return false };
        let Ok(sig_bytes) = hex::decode(signature_hex) else { return false };
        let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else { return false };
        key.verify(message, &Signature::from_bytes(&sig_array)).is_ok()
    }
}

#[cfg(test)]
#[path = "signer_tests.rs"]
mod tests;
