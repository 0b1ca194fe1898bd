//! Account authentication: Ed25519 signature verification
//!
//! The authenticator maps accounts to registered verifying keys and checks
//! detached signatures. Signed frames carry the signature as the first 64
//! bytes of the payload; the signed message is the wire header bytes
//! followed by the payload after the signature.

use ed25519_dalek::{Signature, Signer, Verifier};
pub use ed25519_dalek::{SigningKey, VerifyingKey};
use ingest::frame::FrameHeader;
use ingest::pipeline::AuthVerifier;
use ingest::wire::{WireHeader, WIRE_MAGIC, WIRE_VERSION};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use types::ids::AccountId;

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

/// Registry of account verifying keys.
///
/// Registration happens on the control path; verification happens on the
/// transport thread, so the key table sits behind a read-write lock.
#[derive(Default)]
pub struct Authenticator {
    keys: RwLock<HashMap<AccountId, VerifyingKey>>,
}

impl Authenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or overwrite) an account's public key.
    ///
    /// Returns `false` when the bytes are not a valid Ed25519 point.
    pub fn register_account(&self, account: AccountId, public_key: &[u8; PUBLIC_KEY_SIZE]) -> bool {
        match VerifyingKey::from_bytes(public_key) {
            Ok(key) => {
                self.keys.write().insert(account, key);
                true
            }
            Err(_) => false,
        }
    }

    pub fn unregister_account(&self, account: AccountId) {
        self.keys.write().remove(&account);
    }

    pub fn has_account(&self, account: AccountId) -> bool {
        self.keys.read().contains_key(&account)
    }

    pub fn account_count(&self) -> usize {
        self.keys.read().len()
    }

    /// Verify a detached signature for a registered account.
    /// Unknown accounts verify false.
    pub fn verify(&self, account: AccountId, message: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> bool {
        let keys = self.keys.read();
        let Some(key) = keys.get(&account) else {
            return false;
        };
        let signature = Signature::from_bytes(signature);
        key.verify(message, &signature).is_ok()
    }

    /// Verify against an explicit key, bypassing the registry.
    pub fn verify_with_key(
        public_key: &VerifyingKey,
        message: &[u8],
        signature: &[u8; SIGNATURE_SIZE],
    ) -> bool {
        let signature = Signature::from_bytes(signature);
        public_key.verify(message, &signature).is_ok()
    }

    /// Sign a message (client/test side).
    pub fn sign(signing_key: &SigningKey, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        signing_key.sign(message).to_bytes()
    }
}

/// Frame-level verification: signature = first 64 payload bytes, message =
/// wire header bytes ∥ payload after the signature.
pub struct FrameAuthenticator {
    auth: Arc<Authenticator>,
}

impl FrameAuthenticator {
    pub fn new(auth: Arc<Authenticator>) -> Self {
        Self { auth }
    }

    pub fn verify_frame(&self, header_bytes: &[u8], payload: &[u8], account: AccountId) -> bool {
        if payload.len() < SIGNATURE_SIZE {
            return false;
        }

        let signature: [u8; SIGNATURE_SIZE] = payload[..SIGNATURE_SIZE].try_into().unwrap();

        let mut message = Vec::with_capacity(header_bytes.len() + payload.len() - SIGNATURE_SIZE);
        message.extend_from_slice(header_bytes);
        message.extend_from_slice(&payload[SIGNATURE_SIZE..]);

        self.auth.verify(account, &message, &signature)
    }

    /// Build an [`AuthVerifier`] callback for the ingress pipeline.
    ///
    /// The wire header is reconstructed from the decoded frame header so the
    /// verified message matches what the client signed.
    pub fn into_verifier(self) -> AuthVerifier {
        Box::new(move |header: &FrameHeader, payload: &[u8]| {
            let wire = WireHeader {
                magic: WIRE_MAGIC,
                version: WIRE_VERSION,
                flags: 0,
                account: header.account.0,
                nonce: header.nonce,
                timestamp_ns: header.received_time_ns as u64,
                priority: header.priority,
                kind: header.kind as u8,
                payload_len: payload.len() as u16,
            };
            self.verify_frame(&wire.encode(), payload, header.account)
        })
    }
}

/// Generate a fresh keypair (tests and operator tooling).
#[cfg(any(test, feature = "keygen"))]
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    use rand::rngs::OsRng;
    let signing = SigningKey::generate(&mut OsRng);
    let verifying = signing.verifying_key();
    (signing, verifying)
}
