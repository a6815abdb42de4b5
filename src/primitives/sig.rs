//! Ed25519 signatures.
//!
//! Kept as a secondary primitive (see DESIGN.md, SPEC_FULL.md §4.A):
//! the spec's identity/STH/envelope signatures use the Dilithium-3
//! class primitive in `pq_sig`, sized to match the original
//! implementation's key-transparency constants. Ed25519 remains
//! available for any lower-stakes signing need that does not require
//! post-quantum security.

use ed25519_dalek::{Signer, Verifier};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use thiserror::Error;

pub const ED25519_PUBLIC_KEY_BYTES: usize = 32;
pub const ED25519_SECRET_KEY_BYTES: usize = 32;
pub const ED25519_SIGNATURE_BYTES: usize = 64;

#[derive(Error, Debug)]
pub enum SigError {
    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,
    #[error("signature verification failed")]
    VerificationFailed,
}

pub type Result<T> = std::result::Result<T, SigError>;

pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let signing_key = SigningKey::generate(&mut rand_core::OsRng);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

pub fn sign(signing_key: &SigningKey, message: &[u8]) -> [u8; ED25519_SIGNATURE_BYTES] {
    signing_key.sign(message).to_bytes()
}

pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    if public_key.len() != ED25519_PUBLIC_KEY_BYTES {
        return Err(SigError::InvalidKeyLength);
    }
    if signature.len() != ED25519_SIGNATURE_BYTES {
        return Err(SigError::InvalidSignatureEncoding);
    }
    let mut pk_bytes = [0u8; ED25519_PUBLIC_KEY_BYTES];
    pk_bytes.copy_from_slice(public_key);
    let vk = VerifyingKey::from_bytes(&pk_bytes).map_err(|_| SigError::InvalidKeyLength)?;
    let mut sig_bytes = [0u8; ED25519_SIGNATURE_BYTES];
    sig_bytes.copy_from_slice(signature);
    let sig = Signature::from_bytes(&sig_bytes);
    vk.verify(message, &sig)
        .map_err(|_| SigError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_roundtrip() {
        let (sk, vk) = generate_keypair();
        let msg = b"hello";
        let sig = sign(&sk, msg);
        verify(vk.as_bytes(), msg, &sig).unwrap();
    }

    #[test]
    fn tampered_message_fails_verification() {
        let (sk, vk) = generate_keypair();
        let sig = sign(&sk, b"hello");
        assert!(verify(vk.as_bytes(), b"hellx", &sig).is_err());
    }
}
