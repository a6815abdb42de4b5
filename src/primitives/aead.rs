//! XChaCha20-Poly1305 AEAD helpers shared by every component that
//! encrypts a message key's worth of plaintext.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use thiserror::Error;

pub const AEAD_KEY_BYTES: usize = 32;
pub const AEAD_NONCE_BYTES: usize = 24;
pub const AEAD_TAG_BYTES: usize = 16;

#[derive(Error, Debug)]
pub enum AeadError {
    #[error("invalid key length (expected {AEAD_KEY_BYTES} bytes)")]
    InvalidKeyLength,
    #[error("invalid nonce length (expected {AEAD_NONCE_BYTES} bytes)")]
    InvalidNonceLength,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed (tag mismatch or corruption)")]
    DecryptFailed,
}

pub type Result<T> = std::result::Result<T, AeadError>;

/// Encrypt `plaintext` under `key`/`nonce` with associated data `aad`.
/// Returns ciphertext with the 16-byte tag appended.
pub fn seal(key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    if key.len() != AEAD_KEY_BYTES {
        return Err(AeadError::InvalidKeyLength);
    }
    if nonce.len() != AEAD_NONCE_BYTES {
        return Err(AeadError::InvalidNonceLength);
    }
    let cipher =
        XChaCha20Poly1305::new_from_slice(key).map_err(|_| AeadError::InvalidKeyLength)?;
    let nonce = XNonce::from_slice(nonce);
    cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| AeadError::EncryptFailed)
}

/// Decrypt ciphertext (with trailing tag) produced by [`seal`].
pub fn open(key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if key.len() != AEAD_KEY_BYTES {
        return Err(AeadError::InvalidKeyLength);
    }
    if nonce.len() != AEAD_NONCE_BYTES {
        return Err(AeadError::InvalidNonceLength);
    }
    let cipher =
        XChaCha20Poly1305::new_from_slice(key).map_err(|_| AeadError::InvalidKeyLength)?;
    let nonce = XNonce::from_slice(nonce);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| AeadError::DecryptFailed)
}
