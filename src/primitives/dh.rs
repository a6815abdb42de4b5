//! X25519 Diffie-Hellman.

use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

pub const DH_PUBLIC_KEY_BYTES: usize = 32;
pub const DH_SECRET_KEY_BYTES: usize = 32;

#[derive(Error, Debug)]
pub enum DhError {
    #[error("invalid key length (expected {DH_PUBLIC_KEY_BYTES} bytes)")]
    InvalidKeyLength,
}

pub type Result<T> = std::result::Result<T, DhError>;

/// A DH keypair whose secret half is zeroized on drop.
pub struct DhKeypair {
    secret: StaticSecret,
    pub public: [u8; DH_PUBLIC_KEY_BYTES],
}

impl DhKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand_core::OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: [u8; DH_SECRET_KEY_BYTES]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    pub fn secret_bytes(&self) -> [u8; DH_SECRET_KEY_BYTES] {
        self.secret.to_bytes()
    }

    /// ECDH agreement with a peer's public key, returning the raw
    /// 32-byte shared point (callers must run this through a KDF
    /// before use as a key).
    pub fn agree(&self, their_public: &[u8]) -> Result<[u8; 32]> {
        if their_public.len() != DH_PUBLIC_KEY_BYTES {
            return Err(DhError::InvalidKeyLength);
        }
        let mut arr = [0u8; DH_PUBLIC_KEY_BYTES];
        arr.copy_from_slice(their_public);
        let their_pk = PublicKey::from(arr);
        Ok(self.secret.diffie_hellman(&their_pk).to_bytes())
    }
}

impl Drop for DhKeypair {
    fn drop(&mut self) {
        self.public.zeroize();
    }
}

/// Stateless ECDH between raw key bytes, used where no long-lived
/// keypair object is worth constructing (e.g. one-shot X3DH terms).
pub fn agree(our_secret: &[u8; DH_SECRET_KEY_BYTES], their_public: &[u8]) -> Result<[u8; 32]> {
    if their_public.len() != DH_PUBLIC_KEY_BYTES {
        return Err(DhError::InvalidKeyLength);
    }
    let secret = StaticSecret::from(*our_secret);
    let mut arr = [0u8; DH_PUBLIC_KEY_BYTES];
    arr.copy_from_slice(their_public);
    Ok(secret.diffie_hellman(&PublicKey::from(arr)).to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_is_symmetric() {
        let a = DhKeypair::generate();
        let b = DhKeypair::generate();
        let ab = a.agree(&b.public).unwrap();
        let ba = b.agree(&a.public).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn wrong_length_public_key_rejected() {
        let a = DhKeypair::generate();
        assert!(a.agree(&[0u8; 31]).is_err());
    }
}
