//! Per-device identity and prekey bundle (§3).
//!
//! An identity owns a Dilithium-3-class signing keypair (`id_sig`) and
//! an X25519 Diffie-Hellman keypair (`id_dh`); private halves never
//! leave the device. Grounded on
//! `secure-legion-core/src/crypto/pqc.rs`'s `TrustLevel`/
//! `ContactVerificationRecord` for the shape of a verification record,
//! and on spec.md §3's exact fingerprint formula.

use thiserror::Error;

use crate::primitives::dh::DhKeypair;
use crate::primitives::hash::identity_fingerprint;
use crate::primitives::pq_sig::PqSigKeypair;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("bundle missing for {username}")]
    PeerBundleMissing { username: String },
}

pub type Result<T> = std::result::Result<T, IdentityError>;

/// This device's long-term identity material. `id_sig` signs prekey
/// bundles, STHs, and group/call distribution envelopes; `id_dh` is
/// the X3DH identity DH term.
pub struct Identity {
    pub username: String,
    pub device_id: String,
    pub id_sig: PqSigKeypair,
    pub id_dh: DhKeypair,
}

impl Identity {
    pub fn generate(username: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            device_id: device_id.into(),
            id_sig: PqSigKeypair::generate(),
            id_dh: DhKeypair::generate(),
        }
    }

    /// Lowercase hex SHA-256 fingerprint over (username, id_sig_pk, id_dh_pk).
    pub fn fingerprint(&self) -> String {
        identity_fingerprint(&self.username, &self.id_sig.public, &self.id_dh.public)
    }

    pub fn public(&self) -> IdentityPublic {
        IdentityPublic {
            username: self.username.clone(),
            id_sig_pk: self.id_sig.public.clone(),
            id_dh_pk: self.id_dh.public,
        }
    }
}

/// The public half of an identity, as published to the KT log and
/// embedded in prekey bundles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityPublic {
    pub username: String,
    pub id_sig_pk: Vec<u8>,
    pub id_dh_pk: [u8; 32],
}

impl IdentityPublic {
    pub fn fingerprint(&self) -> String {
        identity_fingerprint(&self.username, &self.id_sig_pk, &self.id_dh_pk)
    }
}

/// PreKey bundle published per user (§3): a signed prekey, a pool of
/// one-time prekeys consumed on use, and an optional KEM prekey for
/// the hybrid X3DH augmentation.
#[derive(Clone, Debug)]
pub struct PreKeyBundle {
    pub identity: IdentityPublic,
    pub signed_prekey: [u8; 32],
    pub signed_prekey_signature: Vec<u8>,
    pub one_time_prekeys: Vec<[u8; 32]>,
    pub kem_prekey: Option<Vec<u8>>,
}

const SIGNED_PREKEY_SIG_CONTEXT: &[u8] = b"MI_SIGNED_PREKEY_V1";

impl PreKeyBundle {
    /// Build and sign a bundle from a freshly generated signed prekey.
    pub fn sign(
        identity: &Identity,
        signed_prekey_dh: &DhKeypair,
        one_time_prekeys: Vec<[u8; 32]>,
        kem_prekey: Option<Vec<u8>>,
    ) -> Result<Self> {
        let mut msg = Vec::with_capacity(SIGNED_PREKEY_SIG_CONTEXT.len() + 32);
        msg.extend_from_slice(SIGNED_PREKEY_SIG_CONTEXT);
        msg.extend_from_slice(&signed_prekey_dh.public);
        let signature = identity
            .id_sig
            .sign(&msg)
            .map_err(|_| IdentityError::InvalidSignature)?;
        Ok(Self {
            identity: identity.public(),
            signed_prekey: signed_prekey_dh.public,
            signed_prekey_signature: signature,
            one_time_prekeys,
            kem_prekey,
        })
    }

    /// Verify the signed-prekey signature against the bundle's own
    /// published `id_sig_pk` (§4.E: "verifies signatures with
    /// id_sig_pk published in KT" — callers should additionally check
    /// that published key against the KT log before trusting it).
    pub fn verify(&self) -> Result<()> {
        let mut msg = Vec::with_capacity(SIGNED_PREKEY_SIG_CONTEXT.len() + 32);
        msg.extend_from_slice(SIGNED_PREKEY_SIG_CONTEXT);
        msg.extend_from_slice(&self.signed_prekey);
        crate::primitives::pq_sig::verify_detached(
            &self.identity.id_sig_pk,
            &msg,
            &self.signed_prekey_signature,
        )
        .map_err(|_| IdentityError::InvalidSignature)
    }

    /// Consume (pop) one one-time prekey, if any remain.
    pub fn take_one_time_prekey(&mut self) -> Option<[u8; 32]> {
        self.one_time_prekeys.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_matches_public_projection() {
        let id = Identity::generate("alice", "device-1");
        assert_eq!(id.fingerprint(), id.public().fingerprint());
        assert_eq!(id.fingerprint().len(), 64);
    }

    #[test]
    fn signed_bundle_verifies() {
        let id = Identity::generate("alice", "device-1");
        let spk = DhKeypair::generate();
        let bundle = PreKeyBundle::sign(&id, &spk, vec![[1u8; 32], [2u8; 32]], None).unwrap();
        bundle.verify().unwrap();
    }

    #[test]
    fn tampered_signed_prekey_fails_verification() {
        let id = Identity::generate("alice", "device-1");
        let spk = DhKeypair::generate();
        let mut bundle = PreKeyBundle::sign(&id, &spk, vec![], None).unwrap();
        bundle.signed_prekey[0] ^= 0xFF;
        assert!(bundle.verify().is_err());
    }

    #[test]
    fn one_time_prekeys_consumed_on_use() {
        let id = Identity::generate("bob", "device-1");
        let spk = DhKeypair::generate();
        let mut bundle = PreKeyBundle::sign(&id, &spk, vec![[9u8; 32]], None).unwrap();
        assert_eq!(bundle.take_one_time_prekey(), Some([9u8; 32]));
        assert_eq!(bundle.take_one_time_prekey(), None);
    }
}
