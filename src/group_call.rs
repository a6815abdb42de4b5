//! Group call key distribution (§4.J): per-(group, call_id) signed
//! symmetric key, handed to each member over the peer ratchet. The
//! server relays signalling only and never holds `call_key`.
//!
//! Grounded on `original_source/server/include/group_call_manager.h`
//! and `server/src/group_call_manager.cpp` for the client-visible
//! shape (the signalling relay itself is out of scope, §1 Non-goals:
//! "connection accept loops").

use thiserror::Error;

use crate::primitives::pq_sig::{self, PqSigKeypair};
use crate::primitives::rng;

const DIST_SIG_CONTEXT: &[u8] = b"MI_GCKD_V1";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupCallError {
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("no call key cached for key_id {key_id}")]
    KeyMissing { key_id: u32 },
}

pub type Result<T> = std::result::Result<T, GroupCallError>;

fn dist_message(group_id: &str, call_id: &str, key_id: u32, call_key: &[u8; 32]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DIST_SIG_CONTEXT.len() + group_id.len() + call_id.len() + 4 + 32);
    msg.extend_from_slice(DIST_SIG_CONTEXT);
    msg.extend_from_slice(group_id.as_bytes());
    msg.extend_from_slice(call_id.as_bytes());
    msg.extend_from_slice(&key_id.to_le_bytes());
    msg.extend_from_slice(call_key);
    msg
}

/// Distribution envelope carried over the peer ratchet to each member
/// (§4.J).
#[derive(Clone, Debug)]
pub struct GroupCallKeyDist {
    pub group_id: String,
    pub call_id: String,
    pub key_id: u32,
    pub call_key: [u8; 32],
    pub signature: Vec<u8>,
}

impl GroupCallKeyDist {
    pub fn verify(&self, sig_pk: &[u8]) -> Result<()> {
        let msg = dist_message(&self.group_id, &self.call_id, self.key_id, &self.call_key);
        pq_sig::verify_detached(sig_pk, &msg, &self.signature)
            .map_err(|_| GroupCallError::InvalidSignature)
    }
}

/// Call-initiator-side state: one `call_key` per (group, call_id),
/// `key_id` starting at 1 and incrementing on membership-change
/// rotation (§4.J).
pub struct GroupCallKeyState {
    pub group_id: String,
    pub call_id: String,
    pub key_id: u32,
    call_key: [u8; 32],
}

impl GroupCallKeyState {
    pub fn initiate(group_id: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            call_id: call_id.into(),
            key_id: 1,
            call_key: rng::random_32(),
        }
    }

    /// New `call_key`, `key_id` incremented, on a membership change
    /// (§4.J "Rotation").
    pub fn rotate(&mut self) {
        self.key_id += 1;
        self.call_key = rng::random_32();
    }

    pub fn distribution(&self, id_sig: &PqSigKeypair) -> Result<GroupCallKeyDist> {
        let msg = dist_message(&self.group_id, &self.call_id, self.key_id, &self.call_key);
        let signature = id_sig
            .sign(&msg)
            .map_err(|_| GroupCallError::InvalidSignature)?;
        Ok(GroupCallKeyDist {
            group_id: self.group_id.clone(),
            call_id: self.call_id.clone(),
            key_id: self.key_id,
            call_key: self.call_key,
            signature,
        })
    }
}

/// Receiver-side cache, keyed by `(group_id, call_id, key_id)` as
/// spec.md §4.J specifies.
#[derive(Default)]
pub struct GroupCallKeyCache {
    entries: std::collections::HashMap<(String, String, u32), [u8; 32]>,
}

impl GroupCallKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify and store a distribution.
    pub fn accept(&mut self, dist: &GroupCallKeyDist, sig_pk: &[u8]) -> Result<()> {
        dist.verify(sig_pk)?;
        self.entries.insert(
            (dist.group_id.clone(), dist.call_id.clone(), dist.key_id),
            dist.call_key,
        );
        Ok(())
    }

    /// Look up a cached key, or signal that a `GroupCallKeyReq` should
    /// be sent for this `key_id`.
    pub fn get(&self, group_id: &str, call_id: &str, key_id: u32) -> Result<[u8; 32]> {
        self.entries
            .get(&(group_id.to_string(), call_id.to_string(), key_id))
            .copied()
            .ok_or(GroupCallError::KeyMissing { key_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_verifies_and_caches() {
        let sig = PqSigKeypair::generate();
        let state = GroupCallKeyState::initiate("g1", "call-1");
        let dist = state.distribution(&sig).unwrap();

        let mut cache = GroupCallKeyCache::new();
        cache.accept(&dist, &sig.public).unwrap();
        assert_eq!(cache.get("g1", "call-1", 1).unwrap(), dist.call_key);
    }

    #[test]
    fn missing_key_id_errors() {
        let cache = GroupCallKeyCache::new();
        assert!(matches!(
            cache.get("g1", "call-1", 3),
            Err(GroupCallError::KeyMissing { key_id: 3 })
        ));
    }

    #[test]
    fn rotation_increments_key_id_and_changes_key() {
        let sig = PqSigKeypair::generate();
        let mut state = GroupCallKeyState::initiate("g1", "call-1");
        let dist1 = state.distribution(&sig).unwrap();
        state.rotate();
        let dist2 = state.distribution(&sig).unwrap();
        assert_eq!(dist2.key_id, 2);
        assert_ne!(dist1.call_key, dist2.call_key);
    }

    #[test]
    fn tampered_distribution_fails_verification() {
        let sig = PqSigKeypair::generate();
        let state = GroupCallKeyState::initiate("g1", "call-1");
        let mut dist = state.distribution(&sig).unwrap();
        dist.call_key[0] ^= 0xFF;
        assert!(dist.verify(&sig.public).is_err());
    }
}
