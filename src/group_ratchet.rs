//! Sender-key (group) ratchet (§4.F): a per-(group, sender) symmetric
//! chain key, signed distribution envelopes, and out-of-order
//! tolerance within a bounded iteration window.
//!
//! No teacher module implements a sender-key ratchet (the teacher's
//! group messaging is CRDT-based, see DESIGN.md's "Dropped teacher
//! functionality"); this is new functionality grounded directly in
//! spec.md §4.F's formulas, with the envelope/rotation test shape
//! taken from `original_source/server/tests/group_cipher_test.cpp`.

use std::collections::HashMap;

use indexmap::IndexMap;
use thiserror::Error;

use crate::framing::wire::{Reader, Writer};
use crate::limits::{
    MAX_SKIPPED_KEYS_GROUP, MAX_SKIP_WINDOW_GROUP, SENDER_KEY_DIST_RESEND_MS,
    SENDER_KEY_REQUEST_MIN_INTERVAL_MS, SENDER_KEY_ROTATE_AFTER_MESSAGES,
    SENDER_KEY_ROTATE_AFTER_SECS,
};
use crate::primitives::{aead, hash, kdf, pq_sig, rng};

const KDF_CK_INFO: &[u8] = b"mi_e2ee_group_sender_ck_v1";
const DIST_SIG_CONTEXT: &[u8] = b"MI_GSKD_V1";
const MSG_AD_CONTEXT: &[u8] = b"MI_GMSG_AD_V1";
pub const ENVELOPE_MAGIC: [u8; 4] = *b"MIGC";
pub const ENVELOPE_VERSION: u8 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupRatchetError {
    #[error("no sender key for version {version}")]
    SenderKeyMissing { version: u32 },
    #[error("iteration skip window exceeded (requested {requested}, max {max})")]
    SkipWindowExceeded { requested: u32, max: u32 },
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("AEAD decryption failed")]
    TagMismatch,
    #[error("malformed envelope")]
    Malformed,
}

pub type Result<T> = std::result::Result<T, GroupRatchetError>;

/// `members_hash`: hex SHA-256 of sorted usernames joined by `\n` (§3).
pub fn members_hash(members: &[String]) -> String {
    let mut sorted = members.to_vec();
    sorted.sort();
    let joined = sorted.join("\n");
    hex::encode(hash::sha256(joined.as_bytes()))
}

fn kdf_ck(ck: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let out: [[u8; 32]; 2] = kdf::hkdf_expand_subkeys(Some(&[0u8; 32]), ck, KDF_CK_INFO)
        .expect("hkdf-sha256 64-byte expand cannot fail");
    (out[0], out[1])
}

fn message_ad(group_id: &str, sender_username: &str, version: u32, iteration: u32) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_raw(MSG_AD_CONTEXT);
    w.write_string(group_id);
    w.write_string(sender_username);
    w.write_u32_le(version);
    w.write_u32_le(iteration);
    w.into_bytes()
}

fn dist_sig_message(group_id: &str, version: u32, iteration: u32, ck: &[u8; 32]) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_raw(DIST_SIG_CONTEXT);
    w.write_string(group_id);
    w.write_u32_le(version);
    w.write_u32_le(iteration);
    w.write_raw(ck);
    w.into_bytes()
}

/// Decoded wire envelope (§6): magic ‖ version ‖ sender_key_version ‖
/// sender_key_iteration ‖ group_id ‖ sender_username ‖ nonce(24) ‖
/// mac(16) ‖ cipher ‖ detached_signature.
#[derive(Clone, Debug)]
pub struct GroupMessageEnvelope {
    pub sender_key_version: u32,
    pub sender_key_iteration: u32,
    pub group_id: String,
    pub sender_username: String,
    pub nonce: [u8; 24],
    pub mac: [u8; 16],
    pub cipher: Vec<u8>,
    pub signature: Vec<u8>,
}

impl GroupMessageEnvelope {
    /// Bytes covered by the detached signature: everything up to and
    /// including the cipher field.
    fn signed_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_raw(&ENVELOPE_MAGIC);
        w.write_u8(ENVELOPE_VERSION);
        w.write_u32_le(self.sender_key_version);
        w.write_u32_le(self.sender_key_iteration);
        w.write_string(&self.group_id);
        w.write_string(&self.sender_username);
        w.write_raw(&self.nonce);
        w.write_raw(&self.mac);
        w.write_bytes(&self.cipher);
        w.into_bytes()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.signed_bytes();
        let mut w = Writer::new();
        w.write_bytes(&self.signature);
        bytes.extend_from_slice(&w.into_bytes());
        bytes
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 || data[0..4] != ENVELOPE_MAGIC {
            return Err(GroupRatchetError::Malformed);
        }
        let mut r = Reader::new(data);
        let _magic = r.read_array::<4>().map_err(|_| GroupRatchetError::Malformed)?;
        let version = r.read_u8().map_err(|_| GroupRatchetError::Malformed)?;
        if version != ENVELOPE_VERSION {
            return Err(GroupRatchetError::Malformed);
        }
        let sender_key_version = r.read_u32_le().map_err(|_| GroupRatchetError::Malformed)?;
        let sender_key_iteration = r.read_u32_le().map_err(|_| GroupRatchetError::Malformed)?;
        let group_id = r.read_string().map_err(|_| GroupRatchetError::Malformed)?;
        let sender_username = r.read_string().map_err(|_| GroupRatchetError::Malformed)?;
        let nonce = r.read_array::<24>().map_err(|_| GroupRatchetError::Malformed)?;
        let mac = r.read_array::<16>().map_err(|_| GroupRatchetError::Malformed)?;
        let cipher = r.read_bytes().map_err(|_| GroupRatchetError::Malformed)?;
        let signature = r.read_bytes().map_err(|_| GroupRatchetError::Malformed)?;
        Ok(Self {
            sender_key_version,
            sender_key_iteration,
            group_id,
            sender_username,
            nonce,
            mac,
            cipher,
            signature,
        })
    }
}

/// Per-(group, sender) sending state, owned by the local device (§3).
pub struct GroupSenderKeyState {
    pub group_id: String,
    pub sender_username: String,
    pub version: u32,
    ck: [u8; 32],
    pub next_iteration: u32,
    pub members_hash: String,
    pub rotated_at_ms: u64,
    pub sent_count: u64,
    skipped: IndexMap<u32, [u8; 32]>,
}

impl GroupSenderKeyState {
    pub fn new(group_id: impl Into<String>, sender_username: impl Into<String>, members_hash: String, now_ms: u64) -> Self {
        Self {
            group_id: group_id.into(),
            sender_username: sender_username.into(),
            version: 1,
            ck: rng::random_32(),
            next_iteration: 0,
            members_hash,
            rotated_at_ms: now_ms,
            sent_count: 0,
            skipped: IndexMap::new(),
        }
    }

    /// Rotation triggers (§4.F): membership change, 10k-message
    /// threshold, 7-day age, or an explicit admin rotate.
    pub fn needs_rotation(&self, now_ms: u64, current_members_hash: &str) -> bool {
        self.members_hash != current_members_hash
            || self.sent_count >= SENDER_KEY_ROTATE_AFTER_MESSAGES
            || now_ms.saturating_sub(self.rotated_at_ms) >= SENDER_KEY_ROTATE_AFTER_SECS * 1000
    }

    /// Fresh chain key, incremented version, reset counters (§4.F).
    pub fn rotate(&mut self, new_members_hash: String, now_ms: u64) {
        self.ck = rng::random_32();
        self.version += 1;
        self.next_iteration = 0;
        self.sent_count = 0;
        self.members_hash = new_members_hash;
        self.rotated_at_ms = now_ms;
        self.skipped.clear();
    }

    /// Distribution envelope for the current epoch, to be sent to
    /// every member over the peer ratchet (§4.F).
    pub fn distribution(&self, id_sig: &pq_sig::PqSigKeypair) -> Result<GroupSenderKeyDist> {
        let msg = dist_sig_message(&self.group_id, self.version, self.next_iteration, &self.ck);
        let signature = id_sig
            .sign(&msg)
            .map_err(|_| GroupRatchetError::InvalidSignature)?;
        Ok(GroupSenderKeyDist {
            group_id: self.group_id.clone(),
            version: self.version,
            iteration: self.next_iteration,
            ck: self.ck,
            signature,
        })
    }

    /// Encrypt and sign one group message, advancing the chain.
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        id_sig: &pq_sig::PqSigKeypair,
    ) -> Result<GroupMessageEnvelope> {
        let (new_ck, message_key) = kdf_ck(&self.ck);
        let iteration = self.next_iteration;
        self.ck = new_ck;
        self.next_iteration += 1;
        self.sent_count += 1;

        let nonce = rng::random_24();
        let ad = message_ad(&self.group_id, &self.sender_username, self.version, iteration);
        let sealed = aead::seal(&message_key, &nonce, &ad, plaintext)
            .expect("key/nonce lengths are fixed and valid");
        let tag_at = sealed.len() - 16;
        let mut mac = [0u8; 16];
        mac.copy_from_slice(&sealed[tag_at..]);
        let cipher = sealed[..tag_at].to_vec();

        let mut envelope = GroupMessageEnvelope {
            sender_key_version: self.version,
            sender_key_iteration: iteration,
            group_id: self.group_id.clone(),
            sender_username: self.sender_username.clone(),
            nonce,
            mac,
            cipher,
            signature: Vec::new(),
        };
        let signed = envelope.signed_bytes();
        envelope.signature = id_sig
            .sign(&signed)
            .map_err(|_| GroupRatchetError::InvalidSignature)?;
        Ok(envelope)
    }
}

/// `(group_id, version)` gating logic for pending skipped keys kept
/// out of [`GroupSenderKeyState`] so receivers and senders share the
/// cap-check code path.
fn insert_skipped(skipped: &mut IndexMap<u32, [u8; 32]>, iteration: u32, key: [u8; 32]) {
    if skipped.len() >= MAX_SKIPPED_KEYS_GROUP {
        skipped.shift_remove_index(0);
    }
    skipped.insert(iteration, key);
}

/// Per-(group, sender) receiving state.
pub struct GroupReceiverKeyState {
    pub group_id: String,
    pub sender_username: String,
    pub version: u32,
    ck: [u8; 32],
    pub next_iteration: u32,
    skipped: IndexMap<u32, [u8; 32]>,
}

impl GroupReceiverKeyState {
    /// Accept a distribution when `version > current` or
    /// (`version == current` and `iteration >= current.next_iteration`) (§4.F).
    pub fn accept_distribution(
        existing: Option<&Self>,
        dist: &GroupSenderKeyDist,
        sender_sig_pk: &[u8],
    ) -> Result<bool> {
        let msg = dist_sig_message(&dist.group_id, dist.version, dist.iteration, &dist.ck);
        pq_sig::verify_detached(sender_sig_pk, &msg, &dist.signature)
            .map_err(|_| GroupRatchetError::InvalidSignature)?;

        Ok(match existing {
            None => true,
            Some(cur) => {
                dist.version > cur.version
                    || (dist.version == cur.version && dist.iteration >= cur.next_iteration)
            }
        })
    }

    pub fn from_distribution(dist: &GroupSenderKeyDist, sender_username: impl Into<String>) -> Self {
        Self {
            group_id: dist.group_id.clone(),
            sender_username: sender_username.into(),
            version: dist.version,
            ck: dist.ck,
            next_iteration: dist.iteration,
            skipped: IndexMap::new(),
        }
    }

    /// Derive the message key for `iteration`, deriving and caching
    /// any intermediate skipped keys (§4.F, cap [`MAX_SKIP_WINDOW_GROUP`]).
    fn key_for_iteration(&mut self, iteration: u32) -> Result<[u8; 32]> {
        if iteration < self.next_iteration {
            return self
                .skipped
                .shift_remove(&iteration)
                .ok_or(GroupRatchetError::SenderKeyMissing { version: self.version });
        }
        let span = iteration - self.next_iteration;
        if span > MAX_SKIP_WINDOW_GROUP {
            return Err(GroupRatchetError::SkipWindowExceeded {
                requested: span,
                max: MAX_SKIP_WINDOW_GROUP,
            });
        }
        let mut ck = self.ck;
        let mut message_key = [0u8; 32];
        for i in self.next_iteration..=iteration {
            let (new_ck, mk) = kdf_ck(&ck);
            ck = new_ck;
            if i == iteration {
                message_key = mk;
            } else {
                insert_skipped(&mut self.skipped, i, mk);
            }
        }
        self.ck = ck;
        self.next_iteration = iteration + 1;
        Ok(message_key)
    }

    /// Verify the envelope signature and decrypt, deriving the
    /// appropriate message key by iteration (§4.F).
    pub fn decrypt(&mut self, envelope: &GroupMessageEnvelope, sender_sig_pk: &[u8]) -> Result<Vec<u8>> {
        if envelope.sender_key_version != self.version {
            return Err(GroupRatchetError::SenderKeyMissing {
                version: envelope.sender_key_version,
            });
        }
        let signed = envelope.signed_bytes();
        pq_sig::verify_detached(sender_sig_pk, &signed, &envelope.signature)
            .map_err(|_| GroupRatchetError::InvalidSignature)?;

        let message_key = self.key_for_iteration(envelope.sender_key_iteration)?;
        let ad = message_ad(
            &envelope.group_id,
            &envelope.sender_username,
            envelope.sender_key_version,
            envelope.sender_key_iteration,
        );
        let mut sealed = envelope.cipher.clone();
        sealed.extend_from_slice(&envelope.mac);
        aead::open(&message_key, &envelope.nonce, &ad, &sealed)
            .map_err(|_| GroupRatchetError::TagMismatch)
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Distribution envelope carried over the peer ratchet (§4.F).
#[derive(Clone, Debug)]
pub struct GroupSenderKeyDist {
    pub group_id: String,
    pub version: u32,
    pub iteration: u32,
    pub ck: [u8; 32],
    pub signature: Vec<u8>,
}

/// Sender-side bookkeeping for a broadcast in flight: which
/// recipients have not yet ACKed, and when to resend (§4.F, §5).
pub struct PendingDistribution {
    pub dist: GroupSenderKeyDist,
    pub pending_recipients: Vec<String>,
    last_sent_ms: u64,
}

impl PendingDistribution {
    pub fn new(dist: GroupSenderKeyDist, recipients: Vec<String>, now_ms: u64) -> Self {
        Self {
            dist,
            pending_recipients: recipients,
            last_sent_ms: now_ms,
        }
    }

    pub fn ack(&mut self, recipient: &str) {
        self.pending_recipients.retain(|r| r != recipient);
    }

    pub fn is_settled(&self) -> bool {
        self.pending_recipients.is_empty()
    }

    /// Whether the 5s resend cadence has elapsed.
    pub fn due_for_resend(&self, now_ms: u64) -> bool {
        !self.is_settled() && now_ms.saturating_sub(self.last_sent_ms) >= SENDER_KEY_DIST_RESEND_MS
    }

    pub fn mark_sent(&mut self, now_ms: u64) {
        self.last_sent_ms = now_ms;
    }
}

/// Rate limiter for `GroupSenderKeyReq`: one per 3s per (sender, version).
#[derive(Default)]
pub struct SenderKeyRequestThrottle {
    last_sent_ms: HashMap<(String, u32), u64>,
}

impl SenderKeyRequestThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true (and records the attempt) if a request for
    /// `(sender, version)` is allowed to go out now.
    pub fn try_request(&mut self, sender: &str, version: u32, now_ms: u64) -> bool {
        let key = (sender.to_string(), version);
        match self.last_sent_ms.get(&key) {
            Some(&last) if now_ms.saturating_sub(last) < SENDER_KEY_REQUEST_MIN_INTERVAL_MS => false,
            _ => {
                self.last_sent_ms.insert(key, now_ms);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_hash_is_order_independent() {
        let a = members_hash(&["bob".into(), "alice".into()]);
        let b = members_hash(&["alice".into(), "bob".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let sig = pq_sig::PqSigKeypair::generate();
        let hash = members_hash(&["alice".into(), "bob".into()]);
        let mut sender = GroupSenderKeyState::new("g1", "alice", hash, 0);
        let envelope = sender.encrypt(b"hello group", &sig).unwrap();

        let dist = sender.distribution(&sig).unwrap();
        let mut receiver = GroupReceiverKeyState::from_distribution(&dist, "alice");
        let pt = receiver.decrypt(&envelope, &sig.public).unwrap();
        assert_eq!(pt, b"hello group");
    }

    #[test]
    fn out_of_order_within_window_derives_all_keys() {
        let sig = pq_sig::PqSigKeypair::generate();
        let hash = members_hash(&["alice".into()]);
        let mut sender = GroupSenderKeyState::new("g1", "alice", hash, 0);
        let dist = sender.distribution(&sig).unwrap();
        let mut receiver = GroupReceiverKeyState::from_distribution(&dist, "alice");

        let envelopes: Vec<_> = (0..6)
            .map(|i| sender.encrypt(format!("m{i}").as_bytes(), &sig).unwrap())
            .collect();
        for idx in [4, 0, 5, 2, 1, 3] {
            let pt = receiver.decrypt(&envelopes[idx], &sig.public).unwrap();
            assert_eq!(pt, format!("m{idx}").as_bytes());
        }
        assert_eq!(receiver.skipped_key_count(), 0);
    }

    #[test]
    fn rotation_on_membership_change_resets_state() {
        let sig = pq_sig::PqSigKeypair::generate();
        let h1 = members_hash(&["alice".into(), "bob".into()]);
        let mut sender = GroupSenderKeyState::new("g1", "alice", h1.clone(), 0);
        let _ = sender.encrypt(b"v1 msg", &sig).unwrap();
        let v1 = sender.version;

        let h2 = members_hash(&["alice".into()]);
        assert!(sender.needs_rotation(0, &h2));
        sender.rotate(h2.clone(), 1_000);
        assert_eq!(sender.version, v1 + 1);
        assert_eq!(sender.next_iteration, 0);
        assert_eq!(sender.sent_count, 0);
        assert_eq!(sender.members_hash, h2);
    }

    #[test]
    fn stale_distribution_is_not_accepted() {
        let sig = pq_sig::PqSigKeypair::generate();
        let hash = members_hash(&["alice".into()]);
        let mut sender = GroupSenderKeyState::new("g1", "alice", hash.clone(), 0);
        let dist_v1 = sender.distribution(&sig).unwrap();
        let receiver = GroupReceiverKeyState::from_distribution(&dist_v1, "alice");

        sender.rotate(hash, 0);
        let _ = sender.encrypt(b"after rotate", &sig).unwrap();
        let dist_v2 = sender.distribution(&sig).unwrap();
        assert!(GroupReceiverKeyState::accept_distribution(Some(&receiver), &dist_v2, &sig.public).unwrap());
        assert!(!GroupReceiverKeyState::accept_distribution(Some(&receiver), &dist_v1, &sig.public).unwrap());
    }

    #[test]
    fn request_throttle_enforces_min_interval() {
        let mut throttle = SenderKeyRequestThrottle::new();
        assert!(throttle.try_request("alice", 2, 0));
        assert!(!throttle.try_request("alice", 2, 1_000));
        assert!(throttle.try_request("alice", 2, 3_000));
    }

    #[test]
    fn envelope_wire_roundtrip() {
        let sig = pq_sig::PqSigKeypair::generate();
        let hash = members_hash(&["alice".into()]);
        let mut sender = GroupSenderKeyState::new("g1", "alice", hash, 0);
        let envelope = sender.encrypt(b"wire test", &sig).unwrap();
        let bytes = envelope.encode();
        let decoded = GroupMessageEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded.group_id, "g1");
        assert_eq!(decoded.cipher, envelope.cipher);
    }
}
