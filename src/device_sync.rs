//! Device sync ratchet (§4.I): a companion-channel ratchet letting a
//! user's devices share sent-message/delivery/rotation state without
//! the server reading the content, plus the pairing handshake that
//! bootstraps it.
//!
//! Grounded on `original_source/client/include/sync_service.h` for the
//! event catalogue and on `secure-legion-core/src/crypto/ratchet.rs`'s
//! chain-key style for the forward-ratcheted message key.

use base32::Alphabet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::limits::{
    DEVICE_SYNC_DEFAULT_MAX_SKIP, DEVICE_SYNC_PAIRING_ATTEMPTS_PER_WINDOW,
    DEVICE_SYNC_PAIRING_TTL_SECS, DEVICE_SYNC_PAIRING_WINDOW_SECS,
};
use crate::primitives::{aead, kdf, rng};

const MSG_INFO: &[u8] = b"mi_e2ee_device_sync_v1_msg";
const MSG_AD_CONTEXT: &[u8] = b"MI_DSYNC_AD_V1";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceSyncError {
    #[error("pairing code expired")]
    PairingExpired,
    #[error("too many pairing attempts, try again later")]
    RateLimited,
    #[error("counter {counter} is outside the replay window (recv_counter {recv_counter}, max_skip {max_skip})")]
    ReplayRejected {
        counter: u64,
        recv_counter: u64,
        max_skip: u64,
    },
    #[error("AEAD decryption failed")]
    TagMismatch,
    #[error("malformed event body")]
    Malformed,
}

pub type Result<T> = std::result::Result<T, DeviceSyncError>;

/// A 16-byte pairing code, generated by the primary device and
/// displayed (base32, no padding) for the user to key into the linked
/// device (§4.I).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PairingCode(pub [u8; 16]);

impl PairingCode {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rng::fill_random(&mut bytes);
        Self(bytes)
    }

    pub fn display(&self) -> String {
        base32::encode(Alphabet::Rfc4648 { padding: false }, &self.0)
    }

    pub fn parse(displayed: &str) -> Option<Self> {
        let bytes = base32::decode(Alphabet::Rfc4648 { padding: false }, displayed)?;
        if bytes.len() != 16 {
            return None;
        }
        let mut out = [0u8; 16];
        out.copy_from_slice(&bytes);
        Some(Self(out))
    }
}

/// Primary-side pairing session bookkeeping: a code plus its issue
/// time, and a rolling per-primary rate limiter (3 attempts / 10 min).
pub struct PairingSession {
    pub code: PairingCode,
    created_at_ms: u64,
    attempt_timestamps: Vec<u64>,
}

impl PairingSession {
    pub fn new(now_ms: u64) -> Self {
        Self {
            code: PairingCode::generate(),
            created_at_ms: now_ms,
            attempt_timestamps: Vec::new(),
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) >= DEVICE_SYNC_PAIRING_TTL_SECS * 1000
    }

    /// Record one linked-device pairing attempt, enforcing the 3-per-
    /// 10-minute rate limit and the TTL.
    pub fn try_attempt(&mut self, now_ms: u64) -> Result<()> {
        if self.is_expired(now_ms) {
            return Err(DeviceSyncError::PairingExpired);
        }
        let window_start = now_ms.saturating_sub(DEVICE_SYNC_PAIRING_WINDOW_SECS * 1000);
        self.attempt_timestamps.retain(|&t| t >= window_start);
        if self.attempt_timestamps.len() as u32 >= DEVICE_SYNC_PAIRING_ATTEMPTS_PER_WINDOW {
            return Err(DeviceSyncError::RateLimited);
        }
        self.attempt_timestamps.push(now_ms);
        Ok(())
    }
}

fn nonce_from_counter(counter: u64) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    nonce
}

fn message_key(device_sync_key: &[u8; 32], counter: u64) -> [u8; 32] {
    kdf::hkdf_expand_32(Some(&counter.to_le_bytes()), device_sync_key, MSG_INFO)
        .expect("hkdf-sha256 32-byte expand cannot fail")
}

fn message_ad(counter: u64) -> Vec<u8> {
    let mut ad = Vec::with_capacity(MSG_AD_CONTEXT.len() + 8);
    ad.extend_from_slice(MSG_AD_CONTEXT);
    ad.extend_from_slice(&counter.to_le_bytes());
    ad
}

/// The per-device-pair ratchet state. `device_sync_key` is delivered
/// once over the peer ratchet during pairing approval and thereafter
/// only ever rotated by a signed `RotateKey` event.
pub struct DeviceSyncRatchet {
    device_sync_key: [u8; 32],
    pub send_counter: u64,
    pub recv_counter: u64,
    pub max_skip: u64,
    rotated_at_ms: u64,
    sent_since_rotation: u64,
    rotate_message_limit: u64,
    rotate_interval_sec: u64,
}

impl Drop for DeviceSyncRatchet {
    fn drop(&mut self) {
        self.device_sync_key.zeroize();
    }
}

impl DeviceSyncRatchet {
    pub fn new(
        device_sync_key: [u8; 32],
        now_ms: u64,
        rotate_message_limit: u64,
        rotate_interval_sec: u64,
    ) -> Self {
        Self {
            device_sync_key,
            send_counter: 0,
            recv_counter: 0,
            max_skip: DEVICE_SYNC_DEFAULT_MAX_SKIP,
            rotated_at_ms: now_ms,
            sent_since_rotation: 0,
            rotate_message_limit,
            rotate_interval_sec,
        }
    }

    pub fn needs_rotation(&self, now_ms: u64) -> bool {
        self.sent_since_rotation >= self.rotate_message_limit
            || now_ms.saturating_sub(self.rotated_at_ms) >= self.rotate_interval_sec * 1000
    }

    /// Adopt a fresh key from a received (or locally broadcast)
    /// `RotateKey` event.
    pub fn rotate(&mut self, new_key: [u8; 32], now_ms: u64) {
        self.device_sync_key = new_key;
        self.send_counter = 0;
        self.recv_counter = 0;
        self.rotated_at_ms = now_ms;
        self.sent_since_rotation = 0;
    }

    /// Encrypt one event, advancing `send_counter`.
    pub fn encrypt(&mut self, event: &DeviceSyncEvent) -> Result<DeviceSyncEnvelope> {
        let counter = self.send_counter;
        let body = event.encode();
        let key = message_key(&self.device_sync_key, counter);
        let nonce = nonce_from_counter(counter);
        let ad = message_ad(counter);
        let cipher = aead::seal(&key, &nonce, &ad, &body).expect("fixed key/nonce lengths");
        self.send_counter += 1;
        self.sent_since_rotation += 1;
        Ok(DeviceSyncEnvelope { counter, cipher })
    }

    /// Decrypt one envelope, enforcing the replay window
    /// `counter > recv_counter - max_skip` (§4.I, §8 scenario S6).
    pub fn decrypt(&mut self, envelope: &DeviceSyncEnvelope) -> Result<DeviceSyncEvent> {
        if envelope.counter + self.max_skip < self.recv_counter {
            return Err(DeviceSyncError::ReplayRejected {
                counter: envelope.counter,
                recv_counter: self.recv_counter,
                max_skip: self.max_skip,
            });
        }
        let key = message_key(&self.device_sync_key, envelope.counter);
        let nonce = nonce_from_counter(envelope.counter);
        let ad = message_ad(envelope.counter);
        let plaintext = aead::open(&key, &nonce, &ad, &envelope.cipher)
            .map_err(|_| DeviceSyncError::TagMismatch)?;
        if envelope.counter >= self.recv_counter {
            self.recv_counter = envelope.counter + 1;
        }
        DeviceSyncEvent::decode(&plaintext)
    }
}

/// Wire envelope: a counter and the AEAD ciphertext (tag appended).
#[derive(Clone, Debug)]
pub struct DeviceSyncEnvelope {
    pub counter: u64,
    pub cipher: Vec<u8>,
}

/// Event catalogue (§4.I + `original_source/client/include/sync_service.h`):
/// one byte `kind` followed by a bincode-encoded body carrying only
/// identifiers/counters needed to replay the side effect on the linked
/// device — never plaintext message bodies (§4.I Purpose: "without the
/// server reading the content" extends to the linked device only ever
/// seeing ciphertext handles, not content, for message events).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceSyncEvent {
    SendPrivate { peer: String, ratchet_counter: u64 },
    SendGroup { group_id: String, sender_key_version: u32, iteration: u32 },
    Message { conversation_id: String, message_id: [u8; 16] },
    Delivery { message_id: [u8; 16], delivered_at_ms: u64 },
    GroupNotice { group_id: String, notice_seq: u64 },
    RotateKey { new_device_sync_key: [u8; 32] },
    HistorySnapshot { up_to_message_id: [u8; 16] },
}

impl DeviceSyncEvent {
    fn kind(&self) -> u8 {
        match self {
            DeviceSyncEvent::SendPrivate { .. } => 1,
            DeviceSyncEvent::SendGroup { .. } => 2,
            DeviceSyncEvent::Message { .. } => 3,
            DeviceSyncEvent::Delivery { .. } => 4,
            DeviceSyncEvent::GroupNotice { .. } => 5,
            DeviceSyncEvent::RotateKey { .. } => 6,
            DeviceSyncEvent::HistorySnapshot { .. } => 7,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.kind()];
        out.extend(bincode::serialize(self).expect("event bodies are always serializable"));
        out
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(DeviceSyncError::Malformed);
        }
        bincode::deserialize(&data[1..]).map_err(|_| DeviceSyncError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_code_display_roundtrips() {
        let code = PairingCode::generate();
        let displayed = code.display();
        assert_eq!(PairingCode::parse(&displayed), Some(code));
    }

    #[test]
    fn pairing_rate_limit_enforced() {
        let mut session = PairingSession::new(0);
        assert!(session.try_attempt(0).is_ok());
        assert!(session.try_attempt(1_000).is_ok());
        assert!(session.try_attempt(2_000).is_ok());
        assert!(session.try_attempt(3_000).is_err());
    }

    #[test]
    fn pairing_expires_after_ttl() {
        let session = PairingSession::new(0);
        assert!(!session.is_expired(599_000));
        assert!(session.is_expired(600_000));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = rng::random_32();
        let mut primary = DeviceSyncRatchet::new(key, 0, 1000, 86_400);
        let mut linked = DeviceSyncRatchet::new(key, 0, 1000, 86_400);
        let event = DeviceSyncEvent::Delivery {
            message_id: [1u8; 16],
            delivered_at_ms: 42,
        };
        let envelope = primary.encrypt(&event).unwrap();
        let decoded = linked.decrypt(&envelope).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn out_of_order_within_window_all_accepted() {
        let key = rng::random_32();
        let mut primary = DeviceSyncRatchet::new(key, 0, 1000, 86_400);
        let mut linked = DeviceSyncRatchet::new(key, 0, 1000, 86_400);
        let envelopes: Vec<_> = (1..=5)
            .map(|i| {
                primary
                    .encrypt(&DeviceSyncEvent::Message {
                        conversation_id: "c".into(),
                        message_id: [i as u8; 16],
                    })
                    .unwrap()
            })
            .collect();
        for idx in [1, 0, 3, 2, 4] {
            linked.decrypt(&envelopes[idx]).unwrap();
        }
    }

    #[test]
    fn counter_beyond_max_skip_is_rejected() {
        let key = rng::random_32();
        let mut primary = DeviceSyncRatchet::new(key, 0, 1000, 86_400);
        let mut linked = DeviceSyncRatchet::new(key, 0, 1000, 86_400);
        // counter 40 then counter 6, with max_skip=32 (S6): 6 is rejected.
        let envelopes: Vec<_> = (0..41)
            .map(|_| {
                primary
                    .encrypt(&DeviceSyncEvent::HistorySnapshot {
                        up_to_message_id: [0u8; 16],
                    })
                    .unwrap()
            })
            .collect();
        linked.decrypt(&envelopes[40]).unwrap();
        assert!(matches!(
            linked.decrypt(&envelopes[6]),
            Err(DeviceSyncError::ReplayRejected { .. })
        ));
    }

    #[test]
    fn rotate_key_resets_counters() {
        let key = rng::random_32();
        let mut ratchet = DeviceSyncRatchet::new(key, 0, 1000, 86_400);
        let _ = ratchet.encrypt(&DeviceSyncEvent::RotateKey {
            new_device_sync_key: [0u8; 32],
        });
        assert_eq!(ratchet.send_counter, 1);
        ratchet.rotate(rng::random_32(), 1_000);
        assert_eq!(ratchet.send_counter, 0);
        assert_eq!(ratchet.recv_counter, 0);
    }
}
