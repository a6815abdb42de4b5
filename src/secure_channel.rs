//! Per-session AEAD secure channel with a 64-bit replay window (§4.C).
//!
//! Ported from `original_source/server/src/secure_channel.cpp`
//! (`CanAcceptSeq`/`MarkSeqReceived` bitmap logic, `BuildNonce`/
//! `BuildAd`), restyled in the shape of the teacher's
//! `EncryptionError`-style `thiserror` enum and wire-layout doc
//! comments (`secure-legion-core/src/crypto/encryption.rs`).

use thiserror::Error;

use crate::framing::frame::FrameType;
use crate::limits::CONSECUTIVE_DECRYPT_FAILURES_FATAL;
use crate::primitives::aead;
use crate::primitives::kdf::keyed_blake2b_32;

const SEQ_HEADER_BYTES: usize = 8;
const TAG_BYTES: usize = 16;
const REPLAY_WINDOW_BITS: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecureChannelError {
    #[error("AEAD tag mismatch")]
    TagMismatch,
    #[error("replay rejected (seq {seq})")]
    ReplayRejected { seq: u64 },
    #[error("truncated ciphertext")]
    Truncated,
    #[error("session compromise suspected — re-handshake required")]
    SessionCompromisedSuspected,
}

pub type Result<T> = std::result::Result<T, SecureChannelError>;

fn build_nonce(seq: u64) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[0..8].copy_from_slice(&seq.to_le_bytes());
    nonce
}

fn build_ad(frame_type: FrameType, seq: u64) -> [u8; 10] {
    let mut ad = [0u8; 10];
    ad[0..2].copy_from_slice(&frame_type.code().to_le_bytes());
    ad[2..10].copy_from_slice(&seq.to_le_bytes());
    ad
}

/// Per-(device, server) secure channel session state (§3).
pub struct SecureChannel {
    tx_key: [u8; 32],
    rx_key: [u8; 32],
    tx_seq: u64,
    recv_inited: bool,
    recv_max_seq: u64,
    recv_window: u64,
    consecutive_decrypt_failures: u32,
    compromised: bool,
}

impl SecureChannel {
    /// Derive the two directional keys from the PAKE-derived `kcp_key`
    /// via keyed BLAKE2b (§4.C), and pick tx/rx by role.
    pub fn new(kcp_key: &[u8; 32], role: Role) -> Self {
        let c2s = keyed_blake2b_32(kcp_key, b"mi_e2ee_secure_channel_v2_c2s")
            .expect("blake2b keying with a valid 32-byte key cannot fail");
        let s2c = keyed_blake2b_32(kcp_key, b"mi_e2ee_secure_channel_v2_s2c")
            .expect("blake2b keying with a valid 32-byte key cannot fail");
        let (tx_key, rx_key) = match role {
            Role::Client => (c2s, s2c),
            Role::Server => (s2c, c2s),
        };
        Self {
            tx_key,
            rx_key,
            tx_seq: 0,
            recv_inited: false,
            recv_max_seq: 0,
            recv_window: 0,
            consecutive_decrypt_failures: 0,
            compromised: false,
        }
    }

    /// Next sequence number this channel will use to send, without
    /// consuming it. Callers that manage their own sequence counter
    /// (e.g. a caller replaying a specific `seq` for tests) may ignore
    /// this and call [`Self::encrypt_with_seq`] directly.
    pub fn next_tx_seq(&self) -> u64 {
        self.tx_seq
    }

    /// Encrypt and advance the local send sequence.
    pub fn encrypt(&mut self, frame_type: FrameType, plaintext: &[u8]) -> Vec<u8> {
        let seq = self.tx_seq;
        self.tx_seq += 1;
        self.encrypt_with_seq(seq, frame_type, plaintext)
    }

    /// Encrypt under an explicit sequence number (§8 S2 uses this
    /// directly to construct a fixed test vector).
    pub fn encrypt_with_seq(&self, seq: u64, frame_type: FrameType, plaintext: &[u8]) -> Vec<u8> {
        let nonce = build_nonce(seq);
        let ad = build_ad(frame_type, seq);
        let sealed = aead::seal(&self.tx_key, &nonce, &ad, plaintext)
            .expect("key/nonce lengths are fixed and valid");
        let mut out = Vec::with_capacity(SEQ_HEADER_BYTES + sealed.len());
        out.extend_from_slice(&seq.to_le_bytes());
        out.extend_from_slice(&sealed);
        out
    }

    fn can_accept_seq(&self, seq: u64) -> bool {
        if !self.recv_inited {
            return true;
        }
        if seq > self.recv_max_seq {
            return true;
        }
        let diff = self.recv_max_seq - seq;
        if diff >= REPLAY_WINDOW_BITS {
            return false;
        }
        (self.recv_window >> diff) & 1 == 0
    }

    fn mark_seq_received(&mut self, seq: u64) {
        if !self.recv_inited {
            self.recv_inited = true;
            self.recv_max_seq = seq;
            self.recv_window = 1;
            return;
        }
        if seq > self.recv_max_seq {
            let shift = seq - self.recv_max_seq;
            self.recv_window = if shift >= REPLAY_WINDOW_BITS {
                1
            } else {
                (self.recv_window << shift) | 1
            };
            self.recv_max_seq = seq;
            return;
        }
        let diff = self.recv_max_seq - seq;
        if diff < REPLAY_WINDOW_BITS {
            self.recv_window |= 1 << diff;
        }
    }

    /// Decrypt one wire frame. Per-frame failures (`TagMismatch`,
    /// `ReplayRejected`) leave the replay window untouched so a later
    /// valid seq is still accepted (§4.C); five consecutive decrypt
    /// failures escalate to `SessionCompromisedSuspected` and latch
    /// the channel closed (§7 propagation policy).
    pub fn decrypt(&mut self, frame_type: FrameType, input: &[u8]) -> Result<Vec<u8>> {
        if self.compromised {
            return Err(SecureChannelError::SessionCompromisedSuspected);
        }
        if input.len() < SEQ_HEADER_BYTES + TAG_BYTES {
            log::warn!("secure_channel: truncated frame ({} bytes)", input.len());
            return Err(SecureChannelError::Truncated);
        }
        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&input[0..SEQ_HEADER_BYTES]);
        let seq = u64::from_le_bytes(seq_bytes);

        if !self.can_accept_seq(seq) {
            log::warn!("secure_channel: replay rejected at seq {seq}");
            return Err(SecureChannelError::ReplayRejected { seq });
        }

        let nonce = build_nonce(seq);
        let ad = build_ad(frame_type, seq);
        let ciphertext = &input[SEQ_HEADER_BYTES..];
        match aead::open(&self.rx_key, &nonce, &ad, ciphertext) {
            Ok(plaintext) => {
                self.mark_seq_received(seq);
                self.consecutive_decrypt_failures = 0;
                log::debug!("secure_channel: decrypted seq {seq}");
                Ok(plaintext)
            }
            Err(_) => {
                self.consecutive_decrypt_failures += 1;
                if self.consecutive_decrypt_failures >= CONSECUTIVE_DECRYPT_FAILURES_FATAL {
                    self.compromised = true;
                    log::error!(
                        "secure_channel: {} consecutive decrypt failures, session compromised",
                        self.consecutive_decrypt_failures
                    );
                    return Err(SecureChannelError::SessionCompromisedSuspected);
                }
                log::warn!("secure_channel: tag mismatch at seq {seq}");
                Err(SecureChannelError::TagMismatch)
            }
        }
    }
}
