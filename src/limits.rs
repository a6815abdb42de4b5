//! Resource-bound constants from the concurrency & resource model.
//!
//! Named constants rather than magic numbers scattered through the
//! state machines, in the style of the CRDT resource guardrails this
//! crate's teacher keeps in one place.

/// Peer ratchet: max reorder distance before `RatchetOutOfOrder`.
pub const MAX_SKIP_PEER_RATCHET: u64 = 1_000;
/// Peer ratchet: skipped-key cache cap per peer session (FIFO evict).
pub const MAX_SKIPPED_KEYS_PEER: usize = 2_048;

/// Sender-key ratchet: skipped-key cache cap per (group, sender).
pub const MAX_SKIPPED_KEYS_GROUP: usize = 2_048;
/// Sender-key ratchet: tolerated out-of-order window in iterations.
pub const MAX_SKIP_WINDOW_GROUP: u32 = 4_096;
/// Sender-key rotation: message-count threshold.
pub const SENDER_KEY_ROTATE_AFTER_MESSAGES: u64 = 10_000;
/// Sender-key rotation: age threshold in seconds (7 days).
pub const SENDER_KEY_ROTATE_AFTER_SECS: u64 = 7 * 24 * 60 * 60;
/// Sender-key distribution resend cadence.
pub const SENDER_KEY_DIST_RESEND_MS: u64 = 5_000;
/// Sender-key request rate limit, per (sender, version).
pub const SENDER_KEY_REQUEST_MIN_INTERVAL_MS: u64 = 3_000;

/// KEM-ratchet interval for the peer double ratchet (messages between
/// fresh KEM encapsulations). Not mandated by name in the spec; kept
/// at the teacher's default (see DESIGN.md).
pub const KEM_RATCHET_INTERVAL: u64 = 50;

/// Pending group ciphers cap per receiver (awaiting a sender-key).
pub const MAX_PENDING_GROUP_CIPHERS: usize = 512;

/// OPAQUE pending login-state TTL.
pub const PAKE_PENDING_TTL_SECS: u64 = 90;
/// OPAQUE throttle: failures within this window before backoff kicks in.
pub const PAKE_FAILURE_WINDOW_SECS: u64 = 60;
/// OPAQUE throttle: failure count that triggers the first backoff.
pub const PAKE_FAILURE_THRESHOLD: u32 = 5;
/// OPAQUE throttle: base backoff seconds (doubles per failure past threshold).
pub const PAKE_BACKOFF_BASE_SECS: u64 = 30;
/// OPAQUE throttle: backoff cap.
pub const PAKE_BACKOFF_CAP_SECS: u64 = 900;

/// Device sync: default max reorder tolerance.
pub const DEVICE_SYNC_DEFAULT_MAX_SKIP: u64 = 32;
/// Device sync: pairing code validity window.
pub const DEVICE_SYNC_PAIRING_TTL_SECS: u64 = 10 * 60;
/// Device sync: pairing attempts per primary per window.
pub const DEVICE_SYNC_PAIRING_ATTEMPTS_PER_WINDOW: u32 = 3;
pub const DEVICE_SYNC_PAIRING_WINDOW_SECS: u64 = 10 * 60;

/// Frame payload cap (§6).
pub const MAX_FRAME_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Session-wide compromise thresholds (§7 propagation policy).
pub const CONSECUTIVE_DECRYPT_FAILURES_FATAL: u32 = 5;

/// Status of a bound check, mirroring the crate's cap-check helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundStatus {
    Ok,
    AtCap,
    Exceeded,
}

/// Check a running count against a soft cap, returning how close to
/// the limit the caller is so it can decide whether to evict before
/// inserting.
pub fn check_cap(current_len: usize, cap: usize) -> BoundStatus {
    if current_len < cap {
        BoundStatus::Ok
    } else if current_len == cap {
        BoundStatus::AtCap
    } else {
        BoundStatus::Exceeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_check_boundaries() {
        assert_eq!(check_cap(10, 2048), BoundStatus::Ok);
        assert_eq!(check_cap(2048, 2048), BoundStatus::AtCap);
        assert_eq!(check_cap(2049, 2048), BoundStatus::Exceeded);
    }
}
