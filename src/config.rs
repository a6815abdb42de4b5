//! Runtime-overridable tuning knobs, layered above the hardcoded
//! constants in [`crate::limits`].
//!
//! Restyled after `shield-protocol/src/crdt/limits.rs`'s
//! `MAX_OP_PAYLOAD_BYTES`-style named constants: the constants
//! themselves stay as compile-time defaults (components like
//! [`crate::ratchet`] read them directly, matching the teacher's
//! "one place for resource bounds" convention), while this module
//! adds a config struct for the handful of tunables a composition
//! root legitimately wants to override per-deployment (e.g. a test
//! harness that wants sender-key rotation to trigger in seconds, not
//! days). Nothing in the crate is *forced* through this struct; it is
//! additive, not a replacement for `limits`.

use crate::limits::{
    DEVICE_SYNC_DEFAULT_MAX_SKIP, KEM_RATCHET_INTERVAL, SENDER_KEY_ROTATE_AFTER_MESSAGES,
    SENDER_KEY_ROTATE_AFTER_SECS,
};

/// Sender-key (group) ratchet rotation policy (§4.F "Rotation
/// triggers"). Defaults mirror [`crate::limits`]; override for
/// deployments that want tighter or looser rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupRatchetConfig {
    pub rotate_after_messages: u64,
    pub rotate_after_secs: u64,
}

impl Default for GroupRatchetConfig {
    fn default() -> Self {
        Self {
            rotate_after_messages: SENDER_KEY_ROTATE_AFTER_MESSAGES,
            rotate_after_secs: SENDER_KEY_ROTATE_AFTER_SECS,
        }
    }
}

/// Peer double-ratchet tuning (§4.E). `kem_ratchet_interval` is the
/// Open Question DESIGN.md resolves by keeping the teacher's default;
/// exposed here so a caller can dial it without touching
/// [`crate::ratchet`] itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerRatchetConfig {
    pub kem_ratchet_interval: u64,
}

impl Default for PeerRatchetConfig {
    fn default() -> Self {
        Self {
            kem_ratchet_interval: KEM_RATCHET_INTERVAL,
        }
    }
}

/// Device sync ratchet tuning (§4.I).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceSyncConfig {
    pub max_skip: u64,
}

impl Default for DeviceSyncConfig {
    fn default() -> Self {
        Self {
            max_skip: DEVICE_SYNC_DEFAULT_MAX_SKIP,
        }
    }
}

/// Top-level bundle a composition root constructs once and threads
/// through to whichever components accept overrides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub group_ratchet: GroupRatchetConfig,
    pub peer_ratchet: PeerRatchetConfig,
    pub device_sync: DeviceSyncConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_limits_constants() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.group_ratchet.rotate_after_messages, SENDER_KEY_ROTATE_AFTER_MESSAGES);
        assert_eq!(cfg.peer_ratchet.kem_ratchet_interval, KEM_RATCHET_INTERVAL);
        assert_eq!(cfg.device_sync.max_skip, DEVICE_SYNC_DEFAULT_MAX_SKIP);
    }

    #[test]
    fn overrides_are_independent_of_defaults() {
        let cfg = GroupRatchetConfig {
            rotate_after_messages: 10,
            rotate_after_secs: 60,
        };
        assert_ne!(cfg.rotate_after_messages, SENDER_KEY_ROTATE_AFTER_MESSAGES);
    }
}
