//! # mi-e2ee
//!
//! Cryptographic core of a federated end-to-end encrypted messaging
//! system: a secure channel, an OPAQUE-style PAKE, a hybrid
//! post-quantum double ratchet for one-to-one sessions, a sender-key
//! ratchet for groups, an append-only key-transparency log with
//! gossip-based equivocation detection, a companion-device sync
//! ratchet, and group-call key distribution.
//!
//! This crate is the protocol core only — no network sockets, no
//! database, no UI. Callers drive the state machines with bytes they
//! received from a transport of their choosing and get back bytes to
//! send, plus plaintext.
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`primitives`] | AEAD, classical DH, hashing, HKDF, hybrid/PQ KEM, PQ signatures, RNG |
//! | [`framing`] | Fixed-header wire frames and the length-prefixed read/write cursor |
//! | [`identity`] | Per-device identity, prekey bundles, fingerprints |
//! | [`secure_channel`] | Per-session AEAD channel with a 64-bit replay window |
//! | [`pake`] | OPAQUE-style registration/login producing a session key |
//! | [`ratchet`] | Hybrid X3DH handshake + double ratchet for 1:1 sessions |
//! | [`group_ratchet`] | Sender-key ratchet for group messaging |
//! | [`kt`] | Append-only Merkle key-transparency log, inclusion/consistency proofs |
//! | [`gossip`] | Peer-to-peer tree-head exchange for equivocation detection |
//! | [`device_sync`] | Companion-device pairing and forward-ratcheted sync channel |
//! | [`group_call`] | Per-call symmetric key distribution for group voice/video |
//! | [`envelope`] | The plaintext chat envelope recovered after ratchet decrypt |
//! | [`padding`] | Length-hiding padding to fixed bucket sizes |
//! | [`persist`] | Atomic temp-then-rename persistence for on-disk state |
//! | [`error`] | Shared error taxonomy |
//! | [`limits`] | Named resource-bound constants |
//! | [`config`] | Runtime-overridable tuning layered above `limits` |
//! | [`time`] | Injected clock abstraction used by every TTL/backoff |
//! | [`actor`] | Single-threaded actor harness over `tokio::sync::mpsc` |

#![allow(clippy::too_many_arguments, clippy::type_complexity)]

pub mod actor;
pub mod config;
pub mod device_sync;
pub mod envelope;
pub mod error;
pub mod framing;
pub mod gossip;
pub mod group_call;
pub mod group_ratchet;
pub mod identity;
pub mod kt;
pub mod limits;
pub mod padding;
pub mod pake;
pub mod persist;
pub mod primitives;
pub mod ratchet;
pub mod secure_channel;
pub mod time;

/// Crate version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
        assert!(version().contains('.'));
    }
}
