//! Error taxonomy shared across every component.
//!
//! Variants never carry key material or plaintext — only identifiers,
//! lengths and counters, so a `Display`'d error is safe to log.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("replay rejected (seq/counter {seq})")]
    ReplayRejected { seq: u64 },

    #[error("AEAD tag mismatch")]
    TagMismatch,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("peer bundle missing for {username}")]
    PeerBundleMissing { username: String },

    #[error("ratchet out of order: skip {requested} exceeds MAX_SKIP {max_skip}")]
    RatchetOutOfOrder { requested: u64, max_skip: u64 },

    #[error("unknown session {session_id}")]
    UnknownSession { session_id: String },

    #[error("unknown login {login_id}")]
    UnknownLogin { login_id: String },

    #[error("unknown user {username}")]
    UnknownUser { username: String },

    #[error("gossip mismatch at tree_size {tree_size}")]
    GossipMismatch { tree_size: u64 },

    #[error("inclusion/consistency proof failed to verify")]
    ProofFailed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("session compromise suspected, re-handshake required")]
    SessionCompromisedSuspected,

    #[error("key exhausted")]
    KeyExhausted,

    #[error("truncated frame or payload")]
    Truncated,
}

impl CoreError {
    /// Per-message failures stay local to the frame; these are the
    /// ones that, repeated past a threshold, escalate to
    /// `SessionCompromisedSuspected` (see §7 propagation policy).
    pub fn is_session_fatal_candidate(&self) -> bool {
        matches!(
            self,
            CoreError::ReplayRejected { .. } | CoreError::TagMismatch
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
