//! Primitive cryptographic building blocks, each module wrapping one
//! concern (AEAD, classical DH, hashing, HKDF, hybrid/PQ KEM, PQ
//! signatures, Ed25519 signatures, RNG) behind a small typed API. The
//! higher-level state machines (`ratchet`, `group_ratchet`, `kt`, ...)
//! compose these rather than calling the underlying crates directly.

pub mod aead;
pub mod dh;
pub mod hash;
pub mod kdf;
pub mod kem;
pub mod pq_sig;
pub mod rng;
pub mod sig;
