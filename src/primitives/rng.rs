//! CSPRNG helpers.

use rand::RngCore;
use rand_chacha::ChaCha20Rng;
use rand_core::{OsRng, SeedableRng};

/// Fill a buffer with OS-sourced randomness.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

pub fn random_32() -> [u8; 32] {
    let mut out = [0u8; 32];
    fill_random(&mut out);
    out
}

pub fn random_24() -> [u8; 24] {
    let mut out = [0u8; 24];
    fill_random(&mut out);
    out
}

/// Deterministic RNG from a 32-byte seed, for reproducible key
/// generation in tests and for seed-derived keypairs.
pub fn rng_from_seed(seed: [u8; 32]) -> ChaCha20Rng {
    ChaCha20Rng::from_seed(seed)
}
