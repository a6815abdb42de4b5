//! SHA-256 helpers and the identity fingerprint formula (§3).

use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}

/// Identity fingerprint: lowercase hex SHA-256 over a domain-separated
/// concatenation of (username, id_sig_pk, id_dh_pk).
///
/// Domain separation uses length-prefixed fields so no ambiguity arises
/// between e.g. a long username and a short one shifting key bytes.
pub fn identity_fingerprint(username: &str, id_sig_pk: &[u8], id_dh_pk: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"mi_e2ee_identity_fingerprint_v1");
    hasher.update((username.len() as u32).to_le_bytes());
    hasher.update(username.as_bytes());
    hasher.update((id_sig_pk.len() as u32).to_le_bytes());
    hasher.update(id_sig_pk);
    hasher.update((id_dh_pk.len() as u32).to_le_bytes());
    hasher.update(id_dh_pk);
    hex::encode(hasher.finalize())
}

/// RFC 6962-style leaf hash: SHA-256(0x00 ‖ leaf_bytes).
pub fn leaf_hash(leaf_bytes: &[u8]) -> [u8; 32] {
    sha256_concat(&[&[0x00u8], leaf_bytes])
}

/// RFC 6962-style internal node hash: SHA-256(0x01 ‖ L ‖ R).
pub fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    sha256_concat(&[&[0x01u8], left, right])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_hex() {
        let fp1 = identity_fingerprint("alice", &[1u8; 32], &[2u8; 32]);
        let fp2 = identity_fingerprint("alice", &[1u8; 32], &[2u8; 32]);
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 64);
        assert!(fp1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_distinguishes_username_key_boundary() {
        // Without length prefixes "ab"+"c..." could collide with "abc"+"...".
        let fp1 = identity_fingerprint("ab", b"cXYZ", &[0u8; 32]);
        let fp2 = identity_fingerprint("abc", b"XYZ", &[0u8; 32]);
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn leaf_and_node_hash_are_domain_separated() {
        let leaf = leaf_hash(b"hello");
        let node = node_hash(&leaf, &leaf);
        assert_ne!(leaf, node);
    }
}
