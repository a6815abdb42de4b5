//! Key Transparency log (§4.G): an append-only Merkle tree of leaf
//! hashes, RFC 6962-style inclusion and consistency proofs, and a
//! Signed Tree Head.
//!
//! Grounded on `original_source/server/include/key_transparency.h`'s
//! `KeyTransparencyLog` shape (`latest_by_user`, a power-of-two level
//! cache, `RebuildPow2LevelsLocked`) — restyled here as a single-writer
//! value type driven by an `actor::Actor` (§5) instead of the
//! original's `std::mutex`-guarded class.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::persist::{self, PersistError, KT_LOG_RECORD_MAGIC};
use crate::primitives::hash;
use crate::primitives::pq_sig::{self, PqSigKeypair};

const STH_SIG_CONTEXT: &[u8] = b"MI_KT_STH_V1";

#[derive(Error, Debug)]
pub enum KtError {
    #[error("leaf index {index} out of range for tree size {tree_size}")]
    IndexOutOfRange { index: usize, tree_size: usize },
    #[error("old size {old} exceeds new size {new}")]
    SizesOutOfOrder { old: usize, new: usize },
    #[error("proof did not verify")]
    ProofFailed,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
}

pub type Result<T> = std::result::Result<T, KtError>;

fn largest_pow2_lt(n: usize) -> usize {
    let mut k = 1usize;
    while k * 2 < n {
        k *= 2;
    }
    k
}

/// Signed Tree Head: `sig = PQ-sign(sk, "MI_KT_STH_V1" ‖ tree_size_LE8 ‖ root)`.
#[derive(Clone, Debug)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub root: [u8; 32],
    pub signature: Vec<u8>,
}

fn sth_message(tree_size: u64, root: &[u8; 32]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(STH_SIG_CONTEXT.len() + 8 + 32);
    msg.extend_from_slice(STH_SIG_CONTEXT);
    msg.extend_from_slice(&tree_size.to_le_bytes());
    msg.extend_from_slice(root);
    msg
}

impl SignedTreeHead {
    pub fn verify(&self, sig_pk: &[u8]) -> Result<()> {
        let msg = sth_message(self.tree_size, &self.root);
        pq_sig::verify_detached(sig_pk, &msg, &self.signature)
            .map_err(|_| KtError::InvalidSignature)
    }
}

/// The append-only log itself: leaf hashes plus the latest-index map
/// and a power-of-two level cache (§4.G: "memoises the hash of the
/// left-filled subtree of size 2^k"). Cache entries, once computed,
/// never go stale: an append-only log never edits earlier leaves, so
/// `MTH(D[0..2^k])` is fixed forever once leaf `2^k - 1` exists.
pub struct KtLog {
    leaves: Vec<[u8; 32]>,
    latest_by_user: HashMap<String, usize>,
    level_cache: HashMap<u32, [u8; 32]>,
    log_path: Option<PathBuf>,
}

impl KtLog {
    pub fn new() -> Self {
        Self {
            leaves: Vec::new(),
            latest_by_user: HashMap::new(),
            level_cache: HashMap::new(),
            log_path: None,
        }
    }

    /// Replay every record in `path` (§6: "on load the whole file is
    /// replayed"). Each record body is `username_len_u16 ‖ username ‖
    /// leaf_bytes`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut log = Self::new();
        log.log_path = Some(path.to_path_buf());
        for record in persist::read_all_records(path, KT_LOG_RECORD_MAGIC)? {
            if record.len() < 2 {
                continue;
            }
            let ulen = u16::from_le_bytes([record[0], record[1]]) as usize;
            let username = String::from_utf8_lossy(&record[2..2 + ulen]).to_string();
            let leaf_bytes = &record[2 + ulen..];
            log.append_in_memory(&username, leaf_bytes);
        }
        Ok(log)
    }

    fn append_in_memory(&mut self, username: &str, leaf_bytes: &[u8]) -> usize {
        let idx = self.leaves.len();
        self.leaves.push(hash::leaf_hash(leaf_bytes));
        self.latest_by_user.insert(username.to_string(), idx);

        let n = self.leaves.len();
        if n.is_power_of_two() {
            let k = n.trailing_zeros();
            let h = self.mth(0, n);
            self.level_cache.insert(k, h);
        }
        idx
    }

    /// Append a new leaf, persisting it to the backing file (if any)
    /// before committing it in memory, so a crash mid-append never
    /// advances the in-memory view ahead of disk.
    pub fn append(&mut self, username: &str, leaf_bytes: &[u8]) -> Result<usize> {
        if let Some(path) = &self.log_path {
            let mut body = Vec::with_capacity(2 + username.len() + leaf_bytes.len());
            body.extend_from_slice(&(username.len() as u16).to_le_bytes());
            body.extend_from_slice(username.as_bytes());
            body.extend_from_slice(leaf_bytes);
            persist::append_record(path, KT_LOG_RECORD_MAGIC, &body)?;
        }
        Ok(self.append_in_memory(username, leaf_bytes))
    }

    pub fn tree_size(&self) -> usize {
        self.leaves.len()
    }

    pub fn latest_index(&self, username: &str) -> Option<usize> {
        self.latest_by_user.get(username).copied()
    }

    fn mth(&self, start: usize, len: usize) -> [u8; 32] {
        if len == 1 {
            return self.leaves[start];
        }
        if start == 0 && len.is_power_of_two() {
            if let Some(h) = self.level_cache.get(&len.trailing_zeros()) {
                return *h;
            }
        }
        let k = largest_pow2_lt(len);
        let l = self.mth(start, k);
        let r = self.mth(start + k, len - k);
        hash::node_hash(&l, &r)
    }

    /// Root hash for the current tree size. RFC 6962 defines the empty
    /// tree's hash as `SHA-256()`.
    pub fn root(&self) -> [u8; 32] {
        if self.leaves.is_empty() {
            return hash::sha256(b"");
        }
        self.mth(0, self.leaves.len())
    }

    pub fn sign_head(&self, sig: &PqSigKeypair) -> Result<SignedTreeHead> {
        let tree_size = self.leaves.len() as u64;
        let root = self.root();
        let signature = sig
            .sign(&sth_message(tree_size, &root))
            .map_err(|_| KtError::InvalidSignature)?;
        Ok(SignedTreeHead {
            tree_size,
            root,
            signature,
        })
    }

    fn path(&self, m: usize, start: usize, len: usize) -> Vec<[u8; 32]> {
        if len == 1 {
            return Vec::new();
        }
        let k = largest_pow2_lt(len);
        if m < k {
            let mut p = self.path(m, start, k);
            p.push(self.mth(start + k, len - k));
            p
        } else {
            let mut p = self.path(m - k, start + k, len - k);
            p.push(self.mth(start, k));
            p
        }
    }

    /// Audit path for `leaf_index` against the log's current size —
    /// the list of sibling hashes from leaf to root (§4.G).
    pub fn inclusion_proof(&self, leaf_index: usize) -> Result<Vec<[u8; 32]>> {
        let n = self.leaves.len();
        if leaf_index >= n {
            return Err(KtError::IndexOutOfRange {
                index: leaf_index,
                tree_size: n,
            });
        }
        Ok(self.path(leaf_index, 0, n))
    }

    fn subproof(&self, m: usize, start: usize, len: usize, b: bool) -> Vec<[u8; 32]> {
        if m == len {
            if b {
                Vec::new()
            } else {
                vec![self.mth(start, len)]
            }
        } else {
            let k = largest_pow2_lt(len);
            if m <= k {
                let mut p = self.subproof(m, start, k, b);
                p.push(self.mth(start + k, len - k));
                p
            } else {
                let mut p = self.subproof(m - k, start + k, len - k, false);
                p.push(self.mth(start, k));
                p
            }
        }
    }

    /// Consistency proof between `old_size` and the log's current size
    /// (§4.G). `old_size` must be in `(0, tree_size]`.
    pub fn consistency_proof(&self, old_size: usize) -> Result<Vec<[u8; 32]>> {
        let n = self.leaves.len();
        if old_size > n {
            return Err(KtError::SizesOutOfOrder { old: old_size, new: n });
        }
        if old_size == 0 {
            return Ok(Vec::new());
        }
        Ok(self.subproof(old_size, 0, n, true))
    }
}

impl Default for KtLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify an inclusion proof against a signed head (§4.G, §8 invariant 3).
pub fn verify_inclusion(
    leaf_bytes: &[u8],
    audit_path: &[[u8; 32]],
    leaf_index: usize,
    tree_size: usize,
    root: &[u8; 32],
) -> Result<()> {
    if leaf_index >= tree_size {
        return Err(KtError::IndexOutOfRange {
            index: leaf_index,
            tree_size,
        });
    }
    let leaf = hash::leaf_hash(leaf_bytes);
    let computed = verify_path(leaf, audit_path, leaf_index, tree_size);
    if &computed != root {
        return Err(KtError::ProofFailed);
    }
    Ok(())
}

fn verify_path(leaf_hash: [u8; 32], audit_path: &[[u8; 32]], m: usize, len: usize) -> [u8; 32] {
    if len == 1 {
        return leaf_hash;
    }
    let k = largest_pow2_lt(len);
    let (rest, last) = audit_path.split_at(audit_path.len() - 1);
    let sibling = last[0];
    if m < k {
        let node = verify_path(leaf_hash, rest, m, k);
        hash::node_hash(&node, &sibling)
    } else {
        let node = verify_path(leaf_hash, rest, m - k, len - k);
        hash::node_hash(&sibling, &node)
    }
}

fn verify_consistency_rec(
    m: usize,
    start: usize,
    len: usize,
    proof: &mut Vec<[u8; 32]>,
    b: bool,
    old_root: &[u8; 32],
) -> Result<([u8; 32], [u8; 32])> {
    if m == len {
        if b {
            Ok((*old_root, *old_root))
        } else {
            let h = proof.pop().ok_or(KtError::ProofFailed)?;
            Ok((h, h))
        }
    } else {
        let k = largest_pow2_lt(len);
        if m <= k {
            let sibling = proof.pop().ok_or(KtError::ProofFailed)?;
            let (old_inner, new_inner) = verify_consistency_rec(m, start, k, proof, b, old_root)?;
            Ok((old_inner, hash::node_hash(&new_inner, &sibling)))
        } else {
            let sibling = proof.pop().ok_or(KtError::ProofFailed)?;
            let (old_inner, new_inner) =
                verify_consistency_rec(m - k, start + k, len - k, proof, false, old_root)?;
            Ok((
                hash::node_hash(&sibling, &old_inner),
                hash::node_hash(&sibling, &new_inner),
            ))
        }
    }
}

/// Verify a consistency proof between tree sizes `m` and `n` (§4.G, §8
/// invariant 3).
pub fn verify_consistency(
    m: usize,
    n: usize,
    proof: &[[u8; 32]],
    old_root: &[u8; 32],
    new_root: &[u8; 32],
) -> Result<()> {
    if m > n {
        return Err(KtError::SizesOutOfOrder { old: m, new: n });
    }
    if m == n {
        return if proof.is_empty() && old_root == new_root {
            Ok(())
        } else {
            Err(KtError::ProofFailed)
        };
    }
    if m == 0 {
        return Ok(());
    }
    let mut p = proof.to_vec();
    let (computed_old, computed_new) = verify_consistency_rec(m, 0, n, &mut p, true, old_root)?;
    if !p.is_empty() || &computed_old != old_root || &computed_new != new_root {
        return Err(KtError::ProofFailed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusion_proof_verifies_for_every_leaf() {
        let mut log = KtLog::new();
        for i in 0..7 {
            log.append(&format!("user{i}"), format!("leaf{i}").as_bytes()).unwrap();
        }
        let root = log.root();
        let n = log.tree_size();
        for i in 0..n {
            let path = log.inclusion_proof(i).unwrap();
            verify_inclusion(format!("leaf{i}").as_bytes(), &path, i, n, &root).unwrap();
        }
    }

    #[test]
    fn tampered_inclusion_proof_fails() {
        let mut log = KtLog::new();
        for i in 0..5 {
            log.append(&format!("user{i}"), format!("leaf{i}").as_bytes()).unwrap();
        }
        let root = log.root();
        let n = log.tree_size();
        let mut path = log.inclusion_proof(2).unwrap();
        path[0][0] ^= 0xFF;
        assert!(verify_inclusion(b"leaf2", &path, 2, n, &root).is_err());
    }

    #[test]
    fn consistency_proof_holds_across_growth() {
        let mut log = KtLog::new();
        log.append("alice", b"alice-v1").unwrap();
        log.append("bob", b"bob-v1").unwrap();
        let old_root = log.root();
        let old_size = log.tree_size();

        log.append("alice", b"alice-v2").unwrap();
        let new_root = log.root();
        let new_size = log.tree_size();

        let proof = log.consistency_proof(old_size).unwrap();
        verify_consistency(old_size, new_size, &proof, &old_root, &new_root).unwrap();
    }

    #[test]
    fn forged_consistency_proof_is_rejected() {
        let mut log = KtLog::new();
        log.append("alice", b"a1").unwrap();
        log.append("bob", b"b1").unwrap();
        let old_root = log.root();
        let old_size = log.tree_size();
        log.append("carol", b"c1").unwrap();
        let new_root = log.root();
        let new_size = log.tree_size();

        let mut proof = log.consistency_proof(old_size).unwrap();
        if let Some(first) = proof.first_mut() {
            first[0] ^= 0xFF;
        }
        assert!(verify_consistency(old_size, new_size, &proof, &old_root, &new_root).is_err());
    }

    #[test]
    fn latest_by_user_tracks_newest_index_only() {
        let mut log = KtLog::new();
        log.append("alice", b"v1").unwrap();
        log.append("bob", b"v1").unwrap();
        let idx2 = log.append("alice", b"v2").unwrap();
        assert_eq!(log.latest_index("alice"), Some(idx2));
    }

    #[test]
    fn signed_head_verifies_and_tracks_size() {
        let sig = PqSigKeypair::generate();
        let mut log = KtLog::new();
        log.append("alice", b"v1").unwrap();
        log.append("bob", b"v1").unwrap();
        let sth = log.sign_head(&sig).unwrap();
        assert_eq!(sth.tree_size, 2);
        sth.verify(&sig.public).unwrap();
    }

    #[test]
    fn persisted_log_replays_to_the_same_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kt.log");
        {
            let mut log = KtLog::load(&path).unwrap();
            log.append("alice", b"v1").unwrap();
            log.append("bob", b"v1").unwrap();
        }
        let reloaded = KtLog::load(&path).unwrap();
        assert_eq!(reloaded.tree_size(), 2);
        assert_eq!(reloaded.latest_index("bob"), Some(1));
    }
}
