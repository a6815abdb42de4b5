//! Gossip wrapper (§4.H): every peer-to-peer payload is pre-wrapped
//! with the sender's view of the Key Transparency head, letting two
//! honest clients detect log-operator equivocation without a
//! third-party auditor.
//!
//! No teacher equivalent — new functionality grounded directly on
//! spec.md §4.H's wire formula; the wrap/unwrap framing style matches
//! `framing::frame`/`padding` (fixed magic, length-prefixed payload).

use thiserror::Error;

use crate::framing::wire::{Reader, Writer};
use crate::kt::{self, KtError};

pub const GOSSIP_MAGIC: &[u8] = b"MIKTGSP1";

#[derive(Error, Debug)]
pub enum GossipError {
    #[error("malformed gossip wrapper")]
    Malformed,
    #[error("peer and local KT heads diverge at tree_size {tree_size}")]
    Mismatch { tree_size: u64 },
    #[error("consistency proof verification failed: {0}")]
    ProofFailed(#[from] KtError),
}

pub type Result<T> = std::result::Result<T, GossipError>;

/// `wrap(plain, tree_size, root) = MIKTGSP1(8) ‖ tree_size_LE8 ‖ root(32)
/// ‖ plaintext_len_LE4 ‖ plaintext` (§4.H).
pub fn wrap(plaintext: &[u8], tree_size: u64, root: &[u8; 32]) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_raw(GOSSIP_MAGIC);
    w.write_u64_le(tree_size);
    w.write_raw(root);
    w.write_bytes(plaintext);
    w.into_bytes()
}

/// The locally held view of the KT log's head, used to compare against
/// an unwrapped peer payload.
#[derive(Clone, Copy, Debug)]
pub struct LocalHead {
    pub tree_size: u64,
    pub root: [u8; 32],
}

/// Result of unwrapping one peer-to-peer payload (§4.H steps 1-3).
pub enum Unwrapped {
    /// No `MIKTGSP1` magic: legacy undecorated plaintext, passed
    /// through unchanged (§9 Open Question: legacy fallback retained).
    Legacy(Vec<u8>),
    /// Peer and local agree (or peer is behind): plaintext delivered
    /// with no action needed.
    Ok { plaintext: Vec<u8> },
    /// Same tree_size, different root: the log operator equivocated.
    /// The message is still delivered; callers surface `GossipMismatch`.
    Mismatch { plaintext: Vec<u8>, tree_size: u64 },
    /// Peer's tree is ahead of ours: caller must fetch and verify a
    /// consistency proof (`local.tree_size`, `peer.tree_size`), then
    /// advance `local` to the peer's head before trusting the new
    /// value (we do NOT advance it here — that requires a network
    /// round trip the caller owns).
    PeerAhead {
        plaintext: Vec<u8>,
        peer_tree_size: u64,
        peer_root: [u8; 32],
    },
}

/// Parse the wrapper and compare the embedded head against `local`
/// (§4.H). Does not itself fetch or verify any consistency proof —
/// that is a server round trip the caller drives; see
/// [`advance_after_consistency_proof`].
pub fn unwrap(data: &[u8], local: LocalHead) -> Result<Unwrapped> {
    if data.len() < GOSSIP_MAGIC.len() || &data[..GOSSIP_MAGIC.len()] != GOSSIP_MAGIC {
        return Ok(Unwrapped::Legacy(data.to_vec()));
    }
    let mut r = Reader::new(data);
    let _magic = r.read_array::<8>().map_err(|_| GossipError::Malformed)?;
    let peer_tree_size = r.read_u64_le().map_err(|_| GossipError::Malformed)?;
    let peer_root = r.read_array::<32>().map_err(|_| GossipError::Malformed)?;
    let plaintext = r.read_bytes().map_err(|_| GossipError::Malformed)?;

    if peer_tree_size == local.tree_size {
        if peer_root != local.root {
            return Ok(Unwrapped::Mismatch {
                plaintext,
                tree_size: peer_tree_size,
            });
        }
        return Ok(Unwrapped::Ok { plaintext });
    }
    if peer_tree_size > local.tree_size {
        return Ok(Unwrapped::PeerAhead {
            plaintext,
            peer_tree_size,
            peer_root,
        });
    }
    // Peer is behind local: nothing to reconcile, deliver as-is.
    Ok(Unwrapped::Ok { plaintext })
}

/// After fetching and verifying the (local.tree_size, peer.tree_size)
/// consistency proof from the server (§4.G), advance the locally held
/// head. Call only once [`kt::verify_consistency`] has returned `Ok`.
pub fn advance_after_consistency_proof(peer_tree_size: u64, peer_root: [u8; 32]) -> LocalHead {
    LocalHead {
        tree_size: peer_tree_size,
        root: peer_root,
    }
}

/// Convenience: verify the consistency proof and advance in one call.
pub fn verify_and_advance(
    local: LocalHead,
    peer_tree_size: u64,
    peer_root: [u8; 32],
    proof: &[[u8; 32]],
) -> Result<LocalHead> {
    kt::verify_consistency(
        local.tree_size as usize,
        peer_tree_size as usize,
        proof,
        &local.root,
        &peer_root,
    )?;
    Ok(advance_after_consistency_proof(peer_tree_size, peer_root))
}
