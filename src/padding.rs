//! Length-hiding padding to bucket sizes (§4.K, §6).
//!
//! Wrapper: magic `MIPD`(4) ‖ plaintext_len(u32 LE) ‖ plaintext ‖
//! random padding, out to the smallest bucket that fits (or the next
//! 4 KiB multiple above the largest bucket). Grounded in
//! `secure-legion-core/src/network/padding.rs`'s `pad_to_fixed_size`/
//! `strip_padding` shape and `PaddingError` enum, restyled to this
//! crate's multi-bucket scheme instead of that file's single
//! `FIXED_PACKET_SIZE`.

use thiserror::Error;

use crate::primitives::rng::fill_random;

pub const PAD_MAGIC: [u8; 4] = *b"MIPD";
const HEADER_BYTES: usize = 4 + 4;

/// Bucket sizes (§6). Plaintext larger than the biggest bucket rounds
/// up to the next 4 KiB multiple instead of failing.
pub const BUCKETS: [usize; 7] = [256, 512, 1_024, 2_048, 4_096, 8_192, 16_384];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaddingError {
    #[error("bad magic")]
    BadMagic,
    #[error("truncated padded buffer")]
    Truncated,
    #[error("declared plaintext length {0} exceeds padded buffer")]
    LengthOverrun(u32),
}

pub type Result<T> = std::result::Result<T, PaddingError>;

fn bucket_for(total_len: usize) -> usize {
    for &b in BUCKETS.iter() {
        if total_len <= b {
            return b;
        }
    }
    // Round up to the next 4 KiB multiple above the largest bucket.
    let unit = 4096;
    total_len.div_ceil(unit) * unit
}

/// Pad `plaintext` to the containing bucket size with uniformly random
/// bytes. The returned buffer always decodes back to exactly
/// `plaintext` via [`unpad`].
pub fn pad(plaintext: &[u8]) -> Vec<u8> {
    let needed = HEADER_BYTES + plaintext.len();
    let total = bucket_for(needed);

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&PAD_MAGIC);
    out.extend_from_slice(&(plaintext.len() as u32).to_le_bytes());
    out.extend_from_slice(plaintext);

    let pad_len = total - out.len();
    let mut pad_bytes = vec![0u8; pad_len];
    fill_random(&mut pad_bytes);
    out.extend_from_slice(&pad_bytes);
    out
}

/// Recover the original plaintext from a [`pad`]ded buffer, discarding
/// the random tail.
pub fn unpad(padded: &[u8]) -> Result<Vec<u8>> {
    if padded.len() < HEADER_BYTES {
        return Err(PaddingError::Truncated);
    }
    if padded[0..4] != PAD_MAGIC {
        return Err(PaddingError::BadMagic);
    }
    let len = u32::from_le_bytes([padded[4], padded[5], padded[6], padded[7]]);
    let end = HEADER_BYTES + len as usize;
    if end > padded.len() {
        return Err(PaddingError::LengthOverrun(len));
    }
    Ok(padded[HEADER_BYTES..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_for_various_sizes() {
        for size in [0usize, 1, 100, 255, 4096, 16380, 20000] {
            let plaintext = vec![0x5Au8; size];
            let padded = pad(&plaintext);
            assert!(BUCKETS.contains(&padded.len()) || padded.len() % 4096 == 0);
            let recovered = unpad(&padded).unwrap();
            assert_eq!(recovered, plaintext);
        }
    }

    #[test]
    fn padded_length_is_bucketed() {
        let padded = pad(b"hi");
        assert_eq!(padded.len(), 256);
    }

    #[test]
    fn oversize_rounds_up_to_4kib_multiple() {
        let padded = pad(&vec![0u8; 17_000]);
        assert_eq!(padded.len() % 4096, 0);
        assert!(padded.len() > *BUCKETS.last().unwrap());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut padded = pad(b"hello");
        padded[0] = b'X';
        assert_eq!(unpad(&padded), Err(PaddingError::BadMagic));
    }

    #[test]
    fn truncated_rejected() {
        assert_eq!(unpad(&[0u8; 3]), Err(PaddingError::Truncated));
    }

    #[test]
    fn padding_bytes_are_not_all_zero() {
        // Statistically near-certain for a 256-byte bucket padding a 2-byte plaintext.
        let padded = pad(b"hi");
        let tail = &padded[HEADER_BYTES + 2..];
        assert!(tail.iter().any(|&b| b != 0));
    }
}
