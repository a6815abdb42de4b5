//! Atomic temp-file-then-rename persistence for the three named
//! persistent file formats (§6): the OPAQUE server-setup file, the KT
//! log append-record stream, and the device-sync key file.
//!
//! The teacher crate's `storage/mod.rs` is an app-layer contract with
//! no real I/O; this module is new functionality grounded in the
//! pack's general `tempfile`-for-crash-safety convention. No database,
//! no chat history, no offline queue — those remain out of scope.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic (expected {expected:?})")]
    BadMagic { expected: &'static [u8] },
    #[error("truncated file")]
    Truncated,
    #[error("length prefix {declared} does not match remaining {remaining} bytes")]
    LengthMismatch { declared: u32, remaining: usize },
}

pub type Result<T> = std::result::Result<T, PersistError>;

/// Write `magic ‖ u32_le(len) ‖ body` to `path` via a sibling temp file
/// plus atomic rename, so a crash mid-write never leaves a corrupt or
/// partially-written file in place.
pub fn write_magic_framed(path: &Path, magic: &'static [u8], body: &[u8]) -> Result<()> {
    let mut buf = Vec::with_capacity(magic.len() + 4 + body.len());
    buf.extend_from_slice(magic);
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(body);

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&buf)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| PersistError::Io(e.error))?;
    Ok(())
}

/// Read and validate a `magic ‖ u32_le(len) ‖ body` file written by
/// [`write_magic_framed`].
pub fn read_magic_framed(path: &Path, magic: &'static [u8]) -> Result<Vec<u8>> {
    let mut file = fs::File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    if data.len() < magic.len() + 4 {
        return Err(PersistError::Truncated);
    }
    if &data[..magic.len()] != magic {
        return Err(PersistError::BadMagic { expected: magic });
    }
    let len_off = magic.len();
    let declared = u32::from_le_bytes([
        data[len_off],
        data[len_off + 1],
        data[len_off + 2],
        data[len_off + 3],
    ]);
    let body = &data[len_off + 4..];
    if body.len() != declared as usize {
        return Err(PersistError::LengthMismatch {
            declared,
            remaining: body.len(),
        });
    }
    Ok(body.to_vec())
}

/// `opaque_server_setup.bin`: magic `MIOPAQS1` ‖ u32 LE length ‖ setup bytes.
pub const OPAQUE_SERVER_SETUP_MAGIC: &[u8] = b"MIOPAQS1";

/// Device sync key file: magic ‖ length ‖ key bytes.
pub const DEVICE_SYNC_KEY_MAGIC: &[u8] = b"MIDSYNCK";

/// KT log append-record stream: one magic-framed record per leaf
/// append, concatenated; `kt::KtLog::load` replays the whole file.
pub const KT_LOG_RECORD_MAGIC: &[u8] = b"MIKTLOG1";

/// Append one magic-framed record to the KT log file (create if
/// absent). Unlike the other two formats this is append-only, not
/// replace-on-write, so no temp+rename is used here — the invariant
/// the spec cares about (§3: "the log never shrinks") is upheld by
/// only ever opening in append mode.
pub fn append_record(path: &Path, magic: &'static [u8], body: &[u8]) -> Result<()> {
    let mut framed = Vec::with_capacity(magic.len() + 4 + body.len());
    framed.extend_from_slice(magic);
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(body);

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(&framed)?;
    file.flush()?;
    Ok(())
}

/// Replay every magic-framed record in an append-only file, in order.
pub fn read_all_records(path: &Path, magic: &'static [u8]) -> Result<Vec<Vec<u8>>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut file = fs::File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if data.len() - pos < magic.len() + 4 {
            return Err(PersistError::Truncated);
        }
        if &data[pos..pos + magic.len()] != magic {
            return Err(PersistError::BadMagic { expected: magic });
        }
        let len_off = pos + magic.len();
        let declared = u32::from_le_bytes([
            data[len_off],
            data[len_off + 1],
            data[len_off + 2],
            data[len_off + 3],
        ]) as usize;
        let body_start = len_off + 4;
        let body_end = body_start + declared;
        if body_end > data.len() {
            return Err(PersistError::Truncated);
        }
        out.push(data[body_start..body_end].to_vec());
        pos = body_end;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn magic_framed_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("setup.bin");
        write_magic_framed(&path, OPAQUE_SERVER_SETUP_MAGIC, b"secret-bytes").unwrap();
        let body = read_magic_framed(&path, OPAQUE_SERVER_SETUP_MAGIC).unwrap();
        assert_eq!(body, b"secret-bytes");
    }

    #[test]
    fn wrong_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("setup.bin");
        write_magic_framed(&path, OPAQUE_SERVER_SETUP_MAGIC, b"x").unwrap();
        assert!(matches!(
            read_magic_framed(&path, DEVICE_SYNC_KEY_MAGIC),
            Err(PersistError::BadMagic { .. })
        ));
    }

    #[test]
    fn append_only_log_replays_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kt.log");
        append_record(&path, KT_LOG_RECORD_MAGIC, b"leaf-one").unwrap();
        append_record(&path, KT_LOG_RECORD_MAGIC, b"leaf-two").unwrap();
        let records = read_all_records(&path, KT_LOG_RECORD_MAGIC).unwrap();
        assert_eq!(records, vec![b"leaf-one".to_vec(), b"leaf-two".to_vec()]);
    }

    #[test]
    fn missing_log_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.log");
        assert_eq!(read_all_records(&path, KT_LOG_RECORD_MAGIC).unwrap(), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn atomic_write_survives_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("setup.bin");
        write_magic_framed(&path, OPAQUE_SERVER_SETUP_MAGIC, b"v1").unwrap();
        write_magic_framed(&path, OPAQUE_SERVER_SETUP_MAGIC, b"v2-longer").unwrap();
        let body = read_magic_framed(&path, OPAQUE_SERVER_SETUP_MAGIC).unwrap();
        assert_eq!(body, b"v2-longer");
    }
}
