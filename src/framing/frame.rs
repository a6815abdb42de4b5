//! Fixed-header, length-delimited frame codec (§6).
//!
//! Header layout: magic `b"MIF1"` (4) ‖ version u16 LE (=1) ‖ type u16
//! LE ‖ payload_length u32 LE. Payload follows, capped at
//! [`crate::limits::MAX_FRAME_PAYLOAD_BYTES`]. Ported from
//! `original_source/server/src/frame.cpp`'s `EncodeFrame`/`DecodeFrame`
//! (hand-rolled little-endian byte packing) to safe slice indexing.

use thiserror::Error;

use crate::limits::MAX_FRAME_PAYLOAD_BYTES;

pub const FRAME_MAGIC: [u8; 4] = *b"MIF1";
pub const FRAME_VERSION: u16 = 1;
pub const FRAME_HEADER_BYTES: usize = 12;

/// Frame types (§6, "subset"). A `FrameType::Other` variant carries any
/// value not named here so the codec never rejects forward-compatible
/// types it doesn't yet know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Login,
    Logout,
    PrivateSend,
    PrivatePull,
    GroupCipherSend,
    GroupCipherPull,
    GroupSenderKeySend,
    GroupEvent,
    GroupMemberList,
    GroupMemberInfoList,
    GroupRoleSet,
    GroupKickMember,
    GroupNoticePull,
    MediaPush,
    MediaPull,
    GroupMediaPush,
    GroupMediaPull,
    GroupCallSignal,
    GroupCallSignalPull,
    PreKeyPublish,
    PreKeyFetch,
    KtConsistency,
    KtInclusion,
    DeviceSyncPush,
    DeviceSyncPull,
    DevicePairingStart,
    DevicePairingApprove,
    Other(u16),
}

impl FrameType {
    pub fn code(self) -> u16 {
        match self {
            FrameType::Login => 1,
            FrameType::Logout => 2,
            FrameType::PrivateSend => 3,
            FrameType::PrivatePull => 4,
            FrameType::GroupCipherSend => 5,
            FrameType::GroupCipherPull => 6,
            FrameType::GroupSenderKeySend => 7,
            FrameType::GroupEvent => 8,
            FrameType::GroupMemberList => 9,
            FrameType::GroupMemberInfoList => 10,
            FrameType::GroupRoleSet => 11,
            FrameType::GroupKickMember => 12,
            FrameType::GroupNoticePull => 13,
            FrameType::MediaPush => 14,
            FrameType::MediaPull => 15,
            FrameType::GroupMediaPush => 16,
            FrameType::GroupMediaPull => 17,
            FrameType::GroupCallSignal => 18,
            FrameType::GroupCallSignalPull => 19,
            FrameType::PreKeyPublish => 20,
            FrameType::PreKeyFetch => 21,
            FrameType::KtConsistency => 22,
            FrameType::KtInclusion => 23,
            FrameType::DeviceSyncPush => 24,
            FrameType::DeviceSyncPull => 25,
            FrameType::DevicePairingStart => 26,
            FrameType::DevicePairingApprove => 27,
            FrameType::Other(v) => v,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => FrameType::Login,
            2 => FrameType::Logout,
            3 => FrameType::PrivateSend,
            4 => FrameType::PrivatePull,
            5 => FrameType::GroupCipherSend,
            6 => FrameType::GroupCipherPull,
            7 => FrameType::GroupSenderKeySend,
            8 => FrameType::GroupEvent,
            9 => FrameType::GroupMemberList,
            10 => FrameType::GroupMemberInfoList,
            11 => FrameType::GroupRoleSet,
            12 => FrameType::GroupKickMember,
            13 => FrameType::GroupNoticePull,
            14 => FrameType::MediaPush,
            15 => FrameType::MediaPull,
            16 => FrameType::GroupMediaPush,
            17 => FrameType::GroupMediaPull,
            18 => FrameType::GroupCallSignal,
            19 => FrameType::GroupCallSignalPull,
            20 => FrameType::PreKeyPublish,
            21 => FrameType::PreKeyFetch,
            22 => FrameType::KtConsistency,
            23 => FrameType::KtInclusion,
            24 => FrameType::DeviceSyncPush,
            25 => FrameType::DeviceSyncPull,
            26 => FrameType::DevicePairingStart,
            27 => FrameType::DevicePairingApprove,
            other => FrameType::Other(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated frame header")]
    TruncatedHeader,
    #[error("truncated frame payload")]
    TruncatedPayload,
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),
    #[error("payload length {0} exceeds max {1}")]
    PayloadTooLarge(u32, usize),
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Encode a frame to wire bytes. Returns `PayloadTooLarge` rather than
/// panicking if the caller hands in an oversized payload.
pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    if frame.payload.len() > MAX_FRAME_PAYLOAD_BYTES {
        return Err(FrameError::PayloadTooLarge(
            frame.payload.len() as u32,
            MAX_FRAME_PAYLOAD_BYTES,
        ));
    }
    let mut out = Vec::with_capacity(FRAME_HEADER_BYTES + frame.payload.len());
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    out.extend_from_slice(&frame.frame_type.code().to_le_bytes());
    out.extend_from_slice(&(frame.payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&frame.payload);
    Ok(out)
}

struct HeaderView {
    frame_type: FrameType,
    payload_len: u32,
}

fn decode_header(data: &[u8]) -> Result<HeaderView> {
    if data.len() < FRAME_HEADER_BYTES {
        return Err(FrameError::TruncatedHeader);
    }
    if data[0..4] != FRAME_MAGIC {
        return Err(FrameError::BadMagic);
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != FRAME_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }
    let type_code = u16::from_le_bytes([data[6], data[7]]);
    let payload_len = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    if payload_len as usize > MAX_FRAME_PAYLOAD_BYTES {
        return Err(FrameError::PayloadTooLarge(
            payload_len,
            MAX_FRAME_PAYLOAD_BYTES,
        ));
    }
    Ok(HeaderView {
        frame_type: FrameType::from_code(type_code),
        payload_len,
    })
}

/// Decode one frame from the front of `data`, returning the frame and
/// the number of bytes consumed (for stream-oriented callers that
/// concatenate several frames).
pub fn decode(data: &[u8]) -> Result<(Frame, usize)> {
    let header = decode_header(data)?;
    let total = FRAME_HEADER_BYTES + header.payload_len as usize;
    if data.len() < total {
        return Err(FrameError::TruncatedPayload);
    }
    let payload = data[FRAME_HEADER_BYTES..total].to_vec();
    Ok((
        Frame {
            frame_type: header.frame_type,
            payload,
        },
        total,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let frame = Frame {
            frame_type: FrameType::PrivateSend,
            payload: vec![1, 2, 3, 4, 5],
        };
        let bytes = encode(&frame).unwrap();
        let (decoded, consumed) = decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.frame_type, FrameType::PrivateSend);
        assert_eq!(decoded.payload, frame.payload);
    }

    #[test]
    fn empty_payload_roundtrips() {
        let frame = Frame {
            frame_type: FrameType::Logout,
            payload: vec![],
        };
        let bytes = encode(&frame).unwrap();
        let (decoded, _) = decode(&bytes).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = encode(&Frame {
            frame_type: FrameType::Login,
            payload: vec![],
        })
        .unwrap();
        bytes[0] = b'X';
        assert_eq!(decode(&bytes), Err(FrameError::BadMagic));
    }

    #[test]
    fn truncated_header_rejected() {
        assert_eq!(decode(&[0u8; 4]), Err(FrameError::TruncatedHeader));
    }

    #[test]
    fn truncated_payload_rejected() {
        let bytes = encode(&Frame {
            frame_type: FrameType::Login,
            payload: vec![9, 9, 9],
        })
        .unwrap();
        assert_eq!(
            decode(&bytes[..bytes.len() - 1]),
            Err(FrameError::TruncatedPayload)
        );
    }

    #[test]
    fn oversized_payload_rejected() {
        let frame = Frame {
            frame_type: FrameType::MediaPush,
            payload: vec![0u8; MAX_FRAME_PAYLOAD_BYTES + 1],
        };
        assert!(matches!(
            encode(&frame),
            Err(FrameError::PayloadTooLarge(_, _))
        ));
    }

    #[test]
    fn unknown_type_code_round_trips_as_other() {
        let frame = Frame {
            frame_type: FrameType::Other(9999),
            payload: vec![1],
        };
        let bytes = encode(&frame).unwrap();
        let (decoded, _) = decode(&bytes).unwrap();
        assert_eq!(decoded.frame_type, FrameType::Other(9999));
    }
}
