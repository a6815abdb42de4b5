//! Chat envelope (§6): the plaintext structure recovered after ratchet
//! decrypt and gossip unwrap. Magic `MICH` ‖ version=1 ‖ chat_type(1)
//! ‖ message_id(16) ‖ body.
//!
//! Grounded on `secure-legion-core/src/protocol/message.rs`'s explicit
//! to-be-signed/to-be-encoded byte construction style, generalized from
//! that file's fixed `MessageType` enum to the 15 chat types spec.md
//! §6 names.

use thiserror::Error;
use uuid::Uuid;

use crate::framing::wire::{Reader, Writer};

pub const CHAT_ENVELOPE_MAGIC: &[u8] = b"MICH";
pub const CHAT_ENVELOPE_VERSION: u8 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown chat type {0}")]
    UnknownChatType(u8),
    #[error("malformed envelope")]
    Malformed,
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Chat types 1-15 (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatType {
    Text = 1,
    Ack = 2,
    File = 3,
    GroupText = 4,
    GroupInvite = 5,
    GroupFile = 6,
    GroupSenderKeyDist = 7,
    GroupSenderKeyReq = 8,
    Rich = 9,
    ReadReceipt = 10,
    Typing = 11,
    Sticker = 12,
    Presence = 13,
    GroupCallKeyDist = 14,
    GroupCallKeyReq = 15,
}

impl ChatType {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            1 => ChatType::Text,
            2 => ChatType::Ack,
            3 => ChatType::File,
            4 => ChatType::GroupText,
            5 => ChatType::GroupInvite,
            6 => ChatType::GroupFile,
            7 => ChatType::GroupSenderKeyDist,
            8 => ChatType::GroupSenderKeyReq,
            9 => ChatType::Rich,
            10 => ChatType::ReadReceipt,
            11 => ChatType::Typing,
            12 => ChatType::Sticker,
            13 => ChatType::Presence,
            14 => ChatType::GroupCallKeyDist,
            15 => ChatType::GroupCallKeyReq,
            other => return Err(EnvelopeError::UnknownChatType(other)),
        })
    }
}

/// A decoded chat envelope. `body` is left as opaque bytes; callers
/// dispatch on `chat_type` to parse the body with the matching
/// component (`group_ratchet::GroupSenderKeyDist`, `group_call::
/// GroupCallKeyDist`, etc.) or treat it as plain UTF-8 text for the
/// simple chat types (Text, Typing, Presence, ...).
#[derive(Clone, Debug)]
pub struct ChatEnvelope {
    pub chat_type: ChatType,
    pub message_id: [u8; 16],
    pub body: Vec<u8>,
}

impl ChatEnvelope {
    pub fn new(chat_type: ChatType, body: Vec<u8>) -> Self {
        Self {
            chat_type,
            message_id: *Uuid::new_v4().as_bytes(),
            body,
        }
    }

    pub fn with_message_id(chat_type: ChatType, message_id: [u8; 16], body: Vec<u8>) -> Self {
        Self {
            chat_type,
            message_id,
            body,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_raw(CHAT_ENVELOPE_MAGIC);
        w.write_u8(CHAT_ENVELOPE_VERSION);
        w.write_u8(self.chat_type as u8);
        w.write_raw(&self.message_id);
        w.write_raw(&self.body);
        w.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < CHAT_ENVELOPE_MAGIC.len() || &data[..CHAT_ENVELOPE_MAGIC.len()] != CHAT_ENVELOPE_MAGIC {
            return Err(EnvelopeError::BadMagic);
        }
        let mut r = Reader::new(data);
        let _magic = r.read_array::<4>().map_err(|_| EnvelopeError::Malformed)?;
        let version = r.read_u8().map_err(|_| EnvelopeError::Malformed)?;
        if version != CHAT_ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(version));
        }
        let chat_type = ChatType::from_u8(r.read_u8().map_err(|_| EnvelopeError::Malformed)?)?;
        let message_id = r.read_array::<16>().map_err(|_| EnvelopeError::Malformed)?;
        let body = data[data.len() - r.remaining()..].to_vec();
        Ok(Self {
            chat_type,
            message_id,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let envelope = ChatEnvelope::new(ChatType::Text, b"hi".to_vec());
        let bytes = envelope.encode();
        let decoded = ChatEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded.chat_type, ChatType::Text);
        assert_eq!(decoded.body, b"hi");
        assert_eq!(decoded.message_id, envelope.message_id);
    }

    #[test]
    fn bad_magic_rejected() {
        assert_eq!(ChatEnvelope::decode(b"XXXX"), Err(EnvelopeError::BadMagic));
    }

    #[test]
    fn unknown_chat_type_rejected() {
        let envelope = ChatEnvelope::with_message_id(ChatType::Text, [0u8; 16], vec![]);
        let mut bytes = envelope.encode();
        bytes[5] = 99;
        assert!(matches!(
            ChatEnvelope::decode(&bytes),
            Err(EnvelopeError::UnknownChatType(99))
        ));
    }

    #[test]
    fn every_chat_type_round_trips() {
        for v in 1u8..=15 {
            let ct = ChatType::from_u8(v).unwrap();
            assert_eq!(ct as u8, v);
        }
    }
}
