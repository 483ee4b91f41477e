//! Wire protocol types for scheduler-client communication.
//!
//! Every message is a fixed 9-byte packed record, little-endian:
//!
//! | offset | field        | type  |
//! |--------|--------------|-------|
//! | 0      | `request_id` | `i32` |
//! | 4      | `node`       | `u8`  |
//! | 5      | `kind`       | `i32` |
//!
//! Per request the exchange is strictly `RequestInit` (client) → `Reply`
//! (scheduler) → `RequestComplete` (client).

use std::fmt;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Identifier of a client node on the shared medium.
///
/// Deployed clients use printable ASCII identifiers (`'A'`, `'1'`, ...), so
/// `Display` renders the byte as a character when it is printable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u8);

impl NodeId {
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Map a numeric id from the node address table onto its ASCII digit id.
    ///
    /// Returns `None` if the offset overflows a byte.
    pub fn from_table_index(index: u8) -> Option<Self> {
        b'0'.checked_add(index).map(Self)
    }
}

impl From<u8> for NodeId {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl TryFrom<char> for NodeId {
    type Error = std::char::TryFromCharError;

    /// Fails for characters above U+00FF, which have no one-byte id.
    fn try_from(c: char) -> Result<Self, Self::Error> {
        u8::try_from(c).map(Self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_ascii_graphic() {
            write!(f, "{}", self.0 as char)
        } else {
            write!(f, "{:#04x}", self.0)
        }
    }
}

/// Request identifier chosen by the requesting client.
pub type RequestId = i32;

/// Correlation key for one request: the `(node, request_id)` pair carried by
/// all three messages of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub node: NodeId,
    pub request_id: RequestId,
}

impl RequestKey {
    pub fn new(node: NodeId, request_id: RequestId) -> Self {
        Self { node, request_id }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.request_id)
    }
}

/// Message type discriminant as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum MessageKind {
    /// Client asks for the medium.
    RequestInit = 1,
    /// Scheduler grants the medium for one request.
    Reply = 2,
    /// Client reports it has finished using the medium.
    RequestComplete = 3,
}

impl MessageKind {
    pub fn from_wire(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Self::RequestInit),
            2 => Some(Self::Reply),
            3 => Some(Self::RequestComplete),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RequestInit => "REQUEST_INIT",
            Self::Reply => "REPLY",
            Self::RequestComplete => "REQUEST_COMPLETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message must be exactly {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("unknown message type {0}")]
    UnknownKind(i32),
}

/// One fixed-size scheduler protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerMessage {
    pub request_id: RequestId,
    pub node: NodeId,
    pub kind: MessageKind,
}

impl SchedulerMessage {
    /// Encoded size in bytes. The layout is packed, so this is the sum of the field widths.
    pub const WIRE_SIZE: usize = 4 + 1 + 4;

    pub fn new(kind: MessageKind, key: RequestKey) -> Self {
        Self {
            request_id: key.request_id,
            node: key.node,
            kind,
        }
    }

    pub fn request_init(key: RequestKey) -> Self {
        Self::new(MessageKind::RequestInit, key)
    }

    pub fn reply(key: RequestKey) -> Self {
        Self::new(MessageKind::Reply, key)
    }

    pub fn request_complete(key: RequestKey) -> Self {
        Self::new(MessageKind::RequestComplete, key)
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.node, self.request_id)
    }

    pub fn encode_into(&self, dst: &mut impl BufMut) {
        dst.put_i32_le(self.request_id);
        dst.put_u8(self.node.as_u8());
        dst.put_i32_le(self.kind.to_wire());
    }

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut bytes = [0u8; Self::WIRE_SIZE];
        self.encode_into(&mut &mut bytes[..]);
        bytes
    }

    /// Decode one message. `bytes` must hold exactly [`Self::WIRE_SIZE`] bytes;
    /// a partial buffer is never interpreted.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(DecodeError::Length {
                expected: Self::WIRE_SIZE,
                actual: bytes.len(),
            });
        }

        let request_id = bytes.get_i32_le();
        let node = NodeId::new(bytes.get_u8());
        let raw_kind = bytes.get_i32_le();
        let kind = MessageKind::from_wire(raw_kind).ok_or(DecodeError::UnknownKind(raw_kind))?;

        Ok(Self {
            request_id,
            node,
            kind,
        })
    }
}

impl fmt::Display for SchedulerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_layout_is_packed_little_endian() {
        let msg = SchedulerMessage::reply(RequestKey::new(NodeId::new(b'A'), 0x0102_0304));
        assert_eq!(
            msg.encode(),
            [0x04, 0x03, 0x02, 0x01, b'A', 0x02, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn decode_reads_fields_in_order() {
        let bytes = [0x07, 0x00, 0x00, 0x00, b'C', 0x03, 0x00, 0x00, 0x00];
        let msg = SchedulerMessage::decode(&bytes).unwrap();
        assert_eq!(msg.request_id, 7);
        assert_eq!(msg.node, NodeId::new(b'C'));
        assert_eq!(msg.kind, MessageKind::RequestComplete);
    }

    #[test]
    fn decode_preserves_negative_request_ids() {
        let msg = SchedulerMessage::request_init(RequestKey::new(NodeId::new(0x80), -2));
        let decoded = SchedulerMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_partial_buffer() {
        let err = SchedulerMessage::decode(&[1, 0, 0, 0, b'A']).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Length {
                expected: 9,
                actual: 5
            }
        );
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let bytes = [1, 0, 0, 0, b'A', 9, 0, 0, 0];
        assert_eq!(
            SchedulerMessage::decode(&bytes).unwrap_err(),
            DecodeError::UnknownKind(9)
        );

        let bytes = [1, 0, 0, 0, b'A', 0, 0, 0, 0];
        assert_eq!(
            SchedulerMessage::decode(&bytes).unwrap_err(),
            DecodeError::UnknownKind(0)
        );
    }

    #[test]
    fn node_id_display() {
        assert_eq!(NodeId::new(b'A').to_string(), "A");
        assert_eq!(NodeId::new(0x07).to_string(), "0x07");
        assert_eq!(NodeId::from_table_index(3), Some(NodeId::new(b'3')));
        assert_eq!(NodeId::from_table_index(250), None);
    }

    #[test]
    fn node_id_from_char_rejects_wide_chars() {
        assert_eq!(NodeId::try_from('A'), Ok(NodeId::new(b'A')));
        assert!(NodeId::try_from('Ā').is_err());
        assert!(NodeId::try_from('€').is_err());
    }

    #[test]
    fn request_key_serializes() {
        let key = RequestKey::new(NodeId::new(b'B'), 12);
        insta::assert_json_snapshot!(key, @r#"
        {
          "node": 66,
          "request_id": 12
        }
        "#);
    }
}
