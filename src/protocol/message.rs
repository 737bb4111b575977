//! Protocol message definitions
//!
//! The message identifier registry, the reply-bit convention, and the
//! resolver mapping raw identifiers to logical message kinds.

use super::codec::WORD_SIZE;

/// Message identifier for the loopback test request.
pub const MSG_ID_TEST: u32 = 0x99990;

/// Message identifier for the version query.
pub const MSG_ID_GET_VERSION: u32 = 0x10000;

/// The low bit of a message identifier marks a reply.
pub const REPLY_BIT: u32 = 0x1;

/// Logical message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Loopback test; the payload content is arbitrary and ignored
    Test,
    /// Version query; carries no payload
    GetVersion,
    /// Identifier not present in the registry
    Unknown,
}

impl MessageKind {
    /// Resolve a raw message identifier to its logical kind.
    ///
    /// Exact-match lookup over request identifiers. Anything else resolves
    /// to `Unknown`, reply identifiers included, since only requests are
    /// dispatched. Pure function, no side effects.
    pub fn from_id(message_id: u32) -> Self {
        match message_id {
            MSG_ID_TEST => MessageKind::Test,
            MSG_ID_GET_VERSION => MessageKind::GetVersion,
            _ => MessageKind::Unknown,
        }
    }
}

/// Reply identifier for a request identifier.
#[inline]
pub fn reply_id(message_id: u32) -> u32 {
    message_id | REPLY_BIT
}

/// Whether an identifier carries the reply mark.
#[inline]
pub fn is_reply(message_id: u32) -> bool {
    message_id & REPLY_BIT != 0
}

/// Strip the reply mark, yielding the request identifier.
#[inline]
pub fn request_id(message_id: u32) -> u32 {
    message_id & !REPLY_BIT
}

/// One protocol message: raw identifier plus payload words.
///
/// Messages are transient: built from one inbound frame and dropped once
/// the reply is on the wire. Nothing is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw message identifier
    pub id: u32,
    /// Payload as whole 32-bit words
    pub payload: Vec<u32>,
}

impl Message {
    pub fn new(id: u32, payload: Vec<u32>) -> Self {
        Self { id, payload }
    }

    /// Test request carrying the given payload words.
    pub fn test(payload: Vec<u32>) -> Self {
        Self::new(MSG_ID_TEST, payload)
    }

    /// Version query (empty payload).
    pub fn get_version() -> Self {
        Self::new(MSG_ID_GET_VERSION, Vec::new())
    }

    /// Logical kind of this message.
    pub fn kind(&self) -> MessageKind {
        MessageKind::from_id(self.id)
    }

    /// Payload length in bytes, as carried in the frame header.
    pub fn payload_size(&self) -> u32 {
        (self.payload.len() * WORD_SIZE) as u32
    }

    /// Whether this message is a reply.
    pub fn is_reply(&self) -> bool {
        is_reply(self.id)
    }
}
