//! Protocol codec for encoding/decoding frames
//!
//! Handles the fixed 8-byte header and the word payload. Everything on the
//! wire is big-endian regardless of host byte order.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::Message;

/// Header size: message_id(4) + payload_size(4) = 8 bytes
pub const HEADER_SIZE: usize = 8;

/// Size of one payload word in bytes
pub const WORD_SIZE: usize = 4;

/// Default upper bound for an inbound payload (64 KiB)
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Payload size {0} is not a multiple of {WORD_SIZE}")]
    MisalignedPayload(u32),

    #[error("Payload too large: {0} bytes (max: {1})")]
    PayloadTooLarge(u32, usize),
}

/// The fixed 8-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw message identifier
    pub message_id: u32,
    /// Payload length in bytes (a whole number of words)
    pub payload_size: u32,
}

impl Header {
    pub fn new(message_id: u32, payload_size: u32) -> Self {
        Self {
            message_id,
            payload_size,
        }
    }

    /// Header describing `message`.
    pub fn for_message(message: &Message) -> Self {
        Self::new(message.id, message.payload_size())
    }

    /// Encode to wire bytes, big-endian, field order (message_id, payload_size).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.message_id.to_be_bytes());
        buf[4..8].copy_from_slice(&self.payload_size.to_be_bytes());
        buf
    }

    /// Decode from wire bytes.
    ///
    /// Performs no size validation; callers run [`Header::validate`] before
    /// allocating the payload buffer.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            message_id: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            payload_size: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    /// Size sanity for an inbound header.
    ///
    /// Rejects a payload size that is not a whole number of words, and one
    /// exceeding `max_payload_size`. Runs before the payload buffer is
    /// allocated, so a corrupt or hostile length never reaches `vec![]`.
    pub fn validate(&self, max_payload_size: usize) -> Result<(), CodecError> {
        if self.payload_size as usize % WORD_SIZE != 0 {
            return Err(CodecError::MisalignedPayload(self.payload_size));
        }

        if self.payload_size as usize > max_payload_size {
            return Err(CodecError::PayloadTooLarge(
                self.payload_size,
                max_payload_size,
            ));
        }

        Ok(())
    }

    /// Payload length in whole words.
    pub fn word_count(&self) -> usize {
        self.payload_size as usize / WORD_SIZE
    }
}

/// Encode payload words into `buf`, big-endian.
pub fn encode_words(words: &[u32], buf: &mut BytesMut) {
    for &word in words {
        buf.put_u32(word);
    }
}

/// Decode a payload of whole words, big-endian.
///
/// `bytes.len()` is a multiple of [`WORD_SIZE`] on the read path, enforced
/// by [`Header::validate`]; trailing ragged bytes would be ignored.
pub fn decode_words(mut bytes: &[u8]) -> Vec<u32> {
    let mut words = Vec::with_capacity(bytes.len() / WORD_SIZE);
    while bytes.len() >= WORD_SIZE {
        words.push(bytes.get_u32());
    }
    words
}

/// Encode a complete frame (header + payload words) into `buf`.
pub fn encode_frame(message: &Message, buf: &mut BytesMut) {
    let header = Header::for_message(message);
    buf.put_slice(&header.encode());
    encode_words(&message.payload, buf);
}
