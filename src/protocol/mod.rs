//! Protocol module - Defines the LAN message wire protocol
//!
//! A frame is a fixed 8-byte header followed by a payload of whole 32-bit
//! words, everything big-endian:
//! - 4 bytes message identifier
//! - 4 bytes payload size (in bytes, a multiple of 4)
//! - payload_size / 4 words
//!
//! A reply to identifier `X` uses identifier `X | 0x1`.

mod codec;
mod dispatch;
mod message;

pub use codec::*;
pub use dispatch::*;
pub use message::*;

/// Version word carried in a GetVersion reply
pub const VERSION_WORD: u32 = 0x00001701;

/// Default TCP port for LAN message exchange
pub const DEFAULT_PORT: u16 = 50001;
