//! NOW-proto message header.
//!
//! Every message starts with an 8-byte little-endian header:
//!
//! ```text
//! +-----------+-------+------+--------+
//! | body_size | class | kind | flags  |
//! |  4 bytes  | 1 byte|1 byte| 2 bytes|
//! +-----------+-------+------+--------+
//! | body (body_size bytes)            |
//! +-----------------------------------+
//! ```

use crate::cursor::ReadCursor;
use crate::error::DecodeError;
use bytes::{Buf, BufMut};

/// Size of the fixed message header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Message class identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageClass(pub u8);

impl MessageClass {
    pub const CHANNEL: Self = Self(0x10);
    pub const SYSTEM: Self = Self(0x11);
    pub const SESSION: Self = Self(0x12);
    pub const EXEC: Self = Self(0x13);
    pub const RDM: Self = Self(0x14);

    pub fn name(&self) -> &'static str {
        match *self {
            Self::CHANNEL => "channel",
            Self::SYSTEM => "system",
            Self::SESSION => "session",
            Self::EXEC => "exec",
            Self::RDM => "rdm",
            _ => "unknown",
        }
    }
}

impl std::fmt::Display for MessageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:#04x})", self.name(), self.0)
    }
}

/// A parsed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NowHeader {
    /// Body size in bytes, excluding the header.
    pub size: u32,
    pub class: MessageClass,
    pub kind: u8,
    pub flags: u16,
}

impl NowHeader {
    /// Reads a header from the start of `buf` without consuming it.
    ///
    /// Returns `None` until at least [`HEADER_SIZE`] bytes are available.
    pub fn peek(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }

        let mut preamble = &buf[..HEADER_SIZE];
        Some(Self {
            size: preamble.get_u32_le(),
            class: MessageClass(preamble.get_u8()),
            kind: preamble.get_u8(),
            flags: preamble.get_u16_le(),
        })
    }

    /// Total size of the framed message (header plus body).
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.size as usize
    }

    pub fn decode(cursor: &mut ReadCursor) -> Result<Self, DecodeError> {
        Ok(Self {
            size: cursor.read_u32("header size")?,
            class: MessageClass(cursor.read_u8("header class")?),
            kind: cursor.read_u8("header kind")?,
            flags: cursor.read_u16("header flags")?,
        })
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.size);
        buf.put_u8(self.class.0);
        buf.put_u8(self.kind);
        buf.put_u16_le(self.flags);
    }
}
