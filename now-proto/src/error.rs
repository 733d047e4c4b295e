//! Protocol error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while parsing a message or one of its fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("not enough bytes for {name}: need {needed}, have {available}")]
    NotEnoughBytes {
        name: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("unsupported message: class {class:#04x}, kind {kind:#04x}")]
    UnsupportedMessage { class: u8, kind: u8 },

    #[error("invalid flags for {name}: {flags:#06x}")]
    InvalidFlags { name: &'static str, flags: u16 },

    #[error("invalid {name}: {reason}")]
    InvalidField {
        name: &'static str,
        reason: &'static str,
    },

    #[error("invalid UTF-8 in {name}")]
    InvalidUtf8 { name: &'static str },

    #[error("missing NUL terminator in {name}")]
    MissingNulTerminator { name: &'static str },

    #[error("invalid GUID: {0}")]
    InvalidGuid(String),
}

/// Errors raised while constructing or serializing a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("value {0} does not fit in a VarU32")]
    VarU32OutOfRange(u64),

    #[error("heartbeat interval {0:?} is outside 5s..=24h")]
    HeartbeatOutOfRange(Duration),

    #[error("message body too large: {0} bytes")]
    MessageTooLarge(usize),
}

/// Top-level protocol error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("message buffer overflow: {required} bytes required (max {max})")]
    BufferOverflow { required: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::NotEnoughBytes {
            name: "header",
            needed: 8,
            available: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("header"));
        assert!(msg.contains('8'));
        assert!(msg.contains('3'));

        let err = DecodeError::UnsupportedMessage {
            class: 0x42,
            kind: 0x01,
        };
        assert!(err.to_string().contains("0x42"));

        let err = DecodeError::InvalidFlags {
            name: "exec data",
            flags: 0x000F,
        };
        assert!(err.to_string().contains("0x000f"));
    }

    #[test]
    fn test_protocol_error_from() {
        let err: ProtocolError = EncodeError::VarU32OutOfRange(0x4000_0000).into();
        assert!(matches!(err, ProtocolError::Encode(_)));
        assert!(err.to_string().contains("1073741824"));

        let err: ProtocolError = DecodeError::InvalidUtf8 { name: "title" }.into();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_buffer_overflow_display() {
        let err = ProtocolError::BufferOverflow {
            required: 2048,
            max: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
    }
}
