//! Message envelope: the closed set of NOW-proto messages.

use crate::channel::{Capset, ChannelMessage};
use crate::cursor::ReadCursor;
use crate::error::{DecodeError, EncodeError};
use crate::exec::{ExecData, ExecMessage, ExecResult};
use crate::header::{MessageClass, NowHeader, HEADER_SIZE};
use crate::rdm::RdmMessage;
use crate::session::SessionMessage;
use crate::system::{Shutdown, SystemMessage};
use bytes::{BufMut, Bytes, BytesMut};

/// Per-class body codec.
pub(crate) trait MessageBody: Sized {
    const CLASS: MessageClass;

    fn kind(&self) -> u8;

    fn flags(&self) -> u16;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), EncodeError>;

    fn decode_body(header: &NowHeader, cursor: &mut ReadCursor) -> Result<Self, DecodeError>;
}

/// A complete, undecoded message as yielded by the defragmenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub header: NowHeader,
    /// Exactly `header.size` bytes.
    pub body: Bytes,
}

/// Any decoded NOW-proto message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NowMessage {
    Channel(ChannelMessage),
    System(SystemMessage),
    Session(SessionMessage),
    Exec(ExecMessage),
    Rdm(RdmMessage),
}

impl NowMessage {
    pub fn class(&self) -> MessageClass {
        match self {
            Self::Channel(_) => ChannelMessage::CLASS,
            Self::System(_) => SystemMessage::CLASS,
            Self::Session(_) => SessionMessage::CLASS,
            Self::Exec(_) => ExecMessage::CLASS,
            Self::Rdm(_) => RdmMessage::CLASS,
        }
    }

    pub fn kind(&self) -> u8 {
        match self {
            Self::Channel(msg) => msg.kind(),
            Self::System(msg) => msg.kind(),
            Self::Session(msg) => msg.kind(),
            Self::Exec(msg) => msg.kind(),
            Self::Rdm(msg) => msg.kind(),
        }
    }

    fn flags(&self) -> u16 {
        match self {
            Self::Channel(msg) => msg.flags(),
            Self::System(msg) => msg.flags(),
            Self::Session(msg) => msg.flags(),
            Self::Exec(msg) => msg.flags(),
            Self::Rdm(msg) => msg.flags(),
        }
    }

    /// Encodes the message, header included.
    ///
    /// The whole message is built in memory, so an encoding error never
    /// leaves a partial message on the wire.
    pub fn encode(&self) -> Result<BytesMut, EncodeError> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + 64);
        buf.put_bytes(0, HEADER_SIZE);

        match self {
            Self::Channel(msg) => msg.encode_body(&mut buf)?,
            Self::System(msg) => msg.encode_body(&mut buf)?,
            Self::Session(msg) => msg.encode_body(&mut buf)?,
            Self::Exec(msg) => msg.encode_body(&mut buf)?,
            Self::Rdm(msg) => msg.encode_body(&mut buf)?,
        }

        let body_size = buf.len() - HEADER_SIZE;
        let header = NowHeader {
            size: u32::try_from(body_size).map_err(|_| EncodeError::MessageTooLarge(body_size))?,
            class: self.class(),
            kind: self.kind(),
            flags: self.flags(),
        };
        let mut preamble = &mut buf[..HEADER_SIZE];
        header.encode(&mut preamble);

        Ok(buf)
    }

    /// Decodes a complete message.
    ///
    /// Bytes past the fields this implementation knows about are ignored.
    pub fn decode(raw: RawMessage) -> Result<Self, DecodeError> {
        let header = raw.header;
        let mut cursor = ReadCursor::new(raw.body);

        let msg = match header.class {
            MessageClass::CHANNEL => Self::Channel(ChannelMessage::decode_body(&header, &mut cursor)?),
            MessageClass::SYSTEM => Self::System(SystemMessage::decode_body(&header, &mut cursor)?),
            MessageClass::SESSION => {
                Self::Session(SessionMessage::decode_body(&header, &mut cursor)?)
            }
            MessageClass::EXEC => Self::Exec(ExecMessage::decode_body(&header, &mut cursor)?),
            MessageClass::RDM => Self::Rdm(RdmMessage::decode_body(&header, &mut cursor)?),
            class => {
                return Err(DecodeError::UnsupportedMessage {
                    class: class.0,
                    kind: header.kind,
                })
            }
        };
        Ok(msg)
    }

    /// Decodes a single framed message from a byte slice.
    pub fn decode_bytes(buf: &[u8]) -> Result<Self, DecodeError> {
        let header = NowHeader::peek(buf).ok_or(DecodeError::NotEnoughBytes {
            name: "header",
            needed: HEADER_SIZE,
            available: buf.len(),
        })?;

        let frame_size = header.frame_size();
        if buf.len() < frame_size {
            return Err(DecodeError::NotEnoughBytes {
                name: "body",
                needed: frame_size,
                available: buf.len(),
            });
        }

        Self::decode(RawMessage {
            header,
            body: Bytes::copy_from_slice(&buf[HEADER_SIZE..frame_size]),
        })
    }
}

macro_rules! impl_from_message {
    ($($ty:ty => $($path:ident)::+;)*) => {
        $(
            impl From<$ty> for NowMessage {
                fn from(msg: $ty) -> Self {
                    $($path)::+(msg)
                }
            }
        )*
    };
}

impl_from_message! {
    ChannelMessage => NowMessage::Channel;
    SystemMessage => NowMessage::System;
    SessionMessage => NowMessage::Session;
    ExecMessage => NowMessage::Exec;
    RdmMessage => NowMessage::Rdm;
}

impl From<Capset> for NowMessage {
    fn from(capset: Capset) -> Self {
        Self::Channel(ChannelMessage::Capset(capset))
    }
}

impl From<Shutdown> for NowMessage {
    fn from(msg: Shutdown) -> Self {
        Self::System(SystemMessage::Shutdown(msg))
    }
}

impl From<ExecData> for NowMessage {
    fn from(msg: ExecData) -> Self {
        Self::Exec(ExecMessage::Data(msg))
    }
}

impl From<ExecResult> for NowMessage {
    fn from(msg: ExecResult) -> Self {
        Self::Exec(ExecMessage::Result(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_class() {
        let wire = [0x00, 0x00, 0x00, 0x00, 0x42, 0x01, 0x00, 0x00];
        assert_eq!(
            NowMessage::decode_bytes(&wire),
            Err(DecodeError::UnsupportedMessage {
                class: 0x42,
                kind: 0x01,
            })
        );
    }

    #[test]
    fn test_unknown_kind() {
        let wire = [0x00, 0x00, 0x00, 0x00, 0x12, 0x7F, 0x00, 0x00];
        assert_eq!(
            NowMessage::decode_bytes(&wire),
            Err(DecodeError::UnsupportedMessage {
                class: 0x12,
                kind: 0x7F,
            })
        );
    }

    #[test]
    fn test_truncated_body() {
        // declares 4 bytes of body, provides 2
        let wire = [0x04, 0x00, 0x00, 0x00, 0x13, 0x06, 0x00, 0x00, 0x01, 0x00];
        assert!(matches!(
            NowMessage::decode_bytes(&wire),
            Err(DecodeError::NotEnoughBytes { name: "body", .. })
        ));

        // body present but too short for its fields
        let wire = [0x02, 0x00, 0x00, 0x00, 0x13, 0x06, 0x00, 0x00, 0x01, 0x00];
        assert!(matches!(
            NowMessage::decode_bytes(&wire),
            Err(DecodeError::NotEnoughBytes {
                name: "session id",
                needed: 4,
                available: 2,
            })
        ));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let wire = [
            0x06, 0x00, 0x00, 0x00, 0x13, 0x06, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0xAA, 0xBB,
        ];
        assert_eq!(
            NowMessage::decode_bytes(&wire).unwrap(),
            NowMessage::Exec(ExecMessage::Started { session_id: 5 })
        );
    }

    #[test]
    fn test_class_and_kind() {
        let msg = NowMessage::from(SessionMessage::Logoff);
        assert_eq!(msg.class(), MessageClass::SESSION);
        assert_eq!(msg.kind(), 0x02);

        let encoded = msg.encode().unwrap();
        assert_eq!(&encoded[..], &[0x00, 0x00, 0x00, 0x00, 0x12, 0x02, 0x00, 0x00]);
    }
}
