//! System class: shutdown.

use crate::cursor::{ReadCursor, WriteExt};
use crate::error::{DecodeError, EncodeError};
use crate::header::{MessageClass, NowHeader};
use crate::message::MessageBody;
use bytes::{BufMut, BytesMut};
use std::time::Duration;

const KIND_SHUTDOWN: u8 = 0x03;

const SHUTDOWN_FORCE: u16 = 0x0001;
const SHUTDOWN_REBOOT: u16 = 0x0002;

/// Requests a shutdown or reboot of the remote machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shutdown {
    /// Delay before the shutdown, at second granularity.
    pub timeout: Duration,
    /// Message shown to logged-on users.
    pub message: String,
    /// Close applications without saving.
    pub force: bool,
    pub reboot: bool,
}

impl Shutdown {
    pub fn new(timeout: Duration, message: impl Into<String>) -> Self {
        Self {
            timeout,
            message: message.into(),
            force: false,
            reboot: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_reboot(mut self, reboot: bool) -> Self {
        self.reboot = reboot;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemMessage {
    Shutdown(Shutdown),
}

impl MessageBody for SystemMessage {
    const CLASS: MessageClass = MessageClass::SYSTEM;

    fn kind(&self) -> u8 {
        match self {
            Self::Shutdown(_) => KIND_SHUTDOWN,
        }
    }

    fn flags(&self) -> u16 {
        match self {
            Self::Shutdown(msg) => {
                let mut flags = 0;
                if msg.force {
                    flags |= SHUTDOWN_FORCE;
                }
                if msg.reboot {
                    flags |= SHUTDOWN_REBOOT;
                }
                flags
            }
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            Self::Shutdown(msg) => {
                buf.put_u32_le(msg.timeout.as_secs().min(u32::MAX as u64) as u32);
                buf.put_var_str(&msg.message)
            }
        }
    }

    fn decode_body(header: &NowHeader, cursor: &mut ReadCursor) -> Result<Self, DecodeError> {
        match header.kind {
            KIND_SHUTDOWN => Ok(Self::Shutdown(Shutdown {
                timeout: Duration::from_secs(cursor.read_u32("shutdown timeout")? as u64),
                message: cursor.read_var_str("shutdown message")?,
                force: header.flags & SHUTDOWN_FORCE != 0,
                reboot: header.flags & SHUTDOWN_REBOOT != 0,
            })),
            kind => Err(DecodeError::UnsupportedMessage {
                class: Self::CLASS.0,
                kind,
            }),
        }
    }
}
