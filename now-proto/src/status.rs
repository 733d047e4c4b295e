//! Operation status carried by close, cancel, result and message box replies.
//!
//! ```text
//! flags:u16 | kind:u16 | code:u32 | message:VarStr
//! ```

use crate::cursor::{var_str_size, ReadCursor, WriteExt};
use crate::error::{DecodeError, EncodeError};
use bytes::BufMut;
use thiserror::Error;

const STATUS_ERROR: u16 = 0x0001;
const STATUS_ERROR_MESSAGE: u16 = 0x0002;

/// Error domain of a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Generic,
    Now,
    WinApi,
    Unix,
    Unknown(u16),
}

impl StatusKind {
    fn from_wire(value: u16) -> Self {
        match value {
            0 => Self::Generic,
            1 => Self::Now,
            2 => Self::WinApi,
            3 => Self::Unix,
            other => Self::Unknown(other),
        }
    }

    fn to_wire(self) -> u16 {
        match self {
            Self::Generic => 0,
            Self::Now => 1,
            Self::WinApi => 2,
            Self::Unix => 3,
            Self::Unknown(value) => value,
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Now => write!(f, "now-proto"),
            Self::WinApi => write!(f, "winapi"),
            Self::Unix => write!(f, "unix"),
            Self::Unknown(value) => write!(f, "unknown({})", value),
        }
    }
}

/// Protocol-level error codes used with [`StatusKind::Now`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NowErrorCode {
    InUse,
    InvalidRequest,
    Aborted,
    NotFound,
    AccessDenied,
    Internal,
    NotImplemented,
    ProtocolVersion,
    Other(u32),
}

impl NowErrorCode {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::InUse,
            2 => Self::InvalidRequest,
            3 => Self::Aborted,
            4 => Self::NotFound,
            5 => Self::AccessDenied,
            6 => Self::Internal,
            7 => Self::NotImplemented,
            8 => Self::ProtocolVersion,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::InUse => 1,
            Self::InvalidRequest => 2,
            Self::Aborted => 3,
            Self::NotFound => 4,
            Self::AccessDenied => 5,
            Self::Internal => 6,
            Self::NotImplemented => 7,
            Self::ProtocolVersion => 8,
            Self::Other(code) => *code,
        }
    }
}

/// An error status reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct NowStatusError {
    pub kind: StatusKind,
    pub code: u32,
    pub message: Option<String>,
}

impl NowStatusError {
    pub fn new(kind: StatusKind, code: u32) -> Self {
        Self {
            kind,
            code,
            message: None,
        }
    }

    pub fn generic(code: u32) -> Self {
        Self::new(StatusKind::Generic, code)
    }

    pub fn now(code: NowErrorCode) -> Self {
        Self::new(StatusKind::Now, code.code())
    }

    pub fn win_api(code: u32) -> Self {
        Self::new(StatusKind::WinApi, code)
    }

    pub fn unix(code: u32) -> Self {
        Self::new(StatusKind::Unix, code)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Interprets the code as a NOW-proto error code, if the kind says so.
    pub fn now_code(&self) -> Option<NowErrorCode> {
        (self.kind == StatusKind::Now).then(|| NowErrorCode::from_code(self.code))
    }
}

impl std::fmt::Display for NowStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error {:#x}", self.kind, self.code)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// Success or error status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NowStatus {
    #[default]
    Success,
    Error(NowStatusError),
}

impl NowStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn into_result(self) -> Result<(), NowStatusError> {
        match self {
            Self::Success => Ok(()),
            Self::Error(err) => Err(err),
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Error(NowStatusError {
                message: Some(message),
                ..
            }) => message,
            _ => "",
        }
    }

    pub fn size(&self) -> usize {
        2 + 2 + 4 + var_str_size(self.message())
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), EncodeError> {
        let (flags, kind, code) = match self {
            Self::Success => (0, 0, 0),
            Self::Error(err) => {
                let mut flags = STATUS_ERROR;
                if err.message.is_some() {
                    flags |= STATUS_ERROR_MESSAGE;
                }
                (flags, err.kind.to_wire(), err.code)
            }
        };

        buf.put_u16_le(flags);
        buf.put_u16_le(kind);
        buf.put_u32_le(code);
        buf.put_var_str(self.message())
    }

    pub fn decode(cursor: &mut ReadCursor) -> Result<Self, DecodeError> {
        let flags = cursor.read_u16("status flags")?;
        let kind = cursor.read_u16("status kind")?;
        let code = cursor.read_u32("status code")?;
        let message = cursor.read_var_str("status message")?;

        if flags & STATUS_ERROR == 0 {
            return Ok(Self::Success);
        }

        Ok(Self::Error(NowStatusError {
            kind: StatusKind::from_wire(kind),
            code,
            message: (flags & STATUS_ERROR_MESSAGE != 0).then_some(message),
        }))
    }
}

impl From<NowStatusError> for NowStatus {
    fn from(err: NowStatusError) -> Self {
        Self::Error(err)
    }
}

impl From<Result<(), NowStatusError>> for NowStatus {
    fn from(result: Result<(), NowStatusError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(err) => Self::Error(err),
        }
    }
}
