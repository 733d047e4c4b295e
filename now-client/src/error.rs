//! Client error types.

use crate::config::ConfigError;
use now_proto::{DecodeError, EncodeError, NowStatusError, ProtoVersion, ProtocolError};
use thiserror::Error;
use uuid::Uuid;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("operation timed out")]
    Timeout,

    #[error("protocol version mismatch: local {local}, remote {remote}")]
    VersionMismatch {
        local: ProtoVersion,
        remote: ProtoVersion,
    },

    #[error("unexpected message: class {class:#04x}, kind {kind:#04x}")]
    UnexpectedMessage { class: u8, kind: u8 },

    #[error("{0} is not supported by the server")]
    Capability(String),

    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    #[error("channel closed by peer: {0}")]
    ChannelClosed(NowStatusError),

    #[error("worker terminated")]
    WorkerTerminated,

    #[error("operation failed: {0}")]
    Status(NowStatusError),

    #[error("exec session {session_id} already terminated")]
    SessionTerminated { session_id: u32 },

    #[error("stdin of exec session {session_id} already closed")]
    StdinClosed { session_id: u32 },

    #[error("exec session {session_id} was canceled")]
    ExecCanceled { session_id: u32 },

    #[error("exec session {session_id} was aborted with exit code {exit_code}")]
    ExecAborted { session_id: u32, exit_code: u32 },

    #[error("RDM session {0} is closed")]
    RdmSessionClosed(Uuid),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Returns whether the error ends the connection. Encode failures are
    /// reported to the caller before anything is written and are not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Protocol(
                    ProtocolError::Decode(_) | ProtocolError::BufferOverflow { .. }
                )
                | ClientError::ConnectionClosed
                | ClientError::VersionMismatch { .. }
                | ClientError::UnexpectedMessage { .. }
                | ClientError::HeartbeatTimeout
                | ClientError::ChannelClosed(_)
                | ClientError::WorkerTerminated
        )
    }
}

impl From<DecodeError> for ClientError {
    fn from(err: DecodeError) -> Self {
        ClientError::Protocol(err.into())
    }
}

impl From<EncodeError> for ClientError {
    fn from(err: EncodeError) -> Self {
        ClientError::Protocol(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use now_proto::NowErrorCode;

    #[test]
    fn test_fatal_classification() {
        assert!(ClientError::ConnectionClosed.is_fatal());
        assert!(ClientError::HeartbeatTimeout.is_fatal());
        assert!(ClientError::WorkerTerminated.is_fatal());
        assert!(ClientError::from(DecodeError::InvalidUtf8 { name: "x" }).is_fatal());

        assert!(!ClientError::Timeout.is_fatal());
        assert!(!ClientError::Capability("Shell execution style".into()).is_fatal());
        assert!(!ClientError::Status(NowStatusError::now(NowErrorCode::AccessDenied)).is_fatal());
        assert!(!ClientError::SessionTerminated { session_id: 1 }.is_fatal());
        assert!(!ClientError::from(EncodeError::VarU32OutOfRange(0x4000_0000)).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = ClientError::VersionMismatch {
            local: ProtoVersion::new(1, 1),
            remote: ProtoVersion::new(2, 0),
        };
        assert_eq!(
            err.to_string(),
            "protocol version mismatch: local 1.1, remote 2.0"
        );

        let err = ClientError::Capability("Shell execution style".into());
        assert_eq!(
            err.to_string(),
            "Shell execution style is not supported by the server"
        );
    }

    #[test]
    fn test_encode_error_conversion() {
        let err = ClientError::from(EncodeError::VarU32OutOfRange(1 << 31));
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::Encode(_))
        ));
    }
}
