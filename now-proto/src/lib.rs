//! # now-proto
//!
//! Wire format for NOW-proto, the binary protocol spoken between a remote
//! desktop client and its in-session agent over a virtual channel.
//!
//! This crate provides:
//! - Field codecs (little-endian integers, VarU32, VarStr, VarBuf, GUID)
//! - The 8-byte message header and the status envelope
//! - Typed messages for the channel, system, session, exec and RDM classes
//! - Stream defragmentation ([`MessageBuffer`])
//!
//! Nothing here performs I/O.

pub mod buffer;
pub mod channel;
pub mod cursor;
pub mod error;
pub mod exec;
pub mod header;
pub mod message;
pub mod rdm;
pub mod session;
pub mod status;
pub mod system;

pub use buffer::{MessageBuffer, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
pub use channel::{Capset, ChannelMessage, ExecCaps, ProtoVersion, SessionCaps, SystemCaps};
pub use error::{DecodeError, EncodeError, ProtocolError};
pub use exec::{
    ApartmentState, ExecBatch, ExecData, ExecMessage, ExecPowerShell, ExecProcess, ExecResult,
    ExecRun, ExecShell, ExecStream,
};
pub use header::{MessageClass, NowHeader, HEADER_SIZE};
pub use message::{NowMessage, RawMessage};
pub use rdm::RdmMessage;
pub use session::SessionMessage;
pub use status::{NowErrorCode, NowStatus, NowStatusError, StatusKind};
pub use system::{Shutdown, SystemMessage};

/// Protocol version implemented by this crate.
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 1;

/// Lowest negotiated version that carries the RDM message class.
pub const RDM_MIN_VERSION: ProtoVersion = ProtoVersion::new(1, 1);
