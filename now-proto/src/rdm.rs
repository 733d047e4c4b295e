//! RDM class: companion application control.
//!
//! The client first syncs capabilities (`Capabilities` in both directions),
//! then starts the application, drives it with `AppAction` and follows its
//! lifecycle through `AppNotify`. Individual connections inside the
//! application are tracked by GUID with the `Session*` messages.

use crate::cursor::{ReadCursor, WriteExt};
use crate::error::{DecodeError, EncodeError};
use crate::header::{MessageClass, NowHeader};
use crate::message::MessageBody;
use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const KIND_CAPABILITIES: u8 = 0x01;
const KIND_APP_START: u8 = 0x02;
const KIND_APP_ACTION: u8 = 0x03;
const KIND_APP_NOTIFY: u8 = 0x04;
const KIND_SESSION_START: u8 = 0x05;
const KIND_SESSION_ACTION: u8 = 0x06;
const KIND_SESSION_NOTIFY: u8 = 0x07;

const SYNC_APP_AVAILABLE: u32 = 0x0000_0001;

/// Default time the host waits for the application to become ready.
pub const DEFAULT_APP_START_TIMEOUT: Duration = Duration::from_secs(45);

/// Declares an open `u32` enumeration. Unlisted values decode to
/// `Other` and encode back unchanged.
macro_rules! rdm_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $variant:ident = $value:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )*
            Other(u32),
        }

        impl $name {
            fn from_wire(value: u32) -> Self {
                match value {
                    $( $value => Self::$variant, )*
                    other => Self::Other(other),
                }
            }

            fn to_wire(self) -> u32 {
                match self {
                    $( Self::$variant => $value, )*
                    Self::Other(value) => value,
                }
            }
        }
    };
}

rdm_enum! {
    /// Window operation on the companion application.
    pub enum AppAction {
        Close = 1,
        Minimize = 2,
        Maximize = 3,
        Restore = 4,
        Fullscreen = 5,
    }
}

rdm_enum! {
    pub enum AppState {
        Ready = 1,
        Failed = 2,
        Closed = 3,
        Minimized = 4,
        Maximized = 5,
        Restored = 6,
        Fullscreen = 7,
    }
}

rdm_enum! {
    pub enum AppReason {
        NotSpecified = 0,
        UserInitiated = 1,
        NotInstalled = 2,
        StartupFailure = 3,
        LaunchTimeout = 4,
    }
}

rdm_enum! {
    pub enum SessionAction {
        Close = 1,
        Focus = 2,
    }
}

rdm_enum! {
    pub enum SessionNotifyKind {
        Close = 1,
        Focus = 2,
    }
}

bitflags! {
    /// How the companion application window is launched.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct AppLaunchFlags: u32 {
        const JUMP_MODE = 0x0000_0001;
        const MAXIMIZED = 0x0000_0002;
        const FULLSCREEN = 0x0000_0004;
    }
}

/// Capability exchange, sent by both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmCapabilitiesMsg {
    /// Unix time in seconds.
    pub timestamp: u64,
    pub app_available: bool,
    pub rdm_version: String,
    pub version_extra: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmAppStart {
    pub launch_flags: AppLaunchFlags,
    /// Launch timeout, at second granularity.
    pub timeout: Duration,
}

impl RdmAppStart {
    pub fn new() -> Self {
        Self {
            launch_flags: AppLaunchFlags::empty(),
            timeout: DEFAULT_APP_START_TIMEOUT,
        }
    }

    pub fn with_launch_flags(mut self, flags: AppLaunchFlags) -> Self {
        self.launch_flags = flags;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for RdmAppStart {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmAppNotify {
    pub state: AppState,
    pub reason: AppReason,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmSessionStart {
    pub session_id: Uuid,
    pub connection_id: Uuid,
    pub connection_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmSessionNotify {
    pub kind: SessionNotifyKind,
    pub session_id: Uuid,
    pub log_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RdmMessage {
    Capabilities(RdmCapabilitiesMsg),
    AppStart(RdmAppStart),
    AppAction { action: AppAction, data: String },
    AppNotify(RdmAppNotify),
    SessionStart(RdmSessionStart),
    SessionAction { action: SessionAction, session_id: Uuid },
    SessionNotify(RdmSessionNotify),
}

impl MessageBody for RdmMessage {
    const CLASS: MessageClass = MessageClass::RDM;

    fn kind(&self) -> u8 {
        match self {
            Self::Capabilities(_) => KIND_CAPABILITIES,
            Self::AppStart(_) => KIND_APP_START,
            Self::AppAction { .. } => KIND_APP_ACTION,
            Self::AppNotify(_) => KIND_APP_NOTIFY,
            Self::SessionStart(_) => KIND_SESSION_START,
            Self::SessionAction { .. } => KIND_SESSION_ACTION,
            Self::SessionNotify(_) => KIND_SESSION_NOTIFY,
        }
    }

    fn flags(&self) -> u16 {
        0
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            Self::Capabilities(msg) => {
                buf.put_u64_le(msg.timestamp);
                buf.put_u32_le(if msg.app_available {
                    SYNC_APP_AVAILABLE
                } else {
                    0
                });
                buf.put_var_str(&msg.rdm_version)?;
                buf.put_var_str(&msg.version_extra)?;
            }
            Self::AppStart(msg) => {
                buf.put_u32_le(msg.launch_flags.bits());
                buf.put_u32_le(msg.timeout.as_secs().min(u32::MAX as u64) as u32);
            }
            Self::AppAction { action, data } => {
                buf.put_u32_le(action.to_wire());
                buf.put_var_str(data)?;
            }
            Self::AppNotify(msg) => {
                buf.put_u32_le(msg.state.to_wire());
                buf.put_u32_le(msg.reason.to_wire());
                buf.put_var_str(&msg.data)?;
            }
            Self::SessionStart(msg) => {
                buf.put_guid(&msg.session_id);
                buf.put_guid(&msg.connection_id);
                buf.put_var_str(&msg.connection_data)?;
            }
            Self::SessionAction { action, session_id } => {
                buf.put_u32_le(action.to_wire());
                buf.put_guid(session_id);
            }
            Self::SessionNotify(msg) => {
                buf.put_u32_le(msg.kind.to_wire());
                buf.put_guid(&msg.session_id);
                buf.put_var_str(&msg.log_data)?;
            }
        }
        Ok(())
    }

    fn decode_body(header: &NowHeader, cursor: &mut ReadCursor) -> Result<Self, DecodeError> {
        let msg = match header.kind {
            KIND_CAPABILITIES => Self::Capabilities(RdmCapabilitiesMsg {
                timestamp: cursor.read_u64("rdm timestamp")?,
                app_available: cursor.read_u32("rdm sync flags")? & SYNC_APP_AVAILABLE != 0,
                rdm_version: cursor.read_var_str("rdm version")?,
                version_extra: cursor.read_var_str("rdm version extra")?,
            }),
            KIND_APP_START => Self::AppStart(RdmAppStart {
                launch_flags: AppLaunchFlags::from_bits_retain(cursor.read_u32("launch flags")?),
                timeout: Duration::from_secs(cursor.read_u32("launch timeout")? as u64),
            }),
            KIND_APP_ACTION => Self::AppAction {
                action: AppAction::from_wire(cursor.read_u32("app action")?),
                data: cursor.read_var_str("app action data")?,
            },
            KIND_APP_NOTIFY => Self::AppNotify(RdmAppNotify {
                state: AppState::from_wire(cursor.read_u32("app state")?),
                reason: AppReason::from_wire(cursor.read_u32("app notify reason")?),
                data: cursor.read_var_str("app notify data")?,
            }),
            KIND_SESSION_START => Self::SessionStart(RdmSessionStart {
                session_id: cursor.read_guid("session id")?,
                connection_id: cursor.read_guid("connection id")?,
                connection_data: cursor.read_var_str("connection data")?,
            }),
            KIND_SESSION_ACTION => Self::SessionAction {
                action: SessionAction::from_wire(cursor.read_u32("session action")?),
                session_id: cursor.read_guid("session id")?,
            },
            KIND_SESSION_NOTIFY => Self::SessionNotify(RdmSessionNotify {
                kind: SessionNotifyKind::from_wire(cursor.read_u32("session notify kind")?),
                session_id: cursor.read_guid("session id")?,
                log_data: cursor.read_var_str("session log data")?,
            }),
            kind => {
                return Err(DecodeError::UnsupportedMessage {
                    class: Self::CLASS.0,
                    kind,
                })
            }
        };
        Ok(msg)
    }
}
