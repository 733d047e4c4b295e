//! Session class: lock, logoff, message box, keyboard layout and window
//! recording.

use crate::cursor::{ReadCursor, WriteExt};
use crate::error::{DecodeError, EncodeError};
use crate::header::{MessageClass, NowHeader};
use crate::message::MessageBody;
use crate::status::{NowStatus, NowStatusError};
use bytes::{BufMut, BytesMut};
use std::time::Duration;

const KIND_LOCK: u8 = 0x01;
const KIND_LOGOFF: u8 = 0x02;
const KIND_MSGBOX_REQ: u8 = 0x03;
const KIND_MSGBOX_RSP: u8 = 0x04;
const KIND_SET_KBD_LAYOUT: u8 = 0x05;
const KIND_WINDOW_REC_START: u8 = 0x06;
const KIND_WINDOW_REC_STOP: u8 = 0x07;
const KIND_WINDOW_REC_EVENT: u8 = 0x08;

const MSGBOX_TITLE: u16 = 0x0001;
const MSGBOX_STYLE: u16 = 0x0002;
const MSGBOX_TIMEOUT: u16 = 0x0004;
const MSGBOX_RESPONSE: u16 = 0x0008;

const KBD_LAYOUT_NEXT: u16 = 0x0001;
const KBD_LAYOUT_PREV: u16 = 0x0002;

const WINDOW_REC_TRACK_TITLE: u16 = 0x0001;

const WINDOW_EVENT_ACTIVE: u16 = 0x0001;
const WINDOW_EVENT_TITLE_CHANGED: u16 = 0x0002;
const WINDOW_EVENT_NO_ACTIVE: u16 = 0x0004;

/// Message box button and icon style, as a Win32 `MB_*` value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MsgBoxStyle(pub u32);

impl MsgBoxStyle {
    pub const OK: Self = Self(0x0000_0000);
    pub const OK_CANCEL: Self = Self(0x0000_0001);
    pub const ABORT_RETRY_IGNORE: Self = Self(0x0000_0002);
    pub const YES_NO_CANCEL: Self = Self(0x0000_0003);
    pub const YES_NO: Self = Self(0x0000_0004);
    pub const RETRY_CANCEL: Self = Self(0x0000_0005);
    pub const CANCEL_TRY_CONTINUE: Self = Self(0x0000_0006);
    pub const HELP: Self = Self(0x0000_4000);
}

/// Button pressed by the user, or timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgBoxResponse {
    Ok,
    Cancel,
    Abort,
    Retry,
    Ignore,
    Yes,
    No,
    TryAgain,
    Continue,
    Timeout,
    /// A Win32 `ID*` value without a named variant.
    Other(u32),
}

impl MsgBoxResponse {
    fn from_wire(value: u32) -> Self {
        match value {
            1 => Self::Ok,
            2 => Self::Cancel,
            3 => Self::Abort,
            4 => Self::Retry,
            5 => Self::Ignore,
            6 => Self::Yes,
            7 => Self::No,
            10 => Self::TryAgain,
            11 => Self::Continue,
            32000 => Self::Timeout,
            other => Self::Other(other),
        }
    }

    fn to_wire(self) -> u32 {
        match self {
            Self::Ok => 1,
            Self::Cancel => 2,
            Self::Abort => 3,
            Self::Retry => 4,
            Self::Ignore => 5,
            Self::Yes => 6,
            Self::No => 7,
            Self::TryAgain => 10,
            Self::Continue => 11,
            Self::Timeout => 32000,
            Self::Other(value) => value,
        }
    }
}

/// Shows a message box in the remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgBoxRequest {
    pub request_id: u32,
    pub message: String,
    pub title: Option<String>,
    pub style: Option<MsgBoxStyle>,
    /// Auto-dismiss delay, at second granularity.
    pub timeout: Option<Duration>,
    /// Ask the peer to send back the pressed button.
    pub wait_response: bool,
}

impl MsgBoxRequest {
    pub fn new(request_id: u32, message: impl Into<String>) -> Self {
        Self {
            request_id,
            message: message.into(),
            title: None,
            style: None,
            timeout: None,
            wait_response: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_style(mut self, style: MsgBoxStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_response(mut self) -> Self {
        self.wait_response = true;
        self
    }
}

/// Reply to a [`MsgBoxRequest`] with `wait_response` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgBoxReply {
    pub request_id: u32,
    pub response: Result<MsgBoxResponse, NowStatusError>,
}

/// Keyboard layout selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KbdLayout {
    /// A layout identifier such as `00000409`.
    Specific(String),
    Next,
    Prev,
}

/// Starts window tracking in the remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecStart {
    pub poll_interval: Duration,
    pub track_title_change: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowRecEventKind {
    ActiveWindow {
        process_id: u32,
        title: String,
        executable_path: String,
    },
    TitleChanged {
        title: String,
    },
    NoActiveWindow,
}

/// Foreground window change reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecEvent {
    /// Unix time in seconds.
    pub timestamp: u64,
    pub kind: WindowRecEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    Lock,
    Logoff,
    MsgBoxReq(MsgBoxRequest),
    MsgBoxRsp(MsgBoxReply),
    SetKbdLayout(KbdLayout),
    WindowRecStart(WindowRecStart),
    WindowRecStop,
    WindowRecEvent(WindowRecEvent),
}

fn secs_u32(duration: Duration) -> u32 {
    duration.as_secs().min(u32::MAX as u64) as u32
}

impl MessageBody for SessionMessage {
    const CLASS: MessageClass = MessageClass::SESSION;

    fn kind(&self) -> u8 {
        match self {
            Self::Lock => KIND_LOCK,
            Self::Logoff => KIND_LOGOFF,
            Self::MsgBoxReq(_) => KIND_MSGBOX_REQ,
            Self::MsgBoxRsp(_) => KIND_MSGBOX_RSP,
            Self::SetKbdLayout(_) => KIND_SET_KBD_LAYOUT,
            Self::WindowRecStart(_) => KIND_WINDOW_REC_START,
            Self::WindowRecStop => KIND_WINDOW_REC_STOP,
            Self::WindowRecEvent(_) => KIND_WINDOW_REC_EVENT,
        }
    }

    fn flags(&self) -> u16 {
        match self {
            Self::MsgBoxReq(req) => {
                let mut flags = 0;
                if req.title.is_some() {
                    flags |= MSGBOX_TITLE;
                }
                if req.style.is_some() {
                    flags |= MSGBOX_STYLE;
                }
                if req.timeout.is_some() {
                    flags |= MSGBOX_TIMEOUT;
                }
                if req.wait_response {
                    flags |= MSGBOX_RESPONSE;
                }
                flags
            }
            Self::SetKbdLayout(KbdLayout::Next) => KBD_LAYOUT_NEXT,
            Self::SetKbdLayout(KbdLayout::Prev) => KBD_LAYOUT_PREV,
            Self::WindowRecStart(start) if start.track_title_change => WINDOW_REC_TRACK_TITLE,
            Self::WindowRecEvent(event) => match event.kind {
                WindowRecEventKind::ActiveWindow { .. } => WINDOW_EVENT_ACTIVE,
                WindowRecEventKind::TitleChanged { .. } => WINDOW_EVENT_TITLE_CHANGED,
                WindowRecEventKind::NoActiveWindow => WINDOW_EVENT_NO_ACTIVE,
            },
            _ => 0,
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            Self::Lock | Self::Logoff | Self::WindowRecStop => {}
            Self::MsgBoxReq(req) => {
                buf.put_u32_le(req.request_id);
                buf.put_u32_le(req.style.unwrap_or_default().0);
                buf.put_u32_le(req.timeout.map_or(0, secs_u32));
                buf.put_var_str(req.title.as_deref().unwrap_or_default())?;
                buf.put_var_str(&req.message)?;
            }
            Self::MsgBoxRsp(rsp) => {
                buf.put_u32_le(rsp.request_id);
                match &rsp.response {
                    Ok(response) => {
                        buf.put_u32_le(response.to_wire());
                        NowStatus::Success.encode(buf)?;
                    }
                    Err(err) => {
                        buf.put_u32_le(0);
                        NowStatus::Error(err.clone()).encode(buf)?;
                    }
                }
            }
            Self::SetKbdLayout(layout) => match layout {
                KbdLayout::Specific(name) => buf.put_var_str(name)?,
                KbdLayout::Next | KbdLayout::Prev => buf.put_var_str("")?,
            },
            Self::WindowRecStart(start) => {
                buf.put_u32_le(start.poll_interval.as_millis().min(u32::MAX as u128) as u32);
            }
            Self::WindowRecEvent(event) => {
                buf.put_u64_le(event.timestamp);
                let (process_id, title, executable_path) = match &event.kind {
                    WindowRecEventKind::ActiveWindow {
                        process_id,
                        title,
                        executable_path,
                    } => (*process_id, title.as_str(), executable_path.as_str()),
                    WindowRecEventKind::TitleChanged { title } => (0, title.as_str(), ""),
                    WindowRecEventKind::NoActiveWindow => (0, "", ""),
                };
                buf.put_u32_le(process_id);
                buf.put_var_str(title)?;
                buf.put_var_str(executable_path)?;
            }
        }
        Ok(())
    }

    fn decode_body(header: &NowHeader, cursor: &mut ReadCursor) -> Result<Self, DecodeError> {
        let flags = header.flags;
        match header.kind {
            KIND_LOCK => Ok(Self::Lock),
            KIND_LOGOFF => Ok(Self::Logoff),
            KIND_WINDOW_REC_STOP => Ok(Self::WindowRecStop),
            KIND_MSGBOX_REQ => {
                let request_id = cursor.read_u32("request id")?;
                let style = MsgBoxStyle(cursor.read_u32("message box style")?);
                let timeout = Duration::from_secs(cursor.read_u32("message box timeout")? as u64);
                let title = cursor.read_var_str("message box title")?;
                let message = cursor.read_var_str("message box text")?;

                Ok(Self::MsgBoxReq(MsgBoxRequest {
                    request_id,
                    message,
                    title: (flags & MSGBOX_TITLE != 0).then_some(title),
                    style: (flags & MSGBOX_STYLE != 0).then_some(style),
                    timeout: (flags & MSGBOX_TIMEOUT != 0).then_some(timeout),
                    wait_response: flags & MSGBOX_RESPONSE != 0,
                }))
            }
            KIND_MSGBOX_RSP => {
                let request_id = cursor.read_u32("request id")?;
                let response = cursor.read_u32("message box response")?;
                let response = match NowStatus::decode(cursor)? {
                    NowStatus::Success => Ok(MsgBoxResponse::from_wire(response)),
                    NowStatus::Error(err) => Err(err),
                };
                Ok(Self::MsgBoxRsp(MsgBoxReply {
                    request_id,
                    response,
                }))
            }
            KIND_SET_KBD_LAYOUT => {
                let name = cursor.read_var_str("keyboard layout")?;
                let layout = match (flags & KBD_LAYOUT_NEXT != 0, flags & KBD_LAYOUT_PREV != 0) {
                    (false, false) => KbdLayout::Specific(name),
                    (true, false) => KbdLayout::Next,
                    (false, true) => KbdLayout::Prev,
                    (true, true) => {
                        return Err(DecodeError::InvalidFlags {
                            name: "keyboard layout",
                            flags,
                        })
                    }
                };
                Ok(Self::SetKbdLayout(layout))
            }
            KIND_WINDOW_REC_START => Ok(Self::WindowRecStart(WindowRecStart {
                poll_interval: Duration::from_millis(cursor.read_u32("poll interval")? as u64),
                track_title_change: flags & WINDOW_REC_TRACK_TITLE != 0,
            })),
            KIND_WINDOW_REC_EVENT => {
                let timestamp = cursor.read_u64("window event timestamp")?;
                let process_id = cursor.read_u32("process id")?;
                let title = cursor.read_var_str("window title")?;
                let executable_path = cursor.read_var_str("executable path")?;

                let kind = match flags
                    & (WINDOW_EVENT_ACTIVE | WINDOW_EVENT_TITLE_CHANGED | WINDOW_EVENT_NO_ACTIVE)
                {
                    WINDOW_EVENT_ACTIVE => WindowRecEventKind::ActiveWindow {
                        process_id,
                        title,
                        executable_path,
                    },
                    WINDOW_EVENT_TITLE_CHANGED => WindowRecEventKind::TitleChanged { title },
                    WINDOW_EVENT_NO_ACTIVE => WindowRecEventKind::NoActiveWindow,
                    _ => {
                        return Err(DecodeError::InvalidFlags {
                            name: "window event",
                            flags,
                        })
                    }
                };
                Ok(Self::WindowRecEvent(WindowRecEvent { timestamp, kind }))
            }
            kind => Err(DecodeError::UnsupportedMessage {
                class: Self::CLASS.0,
                kind,
            }),
        }
    }
}
