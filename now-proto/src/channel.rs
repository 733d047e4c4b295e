//! Channel class: capability negotiation, heartbeat and close.

use crate::cursor::ReadCursor;
use crate::error::{DecodeError, EncodeError};
use crate::header::{MessageClass, NowHeader};
use crate::message::MessageBody;
use crate::status::NowStatus;
use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const KIND_CAPSET: u8 = 0x01;
const KIND_HEARTBEAT: u8 = 0x02;
const KIND_CLOSE: u8 = 0x03;

const CAPSET_SET_HEARTBEAT: u16 = 0x0001;

/// Accepted heartbeat interval range.
pub const HEARTBEAT_MIN: Duration = Duration::from_secs(5);
pub const HEARTBEAT_MAX: Duration = Duration::from_secs(24 * 60 * 60);

/// Protocol version advertised in the capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ProtoVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtoVersion {
    pub const CURRENT: Self = Self::new(crate::VERSION_MAJOR, crate::VERSION_MINOR);

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for ProtoVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

bitflags! {
    /// System capabilities.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SystemCaps: u16 {
        const SHUTDOWN = 0x0001;
    }
}

bitflags! {
    /// Session capabilities.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SessionCaps: u16 {
        const LOCK = 0x0001;
        const LOGOFF = 0x0002;
        const MSGBOX = 0x0004;
        const SET_KBD_LAYOUT = 0x0008;
        const WINDOW_RECORDING = 0x0010;
    }
}

bitflags! {
    /// Remote execution capabilities, one bit per exec style.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ExecCaps: u16 {
        const RUN = 0x0001;
        const PROCESS = 0x0002;
        const SHELL = 0x0004;
        const BATCH = 0x0008;
        const WINPS = 0x0010;
        const PWSH = 0x0020;
    }
}

/// Capability set exchanged once at the start of a connection.
///
/// The client advertises everything it supports. The server answers with
/// the intersection, which then becomes the negotiated set for the
/// lifetime of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capset {
    pub version: ProtoVersion,
    pub system: SystemCaps,
    pub session: SessionCaps,
    pub exec: ExecCaps,
    heartbeat: Option<Duration>,
}

impl Capset {
    /// Current version, no capabilities, no heartbeat.
    pub fn new() -> Self {
        Self {
            version: ProtoVersion::CURRENT,
            system: SystemCaps::empty(),
            session: SessionCaps::empty(),
            exec: ExecCaps::empty(),
            heartbeat: None,
        }
    }

    /// Every capability known to this implementation.
    pub fn all() -> Self {
        Self {
            system: SystemCaps::all(),
            session: SessionCaps::all(),
            exec: ExecCaps::all(),
            ..Self::new()
        }
    }

    pub fn with_version(mut self, version: ProtoVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_system(mut self, caps: SystemCaps) -> Self {
        self.system = caps;
        self
    }

    pub fn with_session(mut self, caps: SessionCaps) -> Self {
        self.session = caps;
        self
    }

    pub fn with_exec(mut self, caps: ExecCaps) -> Self {
        self.exec = caps;
        self
    }

    /// Sets the heartbeat interval. Must be within 5s..=24h.
    pub fn with_heartbeat(mut self, interval: Duration) -> Result<Self, EncodeError> {
        if !(HEARTBEAT_MIN..=HEARTBEAT_MAX).contains(&interval) {
            return Err(EncodeError::HeartbeatOutOfRange(interval));
        }
        self.heartbeat = Some(interval);
        Ok(self)
    }

    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat = None;
        self
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat
    }

    /// Computes the set both peers can use.
    ///
    /// The lower version wins, bitsets are intersected and the shorter of
    /// the two heartbeat intervals is kept.
    pub fn downgrade(&self, other: &Self) -> Self {
        let heartbeat = match (self.heartbeat, other.heartbeat) {
            (Some(lhs), Some(rhs)) => Some(lhs.min(rhs)),
            (lhs, rhs) => lhs.or(rhs),
        };

        Self {
            version: self.version.min(other.version),
            system: self.system & other.system,
            session: self.session & other.session,
            exec: self.exec & other.exec,
            heartbeat,
        }
    }
}

impl Default for Capset {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel class messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Capset(Capset),
    Heartbeat,
    /// Graceful channel termination, with the reason.
    Close(NowStatus),
}

impl MessageBody for ChannelMessage {
    const CLASS: MessageClass = MessageClass::CHANNEL;

    fn kind(&self) -> u8 {
        match self {
            Self::Capset(_) => KIND_CAPSET,
            Self::Heartbeat => KIND_HEARTBEAT,
            Self::Close(_) => KIND_CLOSE,
        }
    }

    fn flags(&self) -> u16 {
        match self {
            Self::Capset(capset) if capset.heartbeat.is_some() => CAPSET_SET_HEARTBEAT,
            _ => 0,
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            Self::Capset(capset) => {
                buf.put_u16_le(capset.version.major);
                buf.put_u16_le(capset.version.minor);
                buf.put_u16_le(capset.system.bits());
                buf.put_u16_le(capset.session.bits());
                buf.put_u16_le(capset.exec.bits());
                buf.put_u32_le(capset.heartbeat.map_or(0, |hb| hb.as_secs() as u32));
            }
            Self::Heartbeat => {}
            Self::Close(status) => status.encode(buf)?,
        }
        Ok(())
    }

    fn decode_body(header: &NowHeader, cursor: &mut ReadCursor) -> Result<Self, DecodeError> {
        match header.kind {
            KIND_CAPSET => {
                let version = ProtoVersion::new(
                    cursor.read_u16("capset major")?,
                    cursor.read_u16("capset minor")?,
                );
                let system = SystemCaps::from_bits_retain(cursor.read_u16("system caps")?);
                let session = SessionCaps::from_bits_retain(cursor.read_u16("session caps")?);
                let exec = ExecCaps::from_bits_retain(cursor.read_u16("exec caps")?);
                // always present on the wire, meaningful only with the flag
                let interval = Duration::from_secs(cursor.read_u32("heartbeat interval")? as u64);

                let heartbeat = if header.flags & CAPSET_SET_HEARTBEAT != 0 {
                    if !(HEARTBEAT_MIN..=HEARTBEAT_MAX).contains(&interval) {
                        return Err(DecodeError::InvalidField {
                            name: "heartbeat interval",
                            reason: "outside 5s..=24h",
                        });
                    }
                    Some(interval)
                } else {
                    None
                };

                Ok(Self::Capset(Capset {
                    version,
                    system,
                    session,
                    exec,
                    heartbeat,
                }))
            }
            KIND_HEARTBEAT => Ok(Self::Heartbeat),
            KIND_CLOSE => Ok(Self::Close(NowStatus::decode(cursor)?)),
            kind => Err(DecodeError::UnsupportedMessage {
                class: Self::CLASS.0,
                kind,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NowMessage;
    use crate::status::NowStatusError;

    #[test]
    fn test_capset_vector() {
        let capset = Capset::new()
            .with_version(ProtoVersion::new(1, 0))
            .with_exec(ExecCaps::RUN | ExecCaps::SHELL)
            .with_system(SystemCaps::SHUTDOWN)
            .with_session(SessionCaps::MSGBOX)
            .with_heartbeat(Duration::from_secs(300))
            .unwrap();

        let encoded = NowMessage::from(capset.clone()).encode().unwrap();
        assert_eq!(
            &encoded[..],
            &[
                0x0E, 0x00, 0x00, 0x00, 0x10, 0x01, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
                0x00, 0x04, 0x00, 0x05, 0x00, 0x2C, 0x01, 0x00, 0x00,
            ]
        );

        let decoded = NowMessage::decode_bytes(&encoded).unwrap();
        assert_eq!(decoded, NowMessage::from(capset));
    }

    #[test]
    fn test_heartbeat_range() {
        assert_eq!(
            Capset::new().with_heartbeat(Duration::from_secs(4)),
            Err(EncodeError::HeartbeatOutOfRange(Duration::from_secs(4)))
        );
        assert!(Capset::new()
            .with_heartbeat(Duration::from_secs(86_401))
            .is_err());
        assert!(Capset::new().with_heartbeat(HEARTBEAT_MIN).is_ok());
        assert!(Capset::new().with_heartbeat(HEARTBEAT_MAX).is_ok());
    }

    #[test]
    fn test_heartbeat_ignored_without_flag() {
        let wire = [
            0x0E, 0x00, 0x00, 0x00, 0x10, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x2C, 0x01, 0x00, 0x00,
        ];
        let NowMessage::Channel(ChannelMessage::Capset(capset)) =
            NowMessage::decode_bytes(&wire).unwrap()
        else {
            panic!("expected capset");
        };
        assert_eq!(capset.heartbeat(), None);
        assert_eq!(capset.version, ProtoVersion::new(1, 1));
    }

    #[test]
    fn test_heartbeat_zero_with_flag_rejected() {
        let wire = [
            0x0E, 0x00, 0x00, 0x00, 0x10, 0x01, 0x01, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert!(matches!(
            NowMessage::decode_bytes(&wire),
            Err(DecodeError::InvalidField {
                name: "heartbeat interval",
                ..
            })
        ));
    }

    #[test]
    fn test_downgrade() {
        let client = Capset::all()
            .with_heartbeat(Duration::from_secs(60))
            .unwrap();
        let server = Capset::new()
            .with_version(ProtoVersion::new(1, 0))
            .with_exec(ExecCaps::RUN | ExecCaps::PWSH)
            .with_session(SessionCaps::LOCK)
            .with_heartbeat(Duration::from_secs(30))
            .unwrap();

        let negotiated = client.downgrade(&server);
        assert_eq!(negotiated.version, ProtoVersion::new(1, 0));
        assert_eq!(negotiated.exec, ExecCaps::RUN | ExecCaps::PWSH);
        assert_eq!(negotiated.session, SessionCaps::LOCK);
        assert!(negotiated.system.is_empty());
        assert_eq!(negotiated.heartbeat(), Some(Duration::from_secs(30)));

        let negotiated = client.downgrade(&server.without_heartbeat());
        assert_eq!(negotiated.heartbeat(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_unknown_capability_bits_retained() {
        let wire = [
            0x0E, 0x00, 0x00, 0x00, 0x10, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01, 0x00,
            0x00, 0x00, 0x05, 0x80, 0x00, 0x00, 0x00, 0x00,
        ];
        let capset = match NowMessage::decode_bytes(&wire).unwrap() {
            NowMessage::Channel(ChannelMessage::Capset(capset)) => capset,
            other => panic!("unexpected {:?}", other),
        };

        assert_eq!(capset.exec.bits(), 0x8005);
        assert!(capset.exec.contains(ExecCaps::RUN | ExecCaps::SHELL));
        assert_eq!(capset.exec & ExecCaps::all(), ExecCaps::RUN | ExecCaps::SHELL);
        assert_eq!(
            NowMessage::from(capset).encode().unwrap()[..],
            wire[..]
        );
    }

    #[test]
    fn test_version_ordering() {
        assert!(ProtoVersion::new(1, 0) < ProtoVersion::new(1, 1));
        assert!(ProtoVersion::new(1, 9) < ProtoVersion::new(2, 0));
        assert_eq!(ProtoVersion::CURRENT.to_string(), "1.1");
    }

    #[test]
    fn test_close_vectors() {
        let encoded = NowMessage::from(ChannelMessage::Close(NowStatus::Error(
            NowStatusError::generic(0),
        )))
        .encode()
        .unwrap();
        assert_eq!(
            &encoded[..],
            &[
                0x0A, 0x00, 0x00, 0x00, 0x10, 0x03, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00,
            ]
        );

        let encoded = NowMessage::from(ChannelMessage::Heartbeat).encode().unwrap();
        assert_eq!(&encoded[..], &[0x00, 0x00, 0x00, 0x00, 0x10, 0x02, 0x00, 0x00]);
    }
}
