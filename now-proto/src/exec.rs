//! Exec class: remote command execution.
//!
//! Sessions are identified by a client-assigned `u32`. The client sends one
//! of the start messages (`Run`, `Process`, `Shell`, `Batch`, `WinPs`,
//! `Pwsh`), the server answers with `Started`, streams `Data` and finishes
//! with `Result`. `Abort`, `CancelReq` and stdin `Data` flow the other way.

use crate::cursor::{ReadCursor, WriteExt};
use crate::error::{DecodeError, EncodeError};
use crate::header::{MessageClass, NowHeader};
use crate::message::MessageBody;
use crate::status::{NowStatus, NowStatusError};
use bytes::{BufMut, Bytes, BytesMut};

const KIND_ABORT: u8 = 0x01;
const KIND_CANCEL_REQ: u8 = 0x02;
const KIND_CANCEL_RSP: u8 = 0x03;
const KIND_RESULT: u8 = 0x04;
const KIND_DATA: u8 = 0x05;
const KIND_STARTED: u8 = 0x06;
const KIND_RUN: u8 = 0x10;
const KIND_PROCESS: u8 = 0x11;
const KIND_SHELL: u8 = 0x12;
const KIND_BATCH: u8 = 0x13;
const KIND_WINPS: u8 = 0x14;
const KIND_PWSH: u8 = 0x15;

const DATA_LAST: u16 = 0x0001;
const DATA_STDIN: u16 = 0x0002;
const DATA_STDOUT: u16 = 0x0004;
const DATA_STDERR: u16 = 0x0008;

const RUN_DIRECTORY_SET: u16 = 0x0001;

const PROCESS_PARAMETERS_SET: u16 = 0x0001;
const PROCESS_DIRECTORY_SET: u16 = 0x0002;

const SHELL_SHELL_SET: u16 = 0x0001;
const SHELL_DIRECTORY_SET: u16 = 0x0002;

const BATCH_DIRECTORY_SET: u16 = 0x0001;

const PS_NO_LOGO: u16 = 0x0001;
const PS_NO_EXIT: u16 = 0x0002;
const PS_STA: u16 = 0x0004;
const PS_MTA: u16 = 0x0008;
const PS_NO_PROFILE: u16 = 0x0010;
const PS_NON_INTERACTIVE: u16 = 0x0020;
const PS_EXECUTION_POLICY: u16 = 0x0040;
const PS_CONFIGURATION_NAME: u16 = 0x0080;
const PS_DIRECTORY_SET: u16 = 0x0100;

/// Shared by every start message except `Run`.
const IO_REDIRECTION: u16 = 0x1000;

/// Largest stdin chunk sent in a single `Data` message.
pub const MAX_DATA_CHUNK: usize = 32 * 1024;

/// Direction of an exec data chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecStream {
    Stdin,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecData {
    pub session_id: u32,
    pub stream: ExecStream,
    /// Final chunk for this stream.
    pub last: bool,
    pub data: Bytes,
}

/// Result of a finished session: exit code, or the error that ended it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub session_id: u32,
    pub result: Result<u32, NowStatusError>,
}

/// Shell-execute style command (`ShellExecute` on Windows).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRun {
    pub session_id: u32,
    pub command: String,
    pub directory: Option<String>,
}

impl ExecRun {
    pub fn new(session_id: u32, command: impl Into<String>) -> Self {
        Self {
            session_id,
            command: command.into(),
            directory: None,
        }
    }

    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

/// Starts an executable directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecProcess {
    pub session_id: u32,
    pub filename: String,
    pub parameters: Option<String>,
    pub directory: Option<String>,
    pub io_redirection: bool,
}

impl ExecProcess {
    pub fn new(session_id: u32, filename: impl Into<String>) -> Self {
        Self {
            session_id,
            filename: filename.into(),
            parameters: None,
            directory: None,
            io_redirection: false,
        }
    }

    pub fn with_parameters(mut self, parameters: impl Into<String>) -> Self {
        self.parameters = Some(parameters.into());
        self
    }

    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_io_redirection(mut self) -> Self {
        self.io_redirection = true;
        self
    }
}

/// Runs a command through a shell, the system default unless `shell` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecShell {
    pub session_id: u32,
    pub command: String,
    pub shell: Option<String>,
    pub directory: Option<String>,
    pub io_redirection: bool,
}

impl ExecShell {
    pub fn new(session_id: u32, command: impl Into<String>) -> Self {
        Self {
            session_id,
            command: command.into(),
            shell: None,
            directory: None,
            io_redirection: false,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_io_redirection(mut self) -> Self {
        self.io_redirection = true;
        self
    }
}

/// Runs a batch script with `cmd.exe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecBatch {
    pub session_id: u32,
    pub command: String,
    pub directory: Option<String>,
    pub io_redirection: bool,
}

impl ExecBatch {
    pub fn new(session_id: u32, command: impl Into<String>) -> Self {
        Self {
            session_id,
            command: command.into(),
            directory: None,
            io_redirection: false,
        }
    }

    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_io_redirection(mut self) -> Self {
        self.io_redirection = true;
        self
    }
}

/// COM apartment model for the PowerShell host thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApartmentState {
    Sta,
    Mta,
}

/// PowerShell command, used for both Windows PowerShell and `pwsh`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecPowerShell {
    pub session_id: u32,
    pub command: String,
    pub directory: Option<String>,
    pub execution_policy: Option<String>,
    pub configuration_name: Option<String>,
    pub apartment_state: Option<ApartmentState>,
    pub no_logo: bool,
    pub no_exit: bool,
    pub no_profile: bool,
    pub non_interactive: bool,
    pub io_redirection: bool,
}

impl ExecPowerShell {
    pub fn new(session_id: u32, command: impl Into<String>) -> Self {
        Self {
            session_id,
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_execution_policy(mut self, policy: impl Into<String>) -> Self {
        self.execution_policy = Some(policy.into());
        self
    }

    pub fn with_configuration_name(mut self, name: impl Into<String>) -> Self {
        self.configuration_name = Some(name.into());
        self
    }

    pub fn with_apartment_state(mut self, state: ApartmentState) -> Self {
        self.apartment_state = Some(state);
        self
    }

    pub fn with_no_logo(mut self) -> Self {
        self.no_logo = true;
        self
    }

    pub fn with_no_exit(mut self) -> Self {
        self.no_exit = true;
        self
    }

    pub fn with_no_profile(mut self) -> Self {
        self.no_profile = true;
        self
    }

    pub fn with_non_interactive(mut self) -> Self {
        self.non_interactive = true;
        self
    }

    pub fn with_io_redirection(mut self) -> Self {
        self.io_redirection = true;
        self
    }

    fn flags(&self) -> u16 {
        let mut flags = 0;
        for (set, bit) in [
            (self.no_logo, PS_NO_LOGO),
            (self.no_exit, PS_NO_EXIT),
            (self.apartment_state == Some(ApartmentState::Sta), PS_STA),
            (self.apartment_state == Some(ApartmentState::Mta), PS_MTA),
            (self.no_profile, PS_NO_PROFILE),
            (self.non_interactive, PS_NON_INTERACTIVE),
            (self.execution_policy.is_some(), PS_EXECUTION_POLICY),
            (self.configuration_name.is_some(), PS_CONFIGURATION_NAME),
            (self.directory.is_some(), PS_DIRECTORY_SET),
            (self.io_redirection, IO_REDIRECTION),
        ] {
            if set {
                flags |= bit;
            }
        }
        flags
    }

    /// Writes the fields following the session id.
    fn encode_fields(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_var_str(&self.command)?;
        put_optional_str(buf, &self.directory)?;
        put_optional_str(buf, &self.execution_policy)?;
        put_optional_str(buf, &self.configuration_name)
    }

    fn decode_fields(
        session_id: u32,
        flags: u16,
        cursor: &mut ReadCursor,
    ) -> Result<Self, DecodeError> {
        let apartment_state = match (flags & PS_STA != 0, flags & PS_MTA != 0) {
            (false, false) => None,
            (true, false) => Some(ApartmentState::Sta),
            (false, true) => Some(ApartmentState::Mta),
            (true, true) => {
                return Err(DecodeError::InvalidFlags {
                    name: "apartment state",
                    flags,
                })
            }
        };

        Ok(Self {
            session_id,
            command: cursor.read_var_str("command")?,
            directory: read_optional_str(cursor, "directory", flags & PS_DIRECTORY_SET)?,
            execution_policy: read_optional_str(
                cursor,
                "execution policy",
                flags & PS_EXECUTION_POLICY,
            )?,
            configuration_name: read_optional_str(
                cursor,
                "configuration name",
                flags & PS_CONFIGURATION_NAME,
            )?,
            apartment_state,
            no_logo: flags & PS_NO_LOGO != 0,
            no_exit: flags & PS_NO_EXIT != 0,
            no_profile: flags & PS_NO_PROFILE != 0,
            non_interactive: flags & PS_NON_INTERACTIVE != 0,
            io_redirection: flags & IO_REDIRECTION != 0,
        })
    }
}

fn put_optional_str(buf: &mut BytesMut, value: &Option<String>) -> Result<(), EncodeError> {
    buf.put_var_str(value.as_deref().unwrap_or_default())
}

/// Reads a string that is always on the wire but only meaningful when the
/// corresponding flag bit is set.
fn read_optional_str(
    cursor: &mut ReadCursor,
    name: &'static str,
    flag: u16,
) -> Result<Option<String>, DecodeError> {
    let value = cursor.read_var_str(name)?;
    Ok((flag != 0).then_some(value))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecMessage {
    Abort { session_id: u32, exit_code: u32 },
    CancelReq { session_id: u32 },
    CancelRsp {
        session_id: u32,
        result: Result<(), NowStatusError>,
    },
    Result(ExecResult),
    Data(ExecData),
    Started { session_id: u32 },
    Run(ExecRun),
    Process(ExecProcess),
    Shell(ExecShell),
    Batch(ExecBatch),
    WinPs(ExecPowerShell),
    Pwsh(ExecPowerShell),
}

impl ExecMessage {
    pub fn session_id(&self) -> u32 {
        match self {
            Self::Abort { session_id, .. }
            | Self::CancelReq { session_id }
            | Self::CancelRsp { session_id, .. }
            | Self::Started { session_id } => *session_id,
            Self::Result(msg) => msg.session_id,
            Self::Data(msg) => msg.session_id,
            Self::Run(msg) => msg.session_id,
            Self::Process(msg) => msg.session_id,
            Self::Shell(msg) => msg.session_id,
            Self::Batch(msg) => msg.session_id,
            Self::WinPs(msg) | Self::Pwsh(msg) => msg.session_id,
        }
    }
}

impl MessageBody for ExecMessage {
    const CLASS: MessageClass = MessageClass::EXEC;

    fn kind(&self) -> u8 {
        match self {
            Self::Abort { .. } => KIND_ABORT,
            Self::CancelReq { .. } => KIND_CANCEL_REQ,
            Self::CancelRsp { .. } => KIND_CANCEL_RSP,
            Self::Result(_) => KIND_RESULT,
            Self::Data(_) => KIND_DATA,
            Self::Started { .. } => KIND_STARTED,
            Self::Run(_) => KIND_RUN,
            Self::Process(_) => KIND_PROCESS,
            Self::Shell(_) => KIND_SHELL,
            Self::Batch(_) => KIND_BATCH,
            Self::WinPs(_) => KIND_WINPS,
            Self::Pwsh(_) => KIND_PWSH,
        }
    }

    fn flags(&self) -> u16 {
        let mut flags = 0;
        match self {
            Self::Data(msg) => {
                flags |= match msg.stream {
                    ExecStream::Stdin => DATA_STDIN,
                    ExecStream::Stdout => DATA_STDOUT,
                    ExecStream::Stderr => DATA_STDERR,
                };
                if msg.last {
                    flags |= DATA_LAST;
                }
            }
            Self::Run(msg) => {
                if msg.directory.is_some() {
                    flags |= RUN_DIRECTORY_SET;
                }
            }
            Self::Process(msg) => {
                if msg.parameters.is_some() {
                    flags |= PROCESS_PARAMETERS_SET;
                }
                if msg.directory.is_some() {
                    flags |= PROCESS_DIRECTORY_SET;
                }
                if msg.io_redirection {
                    flags |= IO_REDIRECTION;
                }
            }
            Self::Shell(msg) => {
                if msg.shell.is_some() {
                    flags |= SHELL_SHELL_SET;
                }
                if msg.directory.is_some() {
                    flags |= SHELL_DIRECTORY_SET;
                }
                if msg.io_redirection {
                    flags |= IO_REDIRECTION;
                }
            }
            Self::Batch(msg) => {
                if msg.directory.is_some() {
                    flags |= BATCH_DIRECTORY_SET;
                }
                if msg.io_redirection {
                    flags |= IO_REDIRECTION;
                }
            }
            Self::WinPs(msg) | Self::Pwsh(msg) => flags = msg.flags(),
            _ => {}
        }
        flags
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u32_le(self.session_id());
        match self {
            Self::Abort { exit_code, .. } => buf.put_u32_le(*exit_code),
            Self::CancelReq { .. } | Self::Started { .. } => {}
            Self::CancelRsp { result, .. } => NowStatus::from(result.clone()).encode(buf)?,
            Self::Result(msg) => {
                let (exit_code, status) = match &msg.result {
                    Ok(code) => (*code, NowStatus::Success),
                    Err(err) => (0, NowStatus::Error(err.clone())),
                };
                buf.put_u32_le(exit_code);
                status.encode(buf)?;
            }
            Self::Data(msg) => buf.put_var_buf(&msg.data)?,
            Self::Run(msg) => {
                buf.put_var_str(&msg.command)?;
                put_optional_str(buf, &msg.directory)?;
            }
            Self::Process(msg) => {
                buf.put_var_str(&msg.filename)?;
                put_optional_str(buf, &msg.parameters)?;
                put_optional_str(buf, &msg.directory)?;
            }
            Self::Shell(msg) => {
                buf.put_var_str(&msg.command)?;
                put_optional_str(buf, &msg.shell)?;
                put_optional_str(buf, &msg.directory)?;
            }
            Self::Batch(msg) => {
                buf.put_var_str(&msg.command)?;
                put_optional_str(buf, &msg.directory)?;
            }
            Self::WinPs(msg) | Self::Pwsh(msg) => msg.encode_fields(buf)?,
        }
        Ok(())
    }

    fn decode_body(header: &NowHeader, cursor: &mut ReadCursor) -> Result<Self, DecodeError> {
        // every known kind leads with the session id
        if !matches!(header.kind, KIND_ABORT..=KIND_STARTED | KIND_RUN..=KIND_PWSH) {
            return Err(DecodeError::UnsupportedMessage {
                class: Self::CLASS.0,
                kind: header.kind,
            });
        }

        let flags = header.flags;
        let session_id = cursor.read_u32("session id")?;
        let msg = match header.kind {
            KIND_ABORT => Self::Abort {
                session_id,
                exit_code: cursor.read_u32("exit code")?,
            },
            KIND_CANCEL_REQ => Self::CancelReq { session_id },
            KIND_CANCEL_RSP => Self::CancelRsp {
                session_id,
                result: NowStatus::decode(cursor)?.into_result(),
            },
            KIND_RESULT => {
                let exit_code = cursor.read_u32("exit code")?;
                let result = NowStatus::decode(cursor)?
                    .into_result()
                    .map(|()| exit_code);
                Self::Result(ExecResult { session_id, result })
            }
            KIND_DATA => {
                let stream = match flags & (DATA_STDIN | DATA_STDOUT | DATA_STDERR) {
                    DATA_STDIN => ExecStream::Stdin,
                    DATA_STDOUT => ExecStream::Stdout,
                    DATA_STDERR => ExecStream::Stderr,
                    _ => {
                        return Err(DecodeError::InvalidFlags {
                            name: "exec data stream",
                            flags,
                        })
                    }
                };
                Self::Data(ExecData {
                    session_id,
                    stream,
                    last: flags & DATA_LAST != 0,
                    data: cursor.read_var_buf("exec data")?,
                })
            }
            KIND_STARTED => Self::Started { session_id },
            KIND_RUN => Self::Run(ExecRun {
                session_id,
                command: cursor.read_var_str("command")?,
                directory: read_optional_str(cursor, "directory", flags & RUN_DIRECTORY_SET)?,
            }),
            KIND_PROCESS => Self::Process(ExecProcess {
                session_id,
                filename: cursor.read_var_str("filename")?,
                parameters: read_optional_str(
                    cursor,
                    "parameters",
                    flags & PROCESS_PARAMETERS_SET,
                )?,
                directory: read_optional_str(cursor, "directory", flags & PROCESS_DIRECTORY_SET)?,
                io_redirection: flags & IO_REDIRECTION != 0,
            }),
            KIND_SHELL => Self::Shell(ExecShell {
                session_id,
                command: cursor.read_var_str("command")?,
                shell: read_optional_str(cursor, "shell", flags & SHELL_SHELL_SET)?,
                directory: read_optional_str(cursor, "directory", flags & SHELL_DIRECTORY_SET)?,
                io_redirection: flags & IO_REDIRECTION != 0,
            }),
            KIND_BATCH => Self::Batch(ExecBatch {
                session_id,
                command: cursor.read_var_str("command")?,
                directory: read_optional_str(cursor, "directory", flags & BATCH_DIRECTORY_SET)?,
                io_redirection: flags & IO_REDIRECTION != 0,
            }),
            KIND_WINPS => Self::WinPs(ExecPowerShell::decode_fields(session_id, flags, cursor)?),
            KIND_PWSH => Self::Pwsh(ExecPowerShell::decode_fields(session_id, flags, cursor)?),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NowMessage;

    fn encode(msg: ExecMessage) -> Vec<u8> {
        NowMessage::Exec(msg).encode().unwrap().to_vec()
    }

    fn decode(wire: &[u8]) -> ExecMessage {
        match NowMessage::decode_bytes(wire).unwrap() {
            NowMessage::Exec(msg) => msg,
            other => panic!("expected exec message, got {:?}", other),
        }
    }

    #[test]
    fn test_abort_vector() {
        assert_eq!(
            encode(ExecMessage::Abort {
                session_id: 0x1234_5678,
                exit_code: 1,
            }),
            [0x08, 0x00, 0x00, 0x00, 0x13, 0x01, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_cancel_response_vector() {
        let wire = encode(ExecMessage::CancelRsp {
            session_id: 0x1234_5678,
            result: Ok(()),
        });
        assert_eq!(
            wire,
            [
                0x0E, 0x00, 0x00, 0x00, 0x13, 0x03, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ]
        );
        assert!(matches!(
            decode(&wire),
            ExecMessage::CancelRsp { result: Ok(()), .. }
        ));
    }

    #[test]
    fn test_result_error_vector() {
        let msg = ExecMessage::Result(ExecResult {
            session_id: 0x1234_5678,
            result: Err(NowStatusError::generic(0xDEAD_BEEF).with_message("ABC")),
        });
        let wire = encode(msg.clone());
        assert_eq!(
            wire,
            [
                0x15, 0x00, 0x00, 0x00, 0x13, 0x04, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12, 0x00,
                0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0xEF, 0xBE, 0xAD, 0xDE, 0x03, 0x41,
                0x42, 0x43, 0x00,
            ]
        );
        assert_eq!(decode(&wire), msg);
    }

    #[test]
    fn test_data_vectors() {
        let stdout = ExecMessage::Data(ExecData {
            session_id: 0x1234_5678,
            stream: ExecStream::Stdout,
            last: true,
            data: Bytes::from_static(&[1, 2, 3]),
        });
        let wire = encode(stdout.clone());
        assert_eq!(
            wire,
            [0x08, 0x00, 0x00, 0x00, 0x13, 0x05, 0x05, 0x00, 0x78, 0x56, 0x34, 0x12, 0x03, 0x01, 0x02, 0x03]
        );
        assert_eq!(decode(&wire), stdout);

        assert_eq!(
            encode(ExecMessage::Data(ExecData {
                session_id: 0x1234_5678,
                stream: ExecStream::Stdin,
                last: false,
                data: Bytes::new(),
            })),
            [0x05, 0x00, 0x00, 0x00, 0x13, 0x05, 0x02, 0x00, 0x78, 0x56, 0x34, 0x12, 0x00]
        );
    }

    #[test]
    fn test_data_requires_single_stream() {
        let mut wire = encode(ExecMessage::Data(ExecData {
            session_id: 1,
            stream: ExecStream::Stdout,
            last: false,
            data: Bytes::new(),
        }));
        wire[6] = 0x0C;
        assert_eq!(
            NowMessage::decode_bytes(&wire),
            Err(DecodeError::InvalidFlags {
                name: "exec data stream",
                flags: 0x000C,
            })
        );
    }

    #[test]
    fn test_run_vector() {
        let run = ExecRun::new(0x0123_4567, "hello").with_directory("hi");
        let wire = encode(ExecMessage::Run(run.clone()));
        assert_eq!(
            wire,
            [
                0x0F, 0x00, 0x00, 0x00, 0x13, 0x10, 0x01, 0x00, 0x67, 0x45, 0x23, 0x01, 0x05,
                0x68, 0x65, 0x6C, 0x6C, 0x6F, 0x00, 0x02, 0x68, 0x69, 0x00,
            ]
        );
        assert_eq!(decode(&wire), ExecMessage::Run(run));
    }

    #[test]
    fn test_process_vectors() {
        let full = ExecProcess::new(0x1234_5678, "a")
            .with_parameters("b")
            .with_directory("c");
        let wire = encode(ExecMessage::Process(full.clone()));
        assert_eq!(
            wire,
            [
                0x0D, 0x00, 0x00, 0x00, 0x13, 0x11, 0x03, 0x00, 0x78, 0x56, 0x34, 0x12, 0x01,
                0x61, 0x00, 0x01, 0x62, 0x00, 0x01, 0x63, 0x00,
            ]
        );
        assert_eq!(decode(&wire), ExecMessage::Process(full));

        let simple = encode(ExecMessage::Process(ExecProcess::new(0x1234_5678, "a")));
        assert_eq!(
            simple,
            [
                0x0B, 0x00, 0x00, 0x00, 0x13, 0x11, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12, 0x01,
                0x61, 0x00, 0x00, 0x00, 0x00, 0x00,
            ]
        );
        // absent optional fields stay absent even though the wire carries ""
        assert_eq!(
            decode(&simple),
            ExecMessage::Process(ExecProcess::new(0x1234_5678, "a"))
        );
    }

    #[test]
    fn test_shell_and_batch() {
        let shell = ExecShell::new(7, "dir")
            .with_shell("cmd.exe")
            .with_io_redirection();
        let wire = encode(ExecMessage::Shell(shell.clone()));
        assert_eq!(u16::from_le_bytes([wire[6], wire[7]]), 0x1001);
        assert_eq!(decode(&wire), ExecMessage::Shell(shell));

        let batch = ExecBatch::new(0x1234_5678, "a").with_directory("b");
        let wire = encode(ExecMessage::Batch(batch.clone()));
        assert_eq!(
            wire,
            [
                0x0A, 0x00, 0x00, 0x00, 0x13, 0x13, 0x01, 0x00, 0x78, 0x56, 0x34, 0x12, 0x01,
                0x61, 0x00, 0x01, 0x62, 0x00,
            ]
        );
        assert_eq!(decode(&wire), ExecMessage::Batch(batch));
    }

    #[test]
    fn test_winps_vectors() {
        let ps = ExecPowerShell::new(0x1234_5678, "a")
            .with_apartment_state(ApartmentState::Mta)
            .with_no_logo()
            .with_no_profile()
            .with_directory("d")
            .with_execution_policy("b")
            .with_configuration_name("c");
        let wire = encode(ExecMessage::WinPs(ps.clone()));
        assert_eq!(
            wire,
            [
                0x10, 0x00, 0x00, 0x00, 0x13, 0x14, 0xD9, 0x01, 0x78, 0x56, 0x34, 0x12, 0x01,
                0x61, 0x00, 0x01, 0x64, 0x00, 0x01, 0x62, 0x00, 0x01, 0x63, 0x00,
            ]
        );
        assert_eq!(decode(&wire), ExecMessage::WinPs(ps.clone()));

        let simple = encode(ExecMessage::WinPs(ExecPowerShell::new(0x1234_5678, "a")));
        assert_eq!(
            simple,
            [
                0x0D, 0x00, 0x00, 0x00, 0x13, 0x14, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12, 0x01,
                0x61, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ]
        );

        let pwsh = encode(ExecMessage::Pwsh(ps.clone()));
        assert_eq!(pwsh[5], 0x15);
        assert_eq!(decode(&pwsh), ExecMessage::Pwsh(ps));
    }

    #[test]
    fn test_apartment_state_conflict() {
        let mut wire = encode(ExecMessage::Pwsh(ExecPowerShell::new(1, "a")));
        wire[6] = (PS_STA | PS_MTA) as u8;
        assert_eq!(
            NowMessage::decode_bytes(&wire),
            Err(DecodeError::InvalidFlags {
                name: "apartment state",
                flags: 0x000C,
            })
        );
    }

    #[test]
    fn test_unknown_kind_before_fields() {
        let wire = [0x00, 0x00, 0x00, 0x00, 0x13, 0x07, 0x00, 0x00];
        assert_eq!(
            NowMessage::decode_bytes(&wire),
            Err(DecodeError::UnsupportedMessage {
                class: 0x13,
                kind: 0x07,
            })
        );
    }

    #[test]
    fn test_session_id_accessor() {
        assert_eq!(ExecMessage::Started { session_id: 9 }.session_id(), 9);
        assert_eq!(
            ExecMessage::Pwsh(ExecPowerShell::new(11, "x")).session_id(),
            11
        );
    }
}
