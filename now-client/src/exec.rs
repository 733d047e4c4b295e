//! Remote execution sessions.
//!
//! An [`ExecSession`] is created by [`NowClient::exec`](crate::NowClient::exec).
//! Its state lives in the worker's session table and is mirrored to the
//! handle through a `watch` channel:
//!
//! ```text
//! Created ──Result──────▶ Completed(result)
//!    │ ───CancelRsp(ok)─▶ Canceled
//!    └────abort()───────▶ Aborted(exit_code)
//! ```
//!
//! `Started` and output chunks are delivered as [`ExecEvent`]s and do not
//! change the state.

use crate::command::{Command, CommandSender};
use crate::error::ClientError;
use bytes::Bytes;
use now_proto::channel::ExecCaps;
use now_proto::{
    ExecBatch, ExecMessage, ExecPowerShell, ExecProcess, ExecShell, NowStatusError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot, watch};

/// Lifecycle of an execution session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecState {
    Created,
    /// The peer reported a result: exit code or failure status.
    Completed(Result<u32, NowStatusError>),
    Canceled,
    Aborted { exit_code: u32 },
}

impl ExecState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecState::Created)
    }
}

/// Output and progress reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Started,
    Stdout { data: Bytes, last: bool },
    Stderr { data: Bytes, last: bool },
}

/// How a cancel request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The peer confirmed the cancellation.
    Canceled,
    /// The session produced its result first.
    AlreadyCompleted,
}

/// An execution request that opens a session.
///
/// The session id is assigned by the client. Whatever id the wrapped
/// message carries is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecRequest {
    Process(ExecProcess),
    Shell(ExecShell),
    Batch(ExecBatch),
    WinPs(ExecPowerShell),
    Pwsh(ExecPowerShell),
}

impl ExecRequest {
    pub fn process(filename: impl Into<String>) -> Self {
        Self::Process(ExecProcess::new(0, filename))
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell(ExecShell::new(0, command))
    }

    pub fn batch(command: impl Into<String>) -> Self {
        Self::Batch(ExecBatch::new(0, command))
    }

    pub fn winps(command: impl Into<String>) -> Self {
        Self::WinPs(ExecPowerShell::new(0, command))
    }

    pub fn pwsh(command: impl Into<String>) -> Self {
        Self::Pwsh(ExecPowerShell::new(0, command))
    }

    /// Capability bit and its name for error reporting.
    pub(crate) fn capability(&self) -> (ExecCaps, &'static str) {
        match self {
            Self::Process(_) => (ExecCaps::PROCESS, "Process execution style"),
            Self::Shell(_) => (ExecCaps::SHELL, "Shell execution style"),
            Self::Batch(_) => (ExecCaps::BATCH, "Batch execution style"),
            Self::WinPs(_) => (ExecCaps::WINPS, "Windows PowerShell execution style"),
            Self::Pwsh(_) => (ExecCaps::PWSH, "PowerShell 7 execution style"),
        }
    }

    pub(crate) fn into_message(self, session_id: u32) -> ExecMessage {
        match self {
            Self::Process(msg) => ExecMessage::Process(ExecProcess { session_id, ..msg }),
            Self::Shell(msg) => ExecMessage::Shell(ExecShell { session_id, ..msg }),
            Self::Batch(msg) => ExecMessage::Batch(ExecBatch { session_id, ..msg }),
            Self::WinPs(msg) => ExecMessage::WinPs(ExecPowerShell { session_id, ..msg }),
            Self::Pwsh(msg) => ExecMessage::Pwsh(ExecPowerShell { session_id, ..msg }),
        }
    }
}

/// Worker-side table entry for one session.
pub(crate) struct ExecEntry {
    state: watch::Sender<ExecState>,
    events: mpsc::UnboundedSender<ExecEvent>,
    cancel_waiters: Vec<oneshot::Sender<Result<CancelOutcome, ClientError>>>,
}

impl ExecEntry {
    pub(crate) fn new() -> (
        Self,
        watch::Receiver<ExecState>,
        mpsc::UnboundedReceiver<ExecEvent>,
    ) {
        let (state, state_rx) = watch::channel(ExecState::Created);
        let (events, events_rx) = mpsc::unbounded_channel();
        let entry = Self {
            state,
            events,
            cancel_waiters: Vec::new(),
        };
        (entry, state_rx, events_rx)
    }

    pub(crate) fn publish(&self, event: ExecEvent) {
        // receiver may have been dropped by a caller that only wants the result
        let _ = self.events.send(event);
    }

    pub(crate) fn has_pending_cancel(&self) -> bool {
        !self.cancel_waiters.is_empty()
    }

    pub(crate) fn add_cancel_waiter(
        &mut self,
        waiter: oneshot::Sender<Result<CancelOutcome, ClientError>>,
    ) {
        self.cancel_waiters.push(waiter);
    }

    /// Reports a cancel failure; the session stays alive.
    pub(crate) fn cancel_failed(&mut self, status: NowStatusError) {
        for waiter in self.cancel_waiters.drain(..) {
            let _ = waiter.send(Err(ClientError::Status(status.clone())));
        }
    }

    /// Moves to a terminal state and resolves pending cancels.
    pub(crate) fn finish(self, state: ExecState, session_id: u32) {
        for waiter in self.cancel_waiters {
            let outcome = match &state {
                ExecState::Canceled => Ok(CancelOutcome::Canceled),
                ExecState::Aborted { exit_code } => Err(ClientError::ExecAborted {
                    session_id,
                    exit_code: *exit_code,
                }),
                _ => Ok(CancelOutcome::AlreadyCompleted),
            };
            let _ = waiter.send(outcome);
        }
        self.state.send_replace(state);
    }
}

/// Handle to a remote execution session.
#[derive(Debug)]
pub struct ExecSession {
    session_id: u32,
    commands: CommandSender,
    state: watch::Receiver<ExecState>,
    events: mpsc::UnboundedReceiver<ExecEvent>,
    stdin_closed: AtomicBool,
}

impl ExecSession {
    pub(crate) fn new(
        session_id: u32,
        commands: CommandSender,
        state: watch::Receiver<ExecState>,
        events: mpsc::UnboundedReceiver<ExecEvent>,
    ) -> Self {
        Self {
            session_id,
            commands,
            state,
            events,
            stdin_closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Current state snapshot.
    pub fn state(&self) -> ExecState {
        self.state.borrow().clone()
    }

    /// Next output event. Returns `None` once the session has ended and
    /// every event was consumed.
    pub async fn next_event(&mut self) -> Option<ExecEvent> {
        self.events.recv().await
    }

    /// Sends data to the process stdin.
    ///
    /// Data is split into chunks of at most 32 KiB. When `last` is set the
    /// final chunk closes stdin and later calls fail with
    /// [`ClientError::StdinClosed`].
    pub async fn send_stdin(&self, data: impl Into<Bytes>, last: bool) -> Result<(), ClientError> {
        self.ensure_running()?;
        if self.stdin_closed.load(Ordering::SeqCst) {
            return Err(ClientError::StdinClosed {
                session_id: self.session_id,
            });
        }
        if last && self.stdin_closed.swap(true, Ordering::SeqCst) {
            return Err(ClientError::StdinClosed {
                session_id: self.session_id,
            });
        }

        let data = data.into();
        self.commands
            .ack(|reply| Command::ExecStdin {
                session_id: self.session_id,
                data,
                last,
                reply,
            })
            .await
    }

    /// Requests cancellation and waits for the peer's answer.
    ///
    /// Canceling a session that already completed is not an error and
    /// returns [`CancelOutcome::AlreadyCompleted`].
    pub async fn cancel(&self) -> Result<CancelOutcome, ClientError> {
        match self.state() {
            ExecState::Created => {}
            ExecState::Completed(_) => return Ok(CancelOutcome::AlreadyCompleted),
            _ => return Err(self.terminated()),
        }

        let result = self
            .commands
            .request(|reply| Command::ExecCancel {
                session_id: self.session_id,
                reply,
            })
            .await?;

        match result {
            // completed while the request was queued
            Err(ClientError::SessionTerminated { .. })
                if matches!(self.state(), ExecState::Completed(_)) =>
            {
                Ok(CancelOutcome::AlreadyCompleted)
            }
            other => other,
        }
    }

    /// Aborts the session with the given exit code.
    ///
    /// The session is `Aborted` as soon as the request was written; no
    /// answer from the peer is awaited.
    pub async fn abort(&self, exit_code: u32) -> Result<(), ClientError> {
        self.ensure_running()?;
        self.commands
            .ack(|reply| Command::ExecAbort {
                session_id: self.session_id,
                exit_code,
                reply,
            })
            .await
    }

    /// Waits for the session to end and returns the exit code.
    pub async fn result(&self) -> Result<u32, ClientError> {
        let mut state = self.state.clone();
        let waited = state
            .wait_for(ExecState::is_terminal)
            .await
            .map(|terminal| terminal.clone());
        // a dropped sender may still have published a terminal state
        let terminal = match waited {
            Ok(terminal) => terminal,
            Err(_) => state.borrow().clone(),
        };

        match terminal {
            ExecState::Completed(Ok(code)) => Ok(code),
            ExecState::Completed(Err(status)) => Err(ClientError::Status(status)),
            ExecState::Canceled => Err(ClientError::ExecCanceled {
                session_id: self.session_id,
            }),
            ExecState::Aborted { exit_code } => Err(ClientError::ExecAborted {
                session_id: self.session_id,
                exit_code,
            }),
            ExecState::Created => Err(ClientError::WorkerTerminated),
        }
    }

    fn ensure_running(&self) -> Result<(), ClientError> {
        if self.state.borrow().is_terminal() {
            return Err(self.terminated());
        }
        Ok(())
    }

    fn terminated(&self) -> ClientError {
        ClientError::SessionTerminated {
            session_id: self.session_id,
        }
    }
}
