//! Commands sent from the client handles to the worker.

use crate::error::ClientError;
use crate::exec::{CancelOutcome, ExecEntry};
use crate::rdm::{RdmCapabilities, RdmSessionEntry};
use bytes::Bytes;
use now_proto::rdm::{RdmAppNotify, RdmSessionNotify, RdmSessionStart, SessionAction};
use now_proto::session::{MsgBoxRequest, MsgBoxResponse, WindowRecEvent, WindowRecStart};
use now_proto::{ExecMessage, NowMessage, NowStatusError};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Write acknowledgment, or a local rejection.
pub(crate) type Ack = oneshot::Sender<Result<(), ClientError>>;

pub(crate) type MsgBoxReplySender = oneshot::Sender<Result<MsgBoxResponse, NowStatusError>>;

pub(crate) enum Command {
    /// Writes a message that needs no correlation.
    Send { message: NowMessage, reply: Ack },
    MsgBox {
        request: MsgBoxRequest,
        response: Option<MsgBoxReplySender>,
        reply: Ack,
    },
    ExecStart {
        message: ExecMessage,
        entry: ExecEntry,
        reply: Ack,
    },
    ExecStdin {
        session_id: u32,
        data: Bytes,
        last: bool,
        reply: Ack,
    },
    ExecCancel {
        session_id: u32,
        reply: oneshot::Sender<Result<CancelOutcome, ClientError>>,
    },
    ExecAbort {
        session_id: u32,
        exit_code: u32,
        reply: Ack,
    },
    WindowRecStart {
        params: WindowRecStart,
        sink: mpsc::UnboundedSender<WindowRecEvent>,
        reply: Ack,
    },
    WindowRecStop { reply: Ack },
    RdmSync {
        force: bool,
        reply: oneshot::Sender<RdmCapabilities>,
    },
    RdmAppNotifications(mpsc::UnboundedSender<RdmAppNotify>),
    RdmSessionStart {
        start: RdmSessionStart,
        entry: RdmSessionEntry,
        reply: Ack,
    },
    RdmSessionAction {
        session_id: Uuid,
        action: SessionAction,
        reply: Ack,
    },
    RdmSessionNotifications(mpsc::UnboundedSender<RdmSessionNotify>),
    /// Writes a graceful `Close` and stops the worker.
    Close,
}

/// Producer side of the command queue, shared by the client and its
/// session handles.
#[derive(Debug, Clone)]
pub(crate) struct CommandSender {
    tx: mpsc::Sender<Command>,
}

impl CommandSender {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Enqueues a command, waiting for queue capacity.
    pub(crate) async fn send(&self, command: Command) -> Result<(), ClientError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ClientError::WorkerTerminated)
    }

    /// Enqueues a command carrying a reply channel and waits for the reply.
    pub(crate) async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| ClientError::WorkerTerminated)
    }

    /// Enqueues a command and waits for its write acknowledgment.
    pub(crate) async fn ack(&self, make: impl FnOnce(Ack) -> Command) -> Result<(), ClientError> {
        self.request(make).await?
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
