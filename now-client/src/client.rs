//! High-level client API.

use crate::channel::{NowChannel, Transport};
use crate::command::{Ack, Command, CommandSender};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::exec::{ExecEntry, ExecRequest, ExecSession};
use crate::msgbox::PendingMsgBox;
use crate::negotiate::negotiate;
use crate::rdm::{RdmCapabilities, RdmSession, RdmSessionEntry};
use crate::worker::Worker;
use now_proto::channel::{SessionCaps, SystemCaps};
use now_proto::rdm::{AppAction, RdmAppNotify, RdmAppStart, RdmSessionNotify, RdmSessionStart};
use now_proto::session::{KbdLayout, MsgBoxRequest, WindowRecEvent, WindowRecStart};
use now_proto::{
    Capset, ExecCaps, ExecMessage, ExecRun, NowMessage, RdmMessage, SessionMessage, Shutdown,
    RDM_MIN_VERSION,
};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// NOW-proto client.
///
/// Created by [`NowClient::connect`], which negotiates capabilities and
/// spawns the connection worker. Every operation checks the negotiated
/// capabilities first, so an unsupported request never reaches the wire.
pub struct NowClient {
    commands: CommandSender,
    capabilities: Capset,
    config: ClientConfig,
    worker: JoinHandle<Result<(), ClientError>>,
    next_exec_id: AtomicU32,
    next_msgbox_id: AtomicU32,
}

impl NowClient {
    /// Negotiates capabilities over `transport` and starts the worker.
    pub async fn connect<T: Transport>(
        transport: T,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let capset = config.advertised_capset()?;
        let mut channel = NowChannel::with_config(transport, &config);

        tracing::debug!("Starting capability negotiation...");
        let capabilities = negotiate(&mut channel, capset, config.connect_timeout).await?;
        tracing::info!(
            "Connected (protocol {}, heartbeat {:?})",
            capabilities.version,
            capabilities.heartbeat()
        );

        let (tx, rx) = mpsc::channel(config.command_queue_capacity);
        let worker = Worker::new(channel, rx, capabilities.heartbeat());

        Ok(Self {
            commands: CommandSender::new(tx),
            capabilities,
            config,
            worker: tokio::spawn(worker.run()),
            next_exec_id: AtomicU32::new(1),
            next_msgbox_id: AtomicU32::new(1),
        })
    }

    /// Capabilities negotiated with the peer.
    pub fn capabilities(&self) -> &Capset {
        &self.capabilities
    }

    /// Returns whether the worker has stopped.
    pub fn is_terminated(&self) -> bool {
        self.worker.is_finished() || self.commands.is_closed()
    }

    /// Sends a graceful `Close` and waits for the worker to stop.
    pub async fn close(self) -> Result<(), ClientError> {
        if !self.is_terminated() {
            // a worker that stops meanwhile reports its own reason below
            let _ = self.commands.send(Command::Close).await;
        }
        self.wait().await
    }

    /// Waits for the worker to stop and returns the reason.
    pub async fn wait(self) -> Result<(), ClientError> {
        self.worker.await.map_err(|e| {
            tracing::error!("Worker task failed: {}", e);
            ClientError::WorkerTerminated
        })?
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    async fn enqueue(&self, command: Command) -> Result<(), ClientError> {
        if self.is_terminated() {
            return Err(ClientError::WorkerTerminated);
        }
        self.commands.send(command).await
    }

    /// Enqueues a command and waits for the worker's acknowledgment.
    async fn ack(&self, make: impl FnOnce(Ack) -> Command) -> Result<(), ClientError> {
        if self.is_terminated() {
            return Err(ClientError::WorkerTerminated);
        }
        self.commands.ack(make).await
    }

    async fn send(&self, message: impl Into<NowMessage>) -> Result<(), ClientError> {
        let message = message.into();
        self.ack(|reply| Command::Send { message, reply }).await
    }

    fn require_session(&self, caps: SessionCaps, name: &str) -> Result<(), ClientError> {
        if !self.capabilities.session.contains(caps) {
            return Err(ClientError::Capability(name.to_string()));
        }
        Ok(())
    }

    fn require_exec(&self, caps: ExecCaps, name: &str) -> Result<(), ClientError> {
        if !self.capabilities.exec.contains(caps) {
            return Err(ClientError::Capability(name.to_string()));
        }
        Ok(())
    }

    // =========================================================================
    // System operations
    // =========================================================================

    /// Shuts down or reboots the remote machine.
    pub async fn system_shutdown(&self, shutdown: Shutdown) -> Result<(), ClientError> {
        if !self.capabilities.system.contains(SystemCaps::SHUTDOWN) {
            return Err(ClientError::Capability("System shutdown".to_string()));
        }
        self.send(shutdown).await
    }

    // =========================================================================
    // Session operations
    // =========================================================================

    pub async fn session_lock(&self) -> Result<(), ClientError> {
        self.require_session(SessionCaps::LOCK, "Session lock")?;
        self.send(SessionMessage::Lock).await
    }

    pub async fn session_logoff(&self) -> Result<(), ClientError> {
        self.require_session(SessionCaps::LOGOFF, "Session logoff")?;
        self.send(SessionMessage::Logoff).await
    }

    /// Shows a message box without waiting for the user.
    pub async fn session_msgbox(&self, request: MsgBoxRequest) -> Result<(), ClientError> {
        self.require_session(SessionCaps::MSGBOX, "Message box")?;
        let request = MsgBoxRequest {
            request_id: self.next_msgbox_id.fetch_add(1, Ordering::SeqCst),
            wait_response: false,
            ..request
        };

        self.ack(|reply| Command::MsgBox {
            request,
            response: None,
            reply,
        })
        .await
    }

    /// Shows a message box and returns a handle to await the user's answer.
    pub async fn session_msgbox_with_response(
        &self,
        request: MsgBoxRequest,
    ) -> Result<PendingMsgBox, ClientError> {
        self.require_session(SessionCaps::MSGBOX, "Message box")?;
        let request_id = self.next_msgbox_id.fetch_add(1, Ordering::SeqCst);
        let request = MsgBoxRequest {
            request_id,
            wait_response: true,
            ..request
        };

        let (response, response_rx) = oneshot::channel();
        self.ack(|reply| Command::MsgBox {
            request,
            response: Some(response),
            reply,
        })
        .await?;

        Ok(PendingMsgBox::new(request_id, response_rx))
    }

    pub async fn session_set_kbd_layout(&self, layout: KbdLayout) -> Result<(), ClientError> {
        self.require_session(SessionCaps::SET_KBD_LAYOUT, "Keyboard layout")?;
        self.send(SessionMessage::SetKbdLayout(layout)).await
    }

    /// Starts window recording. Events are delivered on the returned
    /// receiver until recording is stopped or the channel closes.
    pub async fn session_window_rec_start(
        &self,
        params: WindowRecStart,
    ) -> Result<mpsc::UnboundedReceiver<WindowRecEvent>, ClientError> {
        self.require_session(SessionCaps::WINDOW_RECORDING, "Window recording")?;
        let (sink, events) = mpsc::unbounded_channel();
        self.ack(|reply| Command::WindowRecStart {
            params,
            sink,
            reply,
        })
        .await?;
        Ok(events)
    }

    pub async fn session_window_rec_stop(&self) -> Result<(), ClientError> {
        self.require_session(SessionCaps::WINDOW_RECORDING, "Window recording")?;
        self.ack(|reply| Command::WindowRecStop { reply }).await
    }

    // =========================================================================
    // Exec operations
    // =========================================================================

    /// Runs a command without tracking it. Returns the allocated session id.
    pub async fn exec_run(&self, request: ExecRun) -> Result<u32, ClientError> {
        self.require_exec(ExecCaps::RUN, "Run execution style")?;
        let session_id = self.next_exec_id.fetch_add(1, Ordering::SeqCst);
        self.send(ExecMessage::Run(ExecRun {
            session_id,
            ..request
        }))
        .await?;
        Ok(session_id)
    }

    /// Starts a tracked execution session.
    pub async fn exec(&self, request: ExecRequest) -> Result<ExecSession, ClientError> {
        let (caps, name) = request.capability();
        self.require_exec(caps, name)?;

        let session_id = self.next_exec_id.fetch_add(1, Ordering::SeqCst);
        let (entry, state, events) = ExecEntry::new();
        self.ack(|reply| Command::ExecStart {
            message: request.into_message(session_id),
            entry,
            reply,
        })
        .await?;

        Ok(ExecSession::new(
            session_id,
            self.commands.clone(),
            state,
            events,
        ))
    }

    // =========================================================================
    // RDM operations
    // =========================================================================

    /// Returns the peer's RDM capabilities, exchanging them on first use.
    pub async fn rdm_capabilities(&self) -> Result<RdmCapabilities, ClientError> {
        self.rdm_sync(false).await
    }

    /// Drops the cached RDM capabilities and exchanges them again.
    pub async fn rdm_resync(&self) -> Result<RdmCapabilities, ClientError> {
        self.rdm_sync(true).await
    }

    async fn rdm_sync(&self, force: bool) -> Result<RdmCapabilities, ClientError> {
        if self.capabilities.version < RDM_MIN_VERSION {
            return Err(ClientError::Capability(format!(
                "RDM (requires protocol {}, negotiated {})",
                RDM_MIN_VERSION, self.capabilities.version
            )));
        }

        let (reply, rx) = oneshot::channel();
        self.enqueue(Command::RdmSync { force, reply }).await?;
        tokio::time::timeout(self.config.rdm_timeout, rx)
            .await
            .map_err(|_| {
                tracing::debug!("RDM capabilities request timed out");
                ClientError::Timeout
            })?
            .map_err(|_| ClientError::WorkerTerminated)
    }

    /// Launches the companion application.
    pub async fn rdm_app_start(&self, start: RdmAppStart) -> Result<(), ClientError> {
        self.rdm_capabilities().await?;
        self.send(RdmMessage::AppStart(start)).await
    }

    pub async fn rdm_app_action(
        &self,
        action: AppAction,
        data: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.rdm_capabilities().await?;
        self.send(RdmMessage::AppAction {
            action,
            data: data.into(),
        })
        .await
    }

    /// Subscribes to application notifications, replacing any previous
    /// subscriber.
    pub async fn rdm_app_notifications(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<RdmAppNotify>, ClientError> {
        self.rdm_capabilities().await?;
        let (sink, notifications) = mpsc::unbounded_channel();
        self.enqueue(Command::RdmAppNotifications(sink)).await?;
        Ok(notifications)
    }

    /// Subscribes to notifications of every RDM session, replacing any
    /// previous subscriber.
    pub async fn rdm_session_notifications(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<RdmSessionNotify>, ClientError> {
        self.rdm_capabilities().await?;
        let (sink, notifications) = mpsc::unbounded_channel();
        self.enqueue(Command::RdmSessionNotifications(sink)).await?;
        Ok(notifications)
    }

    /// Opens an RDM session. A random id is generated when `session_id`
    /// is `None`.
    pub async fn rdm_session_start(
        &self,
        session_id: Option<Uuid>,
        connection_id: Uuid,
        connection_data: impl Into<String>,
    ) -> Result<RdmSession, ClientError> {
        self.rdm_capabilities().await?;

        let session_id = session_id.unwrap_or_else(Uuid::new_v4);
        let (entry, state, notifications) = RdmSessionEntry::new();
        let start = RdmSessionStart {
            session_id,
            connection_id,
            connection_data: connection_data.into(),
        };

        self.ack(|reply| Command::RdmSessionStart {
            start,
            entry,
            reply,
        })
        .await?;

        Ok(RdmSession::new(
            session_id,
            self.commands.clone(),
            state,
            notifications,
        ))
    }
}

impl std::fmt::Debug for NowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NowClient")
            .field("capabilities", &self.capabilities)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
