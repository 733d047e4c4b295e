//! RDM host: the server side of the RDM sub-protocol.
//!
//! The host accepts one client, echoes its capabilities, announces that
//! the application is ready and then serves until the channel closes.
//! Requests from the client are published as [`HostEvent`]s; the
//! application answers through the [`HostHandle`].

use crate::channel::{EncodedMessage, NowChannel, Transport};
use crate::command::Ack;
use crate::config::HostConfig;
use crate::error::ClientError;
use crate::negotiate::accept_client;
use crate::rdm::RdmCapabilities;
use chrono::Utc;
use now_proto::rdm::{
    AppAction, AppReason, AppState, RdmAppNotify, RdmAppStart, RdmCapabilitiesMsg,
    RdmSessionNotify, RdmSessionStart, SessionAction,
};
use now_proto::{Capset, ChannelMessage, NowMessage, NowStatus, RdmMessage};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

const HOST_COMMAND_CAPACITY: usize = 64;

/// Request received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    AppStart(RdmAppStart),
    AppAction { action: AppAction, data: String },
    SessionStart(RdmSessionStart),
    SessionAction { action: SessionAction, session_id: Uuid },
}

enum HostCommand {
    Send { message: NowMessage, reply: Ack },
    Close,
}

/// RDM host settings.
#[derive(Debug, Clone)]
pub struct RdmHost {
    capabilities: RdmCapabilities,
    heartbeat_interval: Option<Duration>,
    negotiate_timeout: Duration,
}

impl RdmHost {
    pub fn new(capabilities: RdmCapabilities) -> Self {
        Self {
            capabilities,
            heartbeat_interval: None,
            negotiate_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(RdmCapabilities {
            is_app_available: config.app_available,
            rdm_version: config.rdm_version.clone(),
            version_extra: String::new(),
            server_timestamp: Utc::now(),
        })
        .with_heartbeat_interval(config.heartbeat_interval())
    }

    /// Heartbeat send interval. `None` follows the negotiated interval.
    pub fn with_heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_negotiate_timeout(mut self, timeout: Duration) -> Self {
        self.negotiate_timeout = timeout;
        self
    }

    /// Negotiates with the client on `transport` and starts serving it.
    pub async fn accept<T: Transport>(
        self,
        transport: T,
    ) -> Result<(HostHandle, mpsc::UnboundedReceiver<HostEvent>), ClientError> {
        let mut channel = NowChannel::new(transport);
        let capset = accept_client(&mut channel, self.negotiate_timeout).await?;
        tracing::info!("RDM client connected (protocol {})", capset.version);

        channel
            .write_message(RdmMessage::AppNotify(RdmAppNotify {
                state: AppState::Ready,
                reason: AppReason::NotSpecified,
                data: String::new(),
            }))
            .await?;

        let (command_tx, command_rx) = mpsc::channel(HOST_COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let heartbeat_interval = self.heartbeat_interval.or(capset.heartbeat());

        let host = HostLoop {
            channel,
            commands: command_rx,
            events: event_tx,
            capabilities: self.capabilities,
            heartbeat_interval,
        };

        let handle = HostHandle {
            commands: command_tx,
            capabilities: capset,
            task: tokio::spawn(host.run()),
        };
        Ok((handle, event_rx))
    }
}

/// Control handle for a running host.
#[derive(Debug)]
pub struct HostHandle {
    commands: mpsc::Sender<HostCommand>,
    capabilities: Capset,
    task: JoinHandle<Result<(), ClientError>>,
}

impl HostHandle {
    /// Capabilities announced by the client.
    pub fn capabilities(&self) -> &Capset {
        &self.capabilities
    }

    pub fn is_terminated(&self) -> bool {
        self.task.is_finished()
    }

    /// Reports an application state change to the client.
    pub async fn app_notify(&self, notify: RdmAppNotify) -> Result<(), ClientError> {
        self.send(RdmMessage::AppNotify(notify)).await
    }

    /// Reports a session event to the client.
    pub async fn session_notify(&self, notify: RdmSessionNotify) -> Result<(), ClientError> {
        self.send(RdmMessage::SessionNotify(notify)).await
    }

    async fn send(&self, message: impl Into<NowMessage>) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HostCommand::Send {
                message: message.into(),
                reply,
            })
            .await
            .map_err(|_| ClientError::WorkerTerminated)?;
        rx.await.map_err(|_| ClientError::WorkerTerminated)?
    }

    /// Closes the channel and waits for the host to stop.
    pub async fn close(self) -> Result<(), ClientError> {
        let _ = self.commands.send(HostCommand::Close).await;
        self.wait().await
    }

    /// Waits for the host to stop and returns the reason.
    pub async fn wait(self) -> Result<(), ClientError> {
        self.task.await.map_err(|e| {
            tracing::error!("Host task failed: {}", e);
            ClientError::WorkerTerminated
        })?
    }
}

struct HostLoop<T> {
    channel: NowChannel<T>,
    commands: mpsc::Receiver<HostCommand>,
    events: mpsc::UnboundedSender<HostEvent>,
    capabilities: RdmCapabilities,
    heartbeat_interval: Option<Duration>,
}

impl<T: Transport> HostLoop<T> {
    async fn run(mut self) -> Result<(), ClientError> {
        let result = self.serve().await;
        match &result {
            Ok(()) => tracing::info!("RDM client disconnected"),
            Err(e) => tracing::warn!("RDM host stopped: {}", e),
        }
        result
    }

    async fn serve(&mut self) -> Result<(), ClientError> {
        let send_heartbeats = self.heartbeat_interval.is_some();
        let period = self.heartbeat_interval.unwrap_or(Duration::from_secs(60));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(HostCommand::Send { message, reply }) => {
                        match EncodedMessage::new(message) {
                            Ok(encoded) => {
                                self.channel.write_encoded(&encoded).await?;
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                tracing::debug!("Rejecting host message: {}", e);
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    Some(HostCommand::Close) | None => {
                        self.channel
                            .write_message(ChannelMessage::Close(NowStatus::Success))
                            .await?;
                        return Ok(());
                    }
                },

                message = self.channel.read_message() => {
                    if !self.handle_message(message?).await? {
                        return Ok(());
                    }
                }

                _ = heartbeat.tick(), if send_heartbeats => {
                    tracing::debug!("Sending heartbeat");
                    self.channel.write_message(ChannelMessage::Heartbeat).await?;
                }
            }
        }
    }

    /// Returns `false` when the client closed the channel.
    async fn handle_message(&mut self, message: NowMessage) -> Result<bool, ClientError> {
        let event = match message {
            NowMessage::Channel(ChannelMessage::Close(status)) => {
                return match status {
                    NowStatus::Success => Ok(false),
                    NowStatus::Error(status) => Err(ClientError::ChannelClosed(status)),
                };
            }
            NowMessage::Rdm(RdmMessage::Capabilities(request)) => {
                tracing::debug!(
                    "RDM capabilities requested (client time {})",
                    request.timestamp
                );
                let mut reply = RdmCapabilitiesMsg::from(&self.capabilities);
                reply.timestamp = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
                self.channel
                    .write_message(RdmMessage::Capabilities(reply))
                    .await?;
                return Ok(true);
            }
            NowMessage::Rdm(RdmMessage::AppStart(start)) => HostEvent::AppStart(start),
            NowMessage::Rdm(RdmMessage::AppAction { action, data }) => {
                HostEvent::AppAction { action, data }
            }
            NowMessage::Rdm(RdmMessage::SessionStart(start)) => HostEvent::SessionStart(start),
            NowMessage::Rdm(RdmMessage::SessionAction { action, session_id }) => {
                HostEvent::SessionAction { action, session_id }
            }
            other => {
                tracing::debug!(
                    "Ignoring {} message kind={:#04x}",
                    other.class(),
                    other.kind()
                );
                return Ok(true);
            }
        };

        if self.events.send(event).is_err() {
            tracing::debug!("Host event dropped, no subscriber");
        }
        Ok(true)
    }
}
