//! RDM sub-protocol: companion application capabilities and sessions.

use crate::command::{Command, CommandSender};
use crate::error::ClientError;
use chrono::{DateTime, Utc};
use now_proto::rdm::{RdmCapabilitiesMsg, RdmSessionNotify, SessionAction};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Companion application capabilities reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RdmCapabilities {
    pub is_app_available: bool,
    pub rdm_version: String,
    pub version_extra: String,
    pub server_timestamp: DateTime<Utc>,
}

impl From<RdmCapabilitiesMsg> for RdmCapabilities {
    fn from(msg: RdmCapabilitiesMsg) -> Self {
        let server_timestamp = i64::try_from(msg.timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_default();

        Self {
            is_app_available: msg.app_available,
            rdm_version: msg.rdm_version,
            version_extra: msg.version_extra,
            server_timestamp,
        }
    }
}

impl From<&RdmCapabilities> for RdmCapabilitiesMsg {
    fn from(caps: &RdmCapabilities) -> Self {
        Self {
            timestamp: u64::try_from(caps.server_timestamp.timestamp()).unwrap_or(0),
            app_available: caps.is_app_available,
            rdm_version: caps.rdm_version.clone(),
            version_extra: caps.version_extra.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdmSessionState {
    Active,
    Closed,
}

/// Worker-side table entry for one RDM session.
pub(crate) struct RdmSessionEntry {
    state: watch::Sender<RdmSessionState>,
    notifications: mpsc::UnboundedSender<RdmSessionNotify>,
}

impl RdmSessionEntry {
    pub(crate) fn new() -> (
        Self,
        watch::Receiver<RdmSessionState>,
        mpsc::UnboundedReceiver<RdmSessionNotify>,
    ) {
        let (state, state_rx) = watch::channel(RdmSessionState::Active);
        let (notifications, notifications_rx) = mpsc::unbounded_channel();
        let entry = Self {
            state,
            notifications,
        };
        (entry, state_rx, notifications_rx)
    }

    pub(crate) fn notify(&self, notify: RdmSessionNotify) {
        let _ = self.notifications.send(notify);
    }

    pub(crate) fn close(self) {
        self.state.send_replace(RdmSessionState::Closed);
    }
}

/// Handle to an RDM session opened with
/// [`NowClient::rdm_session_start`](crate::NowClient::rdm_session_start).
#[derive(Debug)]
pub struct RdmSession {
    session_id: Uuid,
    commands: CommandSender,
    state: watch::Receiver<RdmSessionState>,
    notifications: mpsc::UnboundedReceiver<RdmSessionNotify>,
}

impl RdmSession {
    pub(crate) fn new(
        session_id: Uuid,
        commands: CommandSender,
        state: watch::Receiver<RdmSessionState>,
        notifications: mpsc::UnboundedReceiver<RdmSessionNotify>,
    ) -> Self {
        Self {
            session_id,
            commands,
            state,
            notifications,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> RdmSessionState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == RdmSessionState::Closed
    }

    /// Brings the session window to the foreground.
    pub async fn focus(&self) -> Result<(), ClientError> {
        self.action(SessionAction::Focus).await
    }

    /// Closes the session. It is `Closed` once the request was written.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.action(SessionAction::Close).await
    }

    async fn action(&self, action: SessionAction) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::RdmSessionClosed(self.session_id));
        }
        self.commands
            .ack(|reply| Command::RdmSessionAction {
                session_id: self.session_id,
                action,
                reply,
            })
            .await
    }

    /// Next notification for this session. Returns `None` once the session
    /// is closed and every notification was consumed.
    pub async fn next_notification(&mut self) -> Option<RdmSessionNotify> {
        self.notifications.recv().await
    }

    /// Waits until the session is closed, by either side.
    pub async fn closed(&self) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        let closed = state
            .wait_for(|state| *state == RdmSessionState::Closed)
            .await
            .is_ok();
        if closed || *state.borrow() == RdmSessionState::Closed {
            Ok(())
        } else {
            Err(ClientError::WorkerTerminated)
        }
    }
}
