//! Connection worker.
//!
//! One task per connection owns the [`NowChannel`] and every correlation
//! table. It multiplexes three sources in a biased `select!`:
//!
//! 1. the command queue fed by [`NowClient`](crate::NowClient) and the
//!    session handles
//! 2. inbound messages
//! 3. the heartbeat supervision timer, when a heartbeat was negotiated
//!
//! Nothing here is shared, so nothing is locked. When the worker stops,
//! every table is dropped and callers waiting on a reply observe
//! [`ClientError::WorkerTerminated`].

use crate::channel::{EncodedMessage, NowChannel, Transport};
use crate::command::{Ack, Command, MsgBoxReplySender};
use crate::error::ClientError;
use crate::exec::{ExecEntry, ExecEvent, ExecState};
use crate::rdm::{RdmCapabilities, RdmSessionEntry};
use bytes::Bytes;
use now_proto::exec::MAX_DATA_CHUNK;
use now_proto::rdm::{
    RdmAppNotify, RdmCapabilitiesMsg, RdmSessionNotify, SessionAction, SessionNotifyKind,
};
use now_proto::session::{WindowRecEvent, WindowRecStart};
use now_proto::{
    ChannelMessage, ExecData, ExecMessage, ExecResult, ExecStream, NowErrorCode, NowMessage,
    NowStatus, NowStatusError, RdmMessage, SessionMessage,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

/// Grace period added to the heartbeat interval before the peer is
/// considered gone.
pub const HEARTBEAT_LEEWAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Worker<T> {
    channel: NowChannel<T>,
    commands: mpsc::Receiver<Command>,
    heartbeat_interval: Option<Duration>,
    last_heartbeat: Instant,
    exec_sessions: HashMap<u32, ExecEntry>,
    msgboxes: HashMap<u32, MsgBoxReplySender>,
    window_rec_sink: Option<mpsc::UnboundedSender<WindowRecEvent>>,
    rdm_caps: Option<RdmCapabilities>,
    rdm_waiters: Vec<oneshot::Sender<RdmCapabilities>>,
    rdm_sessions: HashMap<Uuid, RdmSessionEntry>,
    app_notify_sink: Option<mpsc::UnboundedSender<RdmAppNotify>>,
    session_notify_sink: Option<mpsc::UnboundedSender<RdmSessionNotify>>,
}

impl<T: Transport> Worker<T> {
    pub(crate) fn new(
        channel: NowChannel<T>,
        commands: mpsc::Receiver<Command>,
        heartbeat_interval: Option<Duration>,
    ) -> Self {
        Self {
            channel,
            commands,
            heartbeat_interval,
            last_heartbeat: Instant::now(),
            exec_sessions: HashMap::new(),
            msgboxes: HashMap::new(),
            window_rec_sink: None,
            rdm_caps: None,
            rdm_waiters: Vec::new(),
            rdm_sessions: HashMap::new(),
            app_notify_sink: None,
            session_notify_sink: None,
        }
    }

    /// Runs until the channel is closed or fails.
    pub(crate) async fn run(mut self) -> Result<(), ClientError> {
        tracing::debug!("Worker started");
        let result = self.run_loop().await;
        match &result {
            Ok(()) => tracing::info!("Channel closed"),
            Err(e) => tracing::warn!("Worker terminated: {}", e),
        }
        tracing::debug!(
            "Dropping {} exec sessions, {} message boxes, {} RDM sessions",
            self.exec_sessions.len(),
            self.msgboxes.len(),
            self.rdm_sessions.len()
        );
        result
    }

    async fn run_loop(&mut self) -> Result<(), ClientError> {
        let supervise = self.heartbeat_interval.is_some();
        let interval = self.heartbeat_interval.unwrap_or(Duration::ZERO);
        let timer = tokio::time::sleep(interval * 2);
        tokio::pin!(timer);

        loop {
            let flow = tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await?,
                    None => {
                        tracing::debug!("All client handles dropped, closing channel");
                        self.channel
                            .write_message(ChannelMessage::Close(NowStatus::Success))
                            .await?;
                        Flow::Stop
                    }
                },

                message = self.channel.read_message() => self.handle_message(message?)?,

                () = &mut timer, if supervise => {
                    let elapsed = self.last_heartbeat.elapsed();
                    if elapsed > interval + HEARTBEAT_LEEWAY {
                        tracing::warn!("No heartbeat received for {:?}", elapsed);
                        return Err(ClientError::HeartbeatTimeout);
                    }
                    tracing::debug!("Heartbeat check passed ({:?} since last)", elapsed);
                    timer.as_mut().reset(Instant::now() + interval * 2);
                    Flow::Continue
                }
            };

            if flow == Flow::Stop {
                return Ok(());
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<Flow, ClientError> {
        match command {
            Command::Send { message, reply } => {
                let encoded = match EncodedMessage::new(message) {
                    Ok(encoded) => encoded,
                    Err(e) => return Ok(reject(reply, e)),
                };
                self.channel.write_encoded(&encoded).await?;
                let _ = reply.send(Ok(()));
            }
            Command::MsgBox {
                request,
                response,
                reply,
            } => {
                let request_id = request.request_id;
                let encoded = match EncodedMessage::new(SessionMessage::MsgBoxReq(request)) {
                    Ok(encoded) => encoded,
                    Err(e) => return Ok(reject(reply, e)),
                };
                if let Some(response) = response {
                    self.msgboxes.insert(request_id, response);
                }
                self.channel.write_encoded(&encoded).await?;
                let _ = reply.send(Ok(()));
            }
            Command::ExecStart {
                message,
                entry,
                reply,
            } => {
                let session_id = message.session_id();
                let encoded = match EncodedMessage::new(message) {
                    Ok(encoded) => encoded,
                    Err(e) => return Ok(reject(reply, e)),
                };
                self.exec_sessions.insert(session_id, entry);
                self.channel.write_encoded(&encoded).await?;
                tracing::debug!("Exec session {} requested", session_id);
                let _ = reply.send(Ok(()));
            }
            Command::ExecStdin {
                session_id,
                data,
                last,
                reply,
            } => self.exec_stdin(session_id, data, last, reply).await?,
            Command::ExecCancel { session_id, reply } => {
                let Some(entry) = self.exec_sessions.get_mut(&session_id) else {
                    let _ = reply.send(Err(ClientError::SessionTerminated { session_id }));
                    return Ok(Flow::Continue);
                };
                let first = !entry.has_pending_cancel();
                entry.add_cancel_waiter(reply);
                if first {
                    self.channel
                        .write_message(ExecMessage::CancelReq { session_id })
                        .await?;
                }
            }
            Command::ExecAbort {
                session_id,
                exit_code,
                reply,
            } => {
                if !self.exec_sessions.contains_key(&session_id) {
                    let _ = reply.send(Err(ClientError::SessionTerminated { session_id }));
                    return Ok(Flow::Continue);
                }
                self.channel
                    .write_message(ExecMessage::Abort {
                        session_id,
                        exit_code,
                    })
                    .await?;
                if let Some(entry) = self.exec_sessions.remove(&session_id) {
                    entry.finish(ExecState::Aborted { exit_code }, session_id);
                }
                let _ = reply.send(Ok(()));
            }
            Command::WindowRecStart {
                params,
                sink,
                reply,
            } => self.window_rec_start(params, sink, reply).await?,
            Command::WindowRecStop { reply } => {
                self.channel
                    .write_message(SessionMessage::WindowRecStop)
                    .await?;
                self.window_rec_sink = None;
                let _ = reply.send(Ok(()));
            }
            Command::RdmSync { force, reply } => self.rdm_sync(force, reply).await?,
            Command::RdmAppNotifications(sink) => self.app_notify_sink = Some(sink),
            Command::RdmSessionStart {
                start,
                entry,
                reply,
            } => {
                if self.rdm_sessions.contains_key(&start.session_id) {
                    let status = NowStatusError::now(NowErrorCode::InUse)
                        .with_message(format!("RDM session {} already exists", start.session_id));
                    let _ = reply.send(Err(ClientError::Status(status)));
                    return Ok(Flow::Continue);
                }
                let session_id = start.session_id;
                let encoded = match EncodedMessage::new(RdmMessage::SessionStart(start)) {
                    Ok(encoded) => encoded,
                    Err(e) => return Ok(reject(reply, e)),
                };
                self.rdm_sessions.insert(session_id, entry);
                self.channel.write_encoded(&encoded).await?;
                tracing::debug!("RDM session {} started", session_id);
                let _ = reply.send(Ok(()));
            }
            Command::RdmSessionAction {
                session_id,
                action,
                reply,
            } => {
                if !self.rdm_sessions.contains_key(&session_id) {
                    let _ = reply.send(Err(ClientError::RdmSessionClosed(session_id)));
                    return Ok(Flow::Continue);
                }
                self.channel
                    .write_message(RdmMessage::SessionAction { action, session_id })
                    .await?;
                if action == SessionAction::Close {
                    if let Some(entry) = self.rdm_sessions.remove(&session_id) {
                        entry.close();
                    }
                }
                let _ = reply.send(Ok(()));
            }
            Command::RdmSessionNotifications(sink) => self.session_notify_sink = Some(sink),
            Command::Close => {
                tracing::debug!("Closing channel");
                self.channel
                    .write_message(ChannelMessage::Close(NowStatus::Success))
                    .await?;
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    async fn exec_stdin(
        &mut self,
        session_id: u32,
        data: Bytes,
        last: bool,
        reply: Ack,
    ) -> Result<(), ClientError> {
        if !self.exec_sessions.contains_key(&session_id) {
            let _ = reply.send(Err(ClientError::SessionTerminated { session_id }));
            return Ok(());
        }

        let chunks = stdin_chunks(data, last);
        tracing::debug!(
            "Sending stdin to exec session {} in {} chunks",
            session_id,
            chunks.len()
        );
        for (data, last) in chunks {
            self.channel
                .write_message(ExecData {
                    session_id,
                    stream: ExecStream::Stdin,
                    last,
                    data,
                })
                .await?;
        }
        let _ = reply.send(Ok(()));
        Ok(())
    }

    async fn window_rec_start(
        &mut self,
        params: WindowRecStart,
        sink: mpsc::UnboundedSender<WindowRecEvent>,
        reply: Ack,
    ) -> Result<(), ClientError> {
        self.window_rec_sink = Some(sink);
        self.channel
            .write_message(SessionMessage::WindowRecStart(params))
            .await?;
        let _ = reply.send(Ok(()));
        Ok(())
    }

    async fn rdm_sync(
        &mut self,
        force: bool,
        reply: oneshot::Sender<RdmCapabilities>,
    ) -> Result<(), ClientError> {
        if force {
            self.rdm_caps = None;
        }
        if let Some(caps) = &self.rdm_caps {
            let _ = reply.send(caps.clone());
            return Ok(());
        }

        // waiters that timed out no longer hold the exchange open
        self.rdm_waiters.retain(|waiter| !waiter.is_closed());
        let pending = !self.rdm_waiters.is_empty();
        self.rdm_waiters.push(reply);

        if force || !pending {
            tracing::debug!("Requesting RDM capabilities");
            let request = RdmCapabilitiesMsg {
                timestamp: u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0),
                app_available: false,
                rdm_version: String::new(),
                version_extra: String::new(),
            };
            self.channel
                .write_message(RdmMessage::Capabilities(request))
                .await?;
        }
        Ok(())
    }

    fn handle_message(&mut self, message: NowMessage) -> Result<Flow, ClientError> {
        match message {
            NowMessage::Channel(msg) => return self.handle_channel(msg),
            NowMessage::System(msg) => {
                tracing::debug!("Ignoring system message {:?}", msg);
            }
            NowMessage::Session(msg) => self.handle_session(msg),
            NowMessage::Exec(msg) => self.handle_exec(msg),
            NowMessage::Rdm(msg) => self.handle_rdm(msg),
        }
        Ok(Flow::Continue)
    }

    fn handle_channel(&mut self, msg: ChannelMessage) -> Result<Flow, ClientError> {
        match msg {
            ChannelMessage::Heartbeat => {
                tracing::debug!("Heartbeat received");
                self.last_heartbeat = Instant::now();
                Ok(Flow::Continue)
            }
            ChannelMessage::Close(NowStatus::Success) => {
                tracing::debug!("Peer closed the channel");
                Ok(Flow::Stop)
            }
            ChannelMessage::Close(NowStatus::Error(status)) => {
                tracing::error!("Peer closed the channel: {}", status);
                Err(ClientError::ChannelClosed(status))
            }
            ChannelMessage::Capset(_) => {
                tracing::warn!("Ignoring capabilities received after negotiation");
                Ok(Flow::Continue)
            }
        }
    }

    fn handle_session(&mut self, msg: SessionMessage) {
        match msg {
            SessionMessage::MsgBoxRsp(reply) => match self.msgboxes.remove(&reply.request_id) {
                Some(waiter) => {
                    let _ = waiter.send(reply.response);
                }
                None => {
                    tracing::debug!(
                        "Message box response for unknown request {}",
                        reply.request_id
                    );
                }
            },
            SessionMessage::WindowRecEvent(event) => match &self.window_rec_sink {
                Some(sink) => {
                    if sink.send(event).is_err() {
                        self.window_rec_sink = None;
                    }
                }
                None => tracing::debug!("Window recording event without a subscriber"),
            },
            other => tracing::debug!("Ignoring session message {:?}", other),
        }
    }

    fn handle_exec(&mut self, msg: ExecMessage) {
        match msg {
            ExecMessage::Started { session_id } => {
                if let Some(entry) = self.exec_sessions.get(&session_id) {
                    entry.publish(ExecEvent::Started);
                } else {
                    tracing::debug!("Started for unknown exec session {}", session_id);
                }
            }
            ExecMessage::Data(ExecData {
                session_id,
                stream,
                last,
                data,
            }) => {
                let Some(entry) = self.exec_sessions.get(&session_id) else {
                    tracing::debug!(
                        "Dropping {} bytes for unknown exec session {}",
                        data.len(),
                        session_id
                    );
                    return;
                };
                match stream {
                    ExecStream::Stdout => entry.publish(ExecEvent::Stdout { data, last }),
                    ExecStream::Stderr => entry.publish(ExecEvent::Stderr { data, last }),
                    ExecStream::Stdin => {
                        tracing::debug!("Ignoring stdin data from peer (session {})", session_id)
                    }
                }
            }
            ExecMessage::Result(ExecResult { session_id, result }) => {
                match self.exec_sessions.remove(&session_id) {
                    Some(entry) => {
                        tracing::debug!("Exec session {} completed: {:?}", session_id, result);
                        entry.finish(ExecState::Completed(result), session_id);
                    }
                    None => tracing::debug!("Result for unknown exec session {}", session_id),
                }
            }
            ExecMessage::CancelRsp { session_id, result } => {
                let pending = self
                    .exec_sessions
                    .get(&session_id)
                    .is_some_and(ExecEntry::has_pending_cancel);
                if !pending {
                    tracing::debug!("Stale cancel response for exec session {}", session_id);
                    return;
                }
                match result {
                    Ok(()) => {
                        if let Some(entry) = self.exec_sessions.remove(&session_id) {
                            entry.finish(ExecState::Canceled, session_id);
                        }
                    }
                    Err(status) => {
                        tracing::debug!("Cancel of exec session {} failed: {}", session_id, status);
                        if let Some(entry) = self.exec_sessions.get_mut(&session_id) {
                            entry.cancel_failed(status);
                        }
                    }
                }
            }
            ExecMessage::Abort {
                session_id,
                exit_code,
            } => match self.exec_sessions.remove(&session_id) {
                Some(entry) => {
                    tracing::debug!("Exec session {} aborted by peer", session_id);
                    entry.finish(ExecState::Aborted { exit_code }, session_id);
                }
                None => tracing::debug!("Abort for unknown exec session {}", session_id),
            },
            other => tracing::debug!(
                "Ignoring exec request from peer (session {})",
                other.session_id()
            ),
        }
    }

    fn handle_rdm(&mut self, msg: RdmMessage) {
        match msg {
            RdmMessage::Capabilities(msg) => {
                let caps = RdmCapabilities::from(msg);
                tracing::debug!(
                    "RDM capabilities received (version {}, app available: {})",
                    caps.rdm_version,
                    caps.is_app_available
                );
                for waiter in self.rdm_waiters.drain(..) {
                    let _ = waiter.send(caps.clone());
                }
                self.rdm_caps = Some(caps);
            }
            RdmMessage::AppNotify(notify) => match &self.app_notify_sink {
                Some(sink) => {
                    if sink.send(notify).is_err() {
                        self.app_notify_sink = None;
                    }
                }
                None => tracing::debug!("RDM app notification without a subscriber: {:?}", notify),
            },
            RdmMessage::SessionNotify(notify) => self.rdm_session_notify(notify),
            other => tracing::debug!("Ignoring RDM message {:?}", other),
        }
    }

    fn rdm_session_notify(&mut self, notify: RdmSessionNotify) {
        let session_id = notify.session_id;

        if let Some(sink) = &self.session_notify_sink {
            if sink.send(notify.clone()).is_err() {
                self.session_notify_sink = None;
            }
        }

        let close = notify.kind == SessionNotifyKind::Close;
        match self.rdm_sessions.get(&session_id) {
            Some(entry) => entry.notify(notify),
            None => {
                tracing::debug!("Notification for unknown RDM session {}", session_id);
                return;
            }
        }
        if close {
            if let Some(entry) = self.rdm_sessions.remove(&session_id) {
                tracing::debug!("RDM session {} closed by peer", session_id);
                entry.close();
            }
        }
    }
}

/// Hands a local failure back to the caller. The connection is unaffected.
fn reject(reply: Ack, err: ClientError) -> Flow {
    tracing::debug!("Rejecting request: {}", err);
    let _ = reply.send(Err(err));
    Flow::Continue
}

/// Splits stdin data into wire chunks. Only the final chunk of a `last`
/// write carries the flag, and an empty `last` write still sends one
/// empty chunk.
fn stdin_chunks(data: Bytes, last: bool) -> Vec<(Bytes, bool)> {
    if data.is_empty() {
        return if last { vec![(data, true)] } else { Vec::new() };
    }

    let mut chunks = Vec::with_capacity(data.len().div_ceil(MAX_DATA_CHUNK));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + MAX_DATA_CHUNK).min(data.len());
        chunks.push((data.slice(offset..end), last && end == data.len()));
        offset = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdin_chunks() {
        let data = Bytes::from(vec![7u8; MAX_DATA_CHUNK * 2 + 10]);
        let chunks = stdin_chunks(data, true);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].0.len(), MAX_DATA_CHUNK);
        assert_eq!(chunks[2].0.len(), 10);
        assert_eq!(
            chunks.iter().map(|(_, last)| *last).collect::<Vec<_>>(),
            vec![false, false, true]
        );
    }

    #[test]
    fn test_stdin_chunks_not_last() {
        let chunks = stdin_chunks(Bytes::from(vec![1u8; MAX_DATA_CHUNK]), false);
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].1);
    }

    #[test]
    fn test_empty_stdin() {
        assert_eq!(stdin_chunks(Bytes::new(), true), vec![(Bytes::new(), true)]);
        assert!(stdin_chunks(Bytes::new(), false).is_empty());
    }
}
