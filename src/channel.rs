use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::{ChannelError, CloseReason};
use crate::telemetry::ChannelStats;
use crate::wsproto::{
    self, ChannelKind, EventSubscriptionEntry, Frame, MediaChunk, STREAM_STATE_TERMINATED,
};

const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
// Stand-in deadline when no timer is armed.
const PARKED: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum ChannelState {
    Connecting,
    AwaitingHandshakeAck,
    Ready,
    Closing,
    Closed,
}

/// Side effects requested by the state machine, carried out by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write a frame on this channel.
    Send(Frame),
    /// Signaling handshake succeeded; the media channel should connect here.
    OpenMedia(String),
    /// Media handshake succeeded; the ready ack goes out on the signaling channel.
    MediaReady,
    Deliver(MediaChunk),
    Close(CloseReason),
}

/// Transport-free state machine for one signaling or media channel.
#[derive(Debug)]
pub struct ChannelMachine {
    kind: ChannelKind,
    state: ChannelState,
    handshake: Frame,
    subscribe_events: Vec<u32>,
    media_requested: bool,
}

impl ChannelMachine {
    pub fn new(kind: ChannelKind, handshake: Frame, subscribe_events: Vec<u32>) -> Self {
        Self {
            kind,
            state: ChannelState::Connecting,
            handshake,
            subscribe_events,
            media_requested: false,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn on_connected(&mut self) -> Vec<Action> {
        if self.state != ChannelState::Connecting {
            return Vec::new();
        }
        self.state = ChannelState::AwaitingHandshakeAck;
        vec![Action::Send(self.handshake.clone())]
    }

    pub fn on_frame(&mut self, frame: Frame) -> Vec<Action> {
        match self.state {
            ChannelState::AwaitingHandshakeAck => self.on_handshake_frame(frame),
            ChannelState::Ready => self.on_ready_frame(frame),
            _ => Vec::new(),
        }
    }

    fn on_handshake_frame(&mut self, frame: Frame) -> Vec<Action> {
        let resp = match frame {
            Frame::HandshakeResponse(resp) if resp.channel == self.kind => resp,
            // Anything else before the handshake completes is not well-formed here.
            _ => return Vec::new(),
        };
        if !resp.is_success() {
            return self.fail(ChannelError::HandshakeRejected {
                status_code: resp.status_code,
                reason: resp.reason,
            });
        }
        match self.kind {
            ChannelKind::Signaling => {
                let url = match resp.media_url {
                    Some(url) => url,
                    None => {
                        return self.fail(ChannelError::HandshakeRejected {
                            status_code: resp.status_code,
                            reason: "handshake response has no media server url".to_string(),
                        })
                    }
                };
                self.state = ChannelState::Ready;
                let mut actions = Vec::new();
                if !self.subscribe_events.is_empty() {
                    let events = self
                        .subscribe_events
                        .iter()
                        .map(|&event_type| EventSubscriptionEntry {
                            event_type,
                            subscribe: true,
                        })
                        .collect();
                    actions.push(Action::Send(Frame::EventSubscription(events)));
                }
                self.media_requested = true;
                actions.push(Action::OpenMedia(url));
                actions
            }
            ChannelKind::Media => {
                self.state = ChannelState::Ready;
                vec![Action::MediaReady]
            }
        }
    }

    fn on_ready_frame(&mut self, frame: Frame) -> Vec<Action> {
        match frame {
            Frame::KeepAliveRequest { timestamp } => {
                vec![Action::Send(Frame::KeepAliveResponse { timestamp })]
            }
            Frame::MediaData(chunk) if self.kind == ChannelKind::Media => {
                vec![Action::Deliver(chunk)]
            }
            Frame::HandshakeResponse(resp)
                if self.kind == ChannelKind::Signaling && resp.is_success() =>
            {
                // Repeated success: the media channel was already requested.
                if self.media_requested {
                    return Vec::new();
                }
                match resp.media_url {
                    Some(url) => {
                        self.media_requested = true;
                        vec![Action::OpenMedia(url)]
                    }
                    None => Vec::new(),
                }
            }
            Frame::StreamStateChanged { state, reason }
                if self.kind == ChannelKind::Signaling && state == STREAM_STATE_TERMINATED =>
            {
                self.fail(ChannelError::StreamTerminated { reason })
            }
            _ => Vec::new(),
        }
    }

    pub fn on_handshake_timeout(&mut self, after: Duration) -> Vec<Action> {
        if self.state != ChannelState::AwaitingHandshakeAck {
            return Vec::new();
        }
        self.fail(ChannelError::HandshakeTimeout(after))
    }

    pub fn on_idle_timeout(&mut self, after: Duration) -> Vec<Action> {
        if self.state != ChannelState::Ready {
            return Vec::new();
        }
        self.fail(ChannelError::IdleTimeout(after))
    }

    /// Returns false when the channel is already closing or closed.
    pub fn begin_close(&mut self) -> bool {
        match self.state {
            ChannelState::Closing | ChannelState::Closed => false,
            _ => {
                self.state = ChannelState::Closing;
                true
            }
        }
    }

    pub fn finish_close(&mut self) {
        self.state = ChannelState::Closed;
    }

    fn fail(&mut self, err: ChannelError) -> Vec<Action> {
        self.state = ChannelState::Closing;
        vec![Action::Close(CloseReason::Failed(err))]
    }
}

/// What a channel reports to its session supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Ready,
    OpenMedia(String),
    Media(MediaChunk),
    Closed(CloseReason),
}

pub type SessionEventSender = mpsc::UnboundedSender<(ChannelKind, ChannelEvent)>;
pub type SessionEventReceiver = mpsc::UnboundedReceiver<(ChannelKind, ChannelEvent)>;

#[derive(Debug, Clone)]
pub struct ChannelParams {
    pub kind: ChannelKind,
    pub session_id: String,
    pub url: String,
    pub handshake: Frame,
    pub subscribe_events: Vec<u32>,
    pub handshake_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

/// Owner-side view of a running channel task. Dropping it does not stop the
/// task; call [`ChannelHandle::close`].
#[derive(Clone, Debug)]
pub struct ChannelHandle {
    kind: ChannelKind,
    url: String,
    outbound: mpsc::UnboundedSender<Frame>,
    shutdown: Arc<Notify>,
    close_requested: Arc<AtomicBool>,
    state: Arc<Mutex<ChannelState>>,
}

impl ChannelHandle {
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a frame for the channel's writer. False once the task has exited.
    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.send(frame).is_ok()
    }

    /// Idempotent, non-blocking, callable from any task.
    pub fn close(&self) {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();
    }
}

pub fn spawn_channel(
    params: ChannelParams,
    events: SessionEventSender,
    stats: Arc<ChannelStats>,
) -> ChannelHandle {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let handle = ChannelHandle {
        kind: params.kind,
        url: params.url.clone(),
        outbound: outbound_tx,
        shutdown: Arc::new(Notify::new()),
        close_requested: Arc::new(AtomicBool::new(false)),
        state: Arc::new(Mutex::new(ChannelState::Connecting)),
    };
    let task = ChannelTask {
        machine: ChannelMachine::new(
            params.kind,
            params.handshake.clone(),
            params.subscribe_events.clone(),
        ),
        params,
        shutdown: handle.shutdown.clone(),
        shared_state: handle.state.clone(),
        events,
        stats,
    };
    tokio::spawn(task.run(outbound_rx));
    handle
}

struct ChannelTask {
    params: ChannelParams,
    machine: ChannelMachine,
    shutdown: Arc<Notify>,
    shared_state: Arc<Mutex<ChannelState>>,
    events: SessionEventSender,
    stats: Arc<ChannelStats>,
}

impl ChannelTask {
    async fn run(mut self, mut outbound: mpsc::UnboundedReceiver<Frame>) {
        let kind = self.params.kind;
        crate::logging::info_kv(
            "channel connecting",
            &[
                ("session", &self.params.session_id),
                ("channel", kind.as_str()),
                ("url", &self.params.url),
            ],
        );

        let connect = timeout(
            self.params.handshake_timeout,
            connect_async(self.params.url.as_str()),
        );
        let ws = tokio::select! {
            res = connect => match res {
                Ok(Ok((ws, _))) => ws,
                Ok(Err(err)) => {
                    self.finish(CloseReason::Failed(ChannelError::Transport(err.to_string())));
                    return;
                }
                Err(_) => {
                    self.finish(CloseReason::Failed(ChannelError::Transport(format!(
                        "connect timed out after {:?}",
                        self.params.handshake_timeout
                    ))));
                    return;
                }
            },
            _ = self.shutdown.notified() => {
                self.finish(CloseReason::Requested);
                return;
            }
        };
        let (mut write, mut read) = ws.split();

        let mut pending = self.machine.on_connected();
        let handshake_deadline = Instant::now() + self.params.handshake_timeout;
        let mut last_recv = Instant::now();

        let reason = 'session: loop {
            self.publish_state();
            for action in std::mem::take(&mut pending) {
                match action {
                    Action::Send(frame) => {
                        if let Err(err) = send_frame(&mut write, &frame).await {
                            break 'session CloseReason::Failed(ChannelError::Transport(
                                err.to_string(),
                            ));
                        }
                        if matches!(frame, Frame::KeepAliveResponse { .. }) {
                            self.stats.on_keep_alive();
                            crate::logging::debug_kv(
                                "keep-alive answered",
                                &[
                                    ("session", &self.params.session_id),
                                    ("channel", kind.as_str()),
                                ],
                            );
                        }
                    }
                    Action::OpenMedia(url) => {
                        self.emit(ChannelEvent::OpenMedia(url));
                    }
                    Action::MediaReady => {
                        self.emit(ChannelEvent::Ready);
                    }
                    Action::Deliver(chunk) => {
                        self.stats.on_media(chunk.payload.len());
                        self.emit(ChannelEvent::Media(chunk));
                    }
                    Action::Close(reason) => break 'session reason,
                }
            }

            let deadline = match self.machine.state() {
                ChannelState::AwaitingHandshakeAck => handshake_deadline,
                ChannelState::Ready => match self.params.idle_timeout {
                    Some(idle) => last_recv + idle,
                    None => Instant::now() + PARKED,
                },
                _ => Instant::now() + PARKED,
            };

            tokio::select! {
                _ = self.shutdown.notified() => break 'session CloseReason::Requested,
                out = outbound.recv() => match out {
                    Some(frame) => pending.push(Action::Send(frame)),
                    None => break 'session CloseReason::Requested,
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Close(_))) | None => break 'session CloseReason::PeerClosed,
                    Some(Ok(msg)) => {
                        last_recv = Instant::now();
                        pending = self.on_message(&msg);
                    }
                    Some(Err(err)) => {
                        let err = ChannelError::Transport(err.to_string());
                        break 'session CloseReason::Failed(err);
                    }
                },
                _ = sleep_until(deadline) => {
                    pending = match self.machine.state() {
                        ChannelState::AwaitingHandshakeAck => {
                            self.machine.on_handshake_timeout(self.params.handshake_timeout)
                        }
                        ChannelState::Ready => match self.params.idle_timeout {
                            Some(idle) => self.machine.on_idle_timeout(idle),
                            None => Vec::new(),
                        },
                        _ => Vec::new(),
                    };
                }
            }
        };

        self.machine.begin_close();
        self.publish_state();
        if !matches!(reason, CloseReason::PeerClosed) {
            let _ = timeout(CLOSE_FLUSH_TIMEOUT, write.send(Message::Close(None))).await;
        }
        let _ = timeout(CLOSE_FLUSH_TIMEOUT, write.close()).await;
        self.finish(reason);
    }

    fn on_message(&mut self, msg: &Message) -> Vec<Action> {
        let frame = match wsproto::decode_message(msg) {
            Some(frame) => frame,
            None => return Vec::new(),
        };
        self.stats.on_frame(msg.len());
        self.log_frame(&frame);
        let before = self.machine.state();
        let actions = self.machine.on_frame(frame);
        if before != ChannelState::Ready && self.machine.state() == ChannelState::Ready {
            crate::logging::info_kv(
                "channel ready",
                &[
                    ("session", &self.params.session_id),
                    ("channel", self.params.kind.as_str()),
                ],
            );
        }
        actions
    }

    fn log_frame(&self, frame: &Frame) {
        let session = self.params.session_id.as_str();
        let channel = self.params.kind.as_str();
        match frame {
            Frame::Unrecognized { msg_type, detail } => {
                self.stats.on_dropped();
                let tag = msg_type.map(|t| t.to_string()).unwrap_or_default();
                crate::logging::debug_kv(
                    "dropping unrecognized frame",
                    &[
                        ("session", session),
                        ("channel", channel),
                        ("msg_type", &tag),
                        ("detail", detail),
                    ],
                );
            }
            Frame::HandshakeResponse(resp) if !resp.is_success() => {
                let code = resp.status_code.to_string();
                crate::logging::warn_kv(
                    "handshake rejected",
                    &[
                        ("session", session),
                        ("channel", channel),
                        ("status_code", &code),
                        ("status", wsproto::status_name(resp.status_code)),
                        ("reason", &resp.reason),
                    ],
                );
            }
            Frame::StreamStateChanged { state, reason } => {
                crate::logging::info_kv(
                    "stream state changed",
                    &[
                        ("session", session),
                        ("state", wsproto::stream_state_name(*state)),
                        ("reason", wsproto::stop_reason_name(*reason)),
                    ],
                );
            }
            Frame::SessionStateChanged { state, stop_reason } => {
                crate::logging::info_kv(
                    "session state changed",
                    &[
                        ("session", session),
                        ("state", wsproto::session_state_name(*state)),
                        ("stop_reason", wsproto::stop_reason_name(*stop_reason)),
                    ],
                );
            }
            Frame::EventUpdate(ev) => {
                crate::logging::info_kv(
                    "event",
                    &[
                        ("session", session),
                        ("event", wsproto::event_type_name(ev.event_type)),
                        ("user_id", ev.user_id.as_deref().unwrap_or("")),
                        ("user_name", ev.user_name.as_deref().unwrap_or("")),
                    ],
                );
            }
            _ => {}
        }
    }

    fn emit(&self, event: ChannelEvent) {
        // The supervisor is gone once the session has been torn down.
        let _ = self.events.send((self.params.kind, event));
    }

    fn publish_state(&self) {
        let mut g = self.shared_state.lock().unwrap_or_else(|e| e.into_inner());
        *g = self.machine.state();
    }

    fn finish(&mut self, reason: CloseReason) {
        self.machine.begin_close();
        self.machine.finish_close();
        self.publish_state();
        let session = self.params.session_id.as_str();
        let channel = self.params.kind.as_str();
        let why = reason.to_string();
        match &reason {
            CloseReason::Failed(_) => {
                self.stats.set_last_error(&why);
                crate::logging::error_kv(
                    "channel closed",
                    &[("session", session), ("channel", channel), ("reason", &why)],
                );
            }
            _ => crate::logging::info_kv(
                "channel closed",
                &[("session", session), ("channel", channel), ("reason", &why)],
            ),
        }
        self.emit(ChannelEvent::Closed(reason));
    }
}

async fn send_frame<S>(write: &mut S, frame: &Frame) -> anyhow::Result<()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = wsproto::encode(frame)?;
    write.send(Message::Text(text)).await?;
    Ok(())
}
