use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use url::Url;
use uuid::Uuid;

use crate::channel::{
    spawn_channel, ChannelEvent, ChannelParams, ChannelState, SessionEventReceiver,
};
use crate::config::Config;
use crate::error::CloseReason;
use crate::session::{
    lock_record, MediaBuffer, SessionRecord, SessionRegistry, SessionSummary, SharedRecord,
};
use crate::signature;
use crate::sink::MediaSink;
use crate::telemetry::ChannelStats;
use crate::wsproto::{ChannelKind, Frame, HandshakeRequest, MediaParams, PROTOCOL_VERSION};

/// Per-process values every session's handshakes and channels are built from.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub client_id: String,
    pub client_secret: String,
    pub media: MediaParams,
    pub subscribe_events: Vec<u32>,
    pub handshake_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl SessionSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            media: cfg.media.clone(),
            subscribe_events: cfg.subscribe_events.clone(),
            handshake_timeout: cfg.handshake_timeout(),
            idle_timeout: cfg.idle_timeout(),
            reconnect_attempts: cfg.reconnect_attempts,
            reconnect_delay: cfg.reconnect_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A record for the session already exists; nothing was opened.
    Duplicate,
    /// Missing identifiers or a non-websocket signaling url.
    Invalid,
}

/// Owns every session's channel pair and the hand-offs between them.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    settings: SessionSettings,
    registry: SessionRegistry,
    sink: Arc<dyn MediaSink>,
    stats: Arc<ChannelStats>,
}

impl Coordinator {
    pub fn new(
        settings: SessionSettings,
        registry: SessionRegistry,
        sink: Arc<dyn MediaSink>,
        stats: Arc<ChannelStats>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                settings,
                registry,
                sink,
                stats,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn stats(&self) -> &Arc<ChannelStats> {
        &self.inner.stats
    }

    /// Must be called from within a tokio runtime. Never waits on the network.
    pub fn on_session_start(
        &self,
        session_id: &str,
        stream_id: &str,
        signaling_url: &str,
    ) -> StartOutcome {
        if session_id.trim().is_empty() || stream_id.trim().is_empty() {
            crate::logging::warn_kv(
                "session start missing identifiers",
                &[("session", session_id), ("stream", stream_id)],
            );
            return StartOutcome::Invalid;
        }
        if !is_websocket_url(signaling_url) {
            crate::logging::warn_kv(
                "session start with invalid signaling url",
                &[("session", session_id), ("url", signaling_url)],
            );
            return StartOutcome::Invalid;
        }

        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let record: SharedRecord = Arc::new(Mutex::new(SessionRecord::new(
            session_id,
            stream_id,
            signaling_url,
            events_tx.clone(),
        )));
        // Held across registration so a racing stop sees the signaling handle.
        let mut guard = lock_record(&record);
        if !self.inner.registry.insert_if_absent(session_id, record.clone()) {
            crate::logging::info_kv(
                "duplicate session start ignored",
                &[("session", session_id)],
            );
            return StartOutcome::Duplicate;
        }
        let params =
            self.channel_params(ChannelKind::Signaling, session_id, stream_id, signaling_url);
        guard.signaling = Some(spawn_channel(
            params,
            events_tx,
            self.inner.stats.clone(),
        ));
        drop(guard);

        tokio::spawn(self.clone().supervise(Arc::downgrade(&record), events_rx));
        crate::logging::info_kv(
            "session started",
            &[("session", session_id), ("stream", stream_id), ("url", signaling_url)],
        );
        StartOutcome::Started
    }

    /// Open the media channel for a session whose signaling handshake succeeded.
    pub fn on_media_ready(&self, session_id: &str, media_url: &str) {
        match self.inner.registry.get(session_id) {
            Some(record) => self.open_media(&record, media_url),
            None => crate::logging::debug_kv(
                "media ready for unknown session",
                &[("session", session_id)],
            ),
        }
    }

    /// Returns false when no session was registered under `session_id`.
    pub fn on_session_stop(&self, session_id: &str) -> bool {
        match self.inner.registry.remove(session_id) {
            Some(record) => self.teardown(&record, "stop requested"),
            None => {
                crate::logging::info_kv(
                    "stop for unknown session ignored",
                    &[("session", session_id)],
                );
                false
            }
        }
    }

    /// Take the media buffered so far without ending the session.
    pub fn drain_media(&self, session_id: &str) -> Option<MediaBuffer> {
        let record = self.inner.registry.get(session_id)?;
        let mut g = lock_record(&record);
        Some(g.media_buffer.take())
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .inner
            .registry
            .records()
            .iter()
            .map(|r| lock_record(r).summary())
            .collect();
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        out
    }

    pub fn stop_all(&self) -> usize {
        self.inner
            .registry
            .ids()
            .iter()
            .filter(|id| self.on_session_stop(id))
            .count()
    }

    async fn supervise(self, record: Weak<Mutex<SessionRecord>>, mut events: SessionEventReceiver) {
        while let Some((kind, event)) = events.recv().await {
            let Some(record) = record.upgrade() else {
                break;
            };
            self.handle_event(&record, kind, event);
        }
    }

    fn handle_event(&self, record: &SharedRecord, kind: ChannelKind, event: ChannelEvent) {
        match event {
            ChannelEvent::OpenMedia(url) => {
                let media_ready = {
                    let mut g = lock_record(record);
                    g.signaling_reconnects = 0;
                    g.media.as_ref().map(|m| m.state()) == Some(ChannelState::Ready)
                };
                if media_ready {
                    // Signaling came back under a live media channel; it needs the ack again.
                    self.send_ready_ack(record);
                } else {
                    self.open_media(record, &url);
                }
            }
            ChannelEvent::Ready => {
                if kind == ChannelKind::Media {
                    lock_record(record).media_reconnects = 0;
                    self.send_ready_ack(record);
                }
            }
            ChannelEvent::Media(chunk) => {
                let mut g = lock_record(record);
                if !g.closed {
                    g.media_buffer.push(chunk);
                }
            }
            ChannelEvent::Closed(reason) => self.on_channel_closed(record, kind, reason),
        }
    }

    fn open_media(&self, record: &SharedRecord, media_url: &str) {
        let mut g = lock_record(record);
        if g.closed {
            return;
        }
        if g.media.is_some() {
            crate::logging::debug_kv(
                "media channel already open",
                &[("session", &g.session_id)],
            );
            return;
        }
        if g.signaling.is_none() {
            return;
        }
        if !is_websocket_url(media_url) {
            crate::logging::warn_kv(
                "invalid media url",
                &[("session", &g.session_id), ("url", media_url)],
            );
            return;
        }
        let params =
            self.channel_params(ChannelKind::Media, &g.session_id, &g.stream_id, media_url);
        let handle = spawn_channel(params, g.events.clone(), self.inner.stats.clone());
        g.media_url = Some(media_url.to_string());
        g.media = Some(handle);
    }

    /// Sent at most once per session, and only while signaling is Ready.
    fn send_ready_ack(&self, record: &SharedRecord) {
        let mut g = lock_record(record);
        if g.closed || g.ready_ack_sent {
            return;
        }
        let signaling_state = g.signaling.as_ref().map(|s| s.state());
        if signaling_state != Some(ChannelState::Ready) {
            crate::logging::warn_kv(
                "signaling not ready, client ready ack withheld",
                &[("session", &g.session_id)],
            );
            return;
        }
        let ack = Frame::ClientReadyAck {
            rtms_stream_id: g.stream_id.clone(),
        };
        let sent = g.signaling.as_ref().map(|s| s.send(ack)).unwrap_or(false);
        if sent {
            g.ready_ack_sent = true;
            crate::logging::info_kv("client ready ack sent", &[("session", &g.session_id)]);
        }
    }

    fn on_channel_closed(&self, record: &SharedRecord, kind: ChannelKind, reason: CloseReason) {
        let retry = {
            let mut g = lock_record(record);
            match kind {
                ChannelKind::Signaling => g.signaling = None,
                ChannelKind::Media => g.media = None,
            }
            if reason.is_requested() || g.closed {
                return;
            }
            let limit = self.inner.settings.reconnect_attempts;
            let used = g.reconnects_mut(kind);
            let attempt = if reason.is_retryable() && *used < limit {
                *used += 1;
                Some(*used)
            } else {
                None
            };
            attempt.map(|n| (g.session_id.clone(), n))
        };
        match retry {
            Some((session_id, attempt)) => {
                crate::logging::warn_kv(
                    "channel dropped, reconnecting",
                    &[
                        ("session", &session_id),
                        ("channel", kind.as_str()),
                        ("reason", &reason.to_string()),
                        ("attempt", &attempt.to_string()),
                    ],
                );
                self.schedule_reconnect(record, kind);
            }
            None => {
                let why = format!("{} channel closed: {reason}", kind.as_str());
                self.teardown(record, &why);
            }
        }
    }

    fn schedule_reconnect(&self, record: &SharedRecord, kind: ChannelKind) {
        let coord = self.clone();
        let record = Arc::downgrade(record);
        let delay = self.inner.settings.reconnect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(record) = record.upgrade() {
                coord.reconnect(&record, kind);
            }
        });
    }

    /// Reopen one channel kind with a fresh handshake. A stop that landed
    /// while the delay ran wins.
    fn reconnect(&self, record: &SharedRecord, kind: ChannelKind) {
        let mut g = lock_record(record);
        if g.closed {
            return;
        }
        let url = match kind {
            ChannelKind::Signaling if g.signaling.is_none() => g.signaling_url.clone(),
            ChannelKind::Media if g.media.is_none() => match g.media_url.clone() {
                Some(url) => url,
                None => return,
            },
            _ => return,
        };
        let params = self.channel_params(kind, &g.session_id, &g.stream_id, &url);
        let handle = spawn_channel(params, g.events.clone(), self.inner.stats.clone());
        match kind {
            ChannelKind::Signaling => g.signaling = Some(handle),
            ChannelKind::Media => g.media = Some(handle),
        }
        g.ready_ack_sent = false;
        crate::logging::info_kv(
            "channel reconnecting",
            &[("session", &g.session_id), ("channel", kind.as_str()), ("url", &url)],
        );
    }

    /// Close both channels and hand media off exactly once per record.
    fn teardown(&self, record: &SharedRecord, why: &str) -> bool {
        let (session_id, media, channels) = {
            let mut g = lock_record(record);
            if g.closed {
                return false;
            }
            g.closed = true;
            let channels = [g.signaling.take(), g.media.take()];
            (g.session_id.clone(), g.media_buffer.take(), channels)
        };
        self.inner.registry.remove_if_same(&session_id, record);
        for channel in channels.iter().flatten() {
            channel.close();
        }
        crate::logging::info_kv(
            "session stopped",
            &[
                ("session", &session_id),
                ("reason", why),
                ("chunks", &media.len().to_string()),
            ],
        );
        self.hand_off(session_id, media);
        true
    }

    /// Sinks may block on disk, so delivery runs on the blocking pool when
    /// a runtime is available.
    fn hand_off(&self, session_id: String, media: MediaBuffer) {
        let sink = self.inner.sink.clone();
        let deliver = move || {
            if let Err(err) = sink.deliver(&session_id, media) {
                crate::logging::error_kv(
                    "media hand-off failed",
                    &[("session", &session_id), ("error", &format!("{err:#}"))],
                );
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn_blocking(deliver);
            }
            Err(_) => deliver(),
        }
    }

    fn channel_params(
        &self,
        kind: ChannelKind,
        session_id: &str,
        stream_id: &str,
        url: &str,
    ) -> ChannelParams {
        let s = &self.inner.settings;
        ChannelParams {
            kind,
            session_id: session_id.to_string(),
            url: url.to_string(),
            handshake: self.handshake(kind, session_id, stream_id),
            subscribe_events: match kind {
                ChannelKind::Signaling => s.subscribe_events.clone(),
                ChannelKind::Media => Vec::new(),
            },
            handshake_timeout: s.handshake_timeout,
            idle_timeout: s.idle_timeout,
        }
    }

    fn handshake(&self, kind: ChannelKind, session_id: &str, stream_id: &str) -> Frame {
        let s = &self.inner.settings;
        Frame::HandshakeRequest(HandshakeRequest {
            channel: kind,
            protocol_version: PROTOCOL_VERSION,
            meeting_uuid: session_id.to_string(),
            rtms_stream_id: stream_id.to_string(),
            signature: signature::sign(&s.client_id, session_id, stream_id, &s.client_secret),
            sequence: match kind {
                ChannelKind::Signaling => Some(next_sequence()),
                ChannelKind::Media => None,
            },
            media: match kind {
                ChannelKind::Signaling => None,
                ChannelKind::Media => Some(s.media.clone()),
            },
        })
    }
}

fn next_sequence() -> u64 {
    (Uuid::new_v4().as_u128() % 1_000_000_000) as u64
}

pub fn is_websocket_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "ws" | "wss") && url.host_str().is_some(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::wsproto::{MediaChunk, MediaKind};

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(String, MediaBuffer)>>,
    }

    impl MediaSink for RecordingSink {
        fn deliver(&self, session_id: &str, media: MediaBuffer) -> anyhow::Result<()> {
            self.delivered
                .lock()
                .unwrap()
                .push((session_id.to_string(), media));
            Ok(())
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            media: MediaParams::default(),
            subscribe_events: Vec::new(),
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: None,
            reconnect_attempts: 0,
            reconnect_delay: Duration::from_millis(10),
        }
    }

    fn coordinator() -> (Coordinator, Arc<RecordingSink>) {
        coordinator_with(settings())
    }

    fn coordinator_with(settings: SessionSettings) -> (Coordinator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let coord = Coordinator::new(
            settings,
            SessionRegistry::new(),
            sink.clone(),
            Arc::new(ChannelStats::default()),
        );
        (coord, sink)
    }

    fn retrying(attempts: u32, delay: Duration) -> SessionSettings {
        SessionSettings {
            reconnect_attempts: attempts,
            reconnect_delay: delay,
            ..settings()
        }
    }

    // Hand-off runs on the blocking pool; poll until `n` deliveries landed.
    async fn deliveries(sink: &RecordingSink, n: usize) -> Vec<(String, MediaBuffer)> {
        for _ in 0..250 {
            {
                let delivered = sink.delivered.lock().unwrap();
                if delivered.len() >= n {
                    return delivered.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        sink.delivered.lock().unwrap().clone()
    }

    async fn eventually(mut f: impl FnMut() -> bool) -> bool {
        for _ in 0..250 {
            if f() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    // Accepts TCP but never answers the websocket upgrade, so channels stay
    // in Connecting for the length of a test.
    fn silent_peer() -> (std::net::TcpListener, String) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    fn audio(payload: &[u8]) -> MediaChunk {
        MediaChunk {
            kind: MediaKind::Audio,
            payload: payload.to_vec(),
            timestamp: None,
            user_id: None,
            user_name: None,
        }
    }

    #[test]
    fn websocket_url_check() {
        assert!(is_websocket_url("wss://example.zoom.us/signal"));
        assert!(is_websocket_url("ws://127.0.0.1:9000"));
        assert!(!is_websocket_url("https://example.com"));
        assert!(!is_websocket_url("not a url"));
        assert!(!is_websocket_url(""));
    }

    #[test]
    fn handshake_carries_signature_and_media_params() {
        let (coord, _) = coordinator();
        let expected = signature::sign("cid", "m1", "s1", "secret");
        match coord.handshake(ChannelKind::Signaling, "m1", "s1") {
            Frame::HandshakeRequest(req) => {
                assert_eq!(req.signature, expected);
                assert!(req.sequence.is_some());
                assert!(req.media.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        match coord.handshake(ChannelKind::Media, "m1", "s1") {
            Frame::HandshakeRequest(req) => {
                assert_eq!(req.signature, expected);
                assert!(req.sequence.is_none());
                assert_eq!(req.media, Some(MediaParams::default()));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_start_creates_nothing() {
        let (coord, _) = coordinator();
        assert_eq!(
            coord.on_session_start("", "s1", "wss://x"),
            StartOutcome::Invalid
        );
        assert_eq!(
            coord.on_session_start("m1", "s1", "https://x"),
            StartOutcome::Invalid
        );
        assert!(coord.registry().is_empty());
    }

    #[tokio::test]
    async fn duplicate_start_keeps_one_record() {
        let (_peer, url) = silent_peer();
        let (coord, _) = coordinator();
        assert_eq!(coord.on_session_start("m1", "s1", &url), StartOutcome::Started);
        assert_eq!(coord.on_session_start("m1", "s1", &url), StartOutcome::Duplicate);
        assert_eq!(coord.registry().len(), 1);
        assert!(coord.on_session_stop("m1"));
    }

    #[tokio::test]
    async fn stop_unknown_session_is_a_no_op() {
        let (coord, sink) = coordinator();
        assert!(!coord.on_session_stop("nope"));
        assert!(sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_hands_off_media_once() {
        let (_peer, url) = silent_peer();
        let (coord, sink) = coordinator();
        coord.on_session_start("m1", "s1", &url);
        let record = coord.registry().get("m1").unwrap();
        coord.handle_event(&record, ChannelKind::Media, ChannelEvent::Media(audio(b"ab")));
        coord.handle_event(&record, ChannelKind::Media, ChannelEvent::Media(audio(b"cd")));

        assert!(coord.on_session_stop("m1"));
        assert!(!coord.on_session_stop("m1"));
        assert!(coord.registry().is_empty());
        assert!(lock_record(&record).signaling.is_none());

        // Late media after teardown is discarded.
        coord.handle_event(&record, ChannelKind::Media, ChannelEvent::Media(audio(b"ef")));

        let delivered = deliveries(&sink, 1).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "m1");
        assert_eq!(delivered[0].1.bytes(MediaKind::Audio), b"abcd".to_vec());
    }

    #[tokio::test]
    async fn drain_media_empties_live_buffer() {
        let (_peer, url) = silent_peer();
        let (coord, sink) = coordinator();
        coord.on_session_start("m1", "s1", &url);
        let record = coord.registry().get("m1").unwrap();
        coord.handle_event(&record, ChannelKind::Media, ChannelEvent::Media(audio(b"xy")));

        let drained = coord.drain_media("m1").unwrap();
        assert_eq!(drained.total_bytes(), 2);
        assert!(coord.drain_media("m1").unwrap().is_empty());
        assert!(coord.drain_media("other").is_none());

        coord.on_session_stop("m1");
        let delivered = deliveries(&sink, 1).await;
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].1.is_empty());
    }

    #[tokio::test]
    async fn channel_failure_tears_down_session() {
        let (_peer, url) = silent_peer();
        let (coord, sink) = coordinator();
        coord.on_session_start("m1", "s1", &url);
        let record = coord.registry().get("m1").unwrap();
        coord.handle_event(
            &record,
            ChannelKind::Signaling,
            ChannelEvent::Closed(CloseReason::Failed(ChannelError::Transport("reset".into()))),
        );
        assert!(coord.registry().is_empty());
        assert!(lock_record(&record).closed);
        assert!(!coord.on_session_stop("m1"));
        assert_eq!(deliveries(&sink, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn rejected_handshake_is_never_retried() {
        let (_peer, url) = silent_peer();
        let (coord, sink) = coordinator_with(retrying(3, Duration::from_millis(10)));
        coord.on_session_start("m1", "s1", &url);
        let record = coord.registry().get("m1").unwrap();
        let rejected = ChannelError::HandshakeRejected {
            status_code: 15,
            reason: "bad".into(),
        };
        coord.handle_event(
            &record,
            ChannelKind::Signaling,
            ChannelEvent::Closed(CloseReason::Failed(rejected)),
        );
        assert!(coord.registry().is_empty());
        assert!(lock_record(&record).closed);
        assert_eq!(lock_record(&record).signaling_reconnects, 0);
        assert_eq!(deliveries(&sink, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn dropped_signaling_reconnects_until_attempts_run_out() {
        let (_peer, url) = silent_peer();
        let (coord, sink) = coordinator_with(retrying(1, Duration::from_millis(10)));
        coord.on_session_start("m1", "s1", &url);
        let record = coord.registry().get("m1").unwrap();
        lock_record(&record).ready_ack_sent = true;

        coord.handle_event(
            &record,
            ChannelKind::Signaling,
            ChannelEvent::Closed(CloseReason::PeerClosed),
        );
        assert!(coord.registry().contains("m1"));
        assert!(!lock_record(&record).closed);
        assert_eq!(lock_record(&record).signaling_reconnects, 1);
        assert!(eventually(|| lock_record(&record).signaling.is_some()).await);
        {
            let g = lock_record(&record);
            assert_eq!(g.signaling.as_ref().map(|s| s.url()), Some(url.as_str()));
            assert!(!g.ready_ack_sent);
        }

        coord.handle_event(
            &record,
            ChannelKind::Signaling,
            ChannelEvent::Closed(CloseReason::Failed(ChannelError::Transport("reset".into()))),
        );
        assert!(coord.registry().is_empty());
        assert!(lock_record(&record).closed);
        assert_eq!(deliveries(&sink, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn stop_cancels_pending_reconnect() {
        let (_peer, url) = silent_peer();
        let (coord, sink) = coordinator_with(retrying(3, Duration::from_millis(100)));
        coord.on_session_start("m1", "s1", &url);
        let record = coord.registry().get("m1").unwrap();
        coord.handle_event(
            &record,
            ChannelKind::Signaling,
            ChannelEvent::Closed(CloseReason::PeerClosed),
        );
        assert!(coord.on_session_stop("m1"));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(lock_record(&record).signaling.is_none());
        assert!(coord.registry().is_empty());
        assert_eq!(deliveries(&sink, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn media_reconnect_reuses_media_url_and_rearms_ack() {
        let (_peer, url) = silent_peer();
        let (coord, _) = coordinator();
        coord.on_session_start("m1", "s1", &url);
        coord.on_media_ready("m1", &url);
        let record = coord.registry().get("m1").unwrap();
        {
            let mut g = lock_record(&record);
            g.media = None;
            g.ready_ack_sent = true;
        }
        coord.reconnect(&record, ChannelKind::Media);
        let g = lock_record(&record);
        assert_eq!(g.media.as_ref().map(|m| m.url()), Some(url.as_str()));
        assert!(!g.ready_ack_sent);
        drop(g);

        // An occupied slot is left alone.
        let before = lock_record(&record).media.as_ref().map(|m| m.url().to_string());
        coord.reconnect(&record, ChannelKind::Media);
        assert_eq!(
            lock_record(&record).media.as_ref().map(|m| m.url().to_string()),
            before
        );
        coord.on_session_stop("m1");
    }

    struct GatedSink {
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
        delivered: Mutex<Vec<String>>,
    }

    impl MediaSink for GatedSink {
        fn deliver(&self, session_id: &str, _media: MediaBuffer) -> anyhow::Result<()> {
            let _ = self.gate.lock().unwrap().recv();
            self.delivered.lock().unwrap().push(session_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_sink_does_not_hold_up_stop() {
        let (_peer, url) = silent_peer();
        let (release, gate) = std::sync::mpsc::channel();
        let sink = Arc::new(GatedSink {
            gate: Mutex::new(gate),
            delivered: Mutex::new(Vec::new()),
        });
        let coord = Coordinator::new(
            settings(),
            SessionRegistry::new(),
            sink.clone(),
            Arc::new(ChannelStats::default()),
        );
        coord.on_session_start("m1", "s1", &url);
        // Returns while the sink is still parked on the gate.
        assert!(coord.on_session_stop("m1"));
        assert!(sink.delivered.lock().unwrap().is_empty());

        release.send(()).unwrap();
        assert!(eventually(|| sink.delivered.lock().unwrap().len() == 1).await);
    }

    #[tokio::test]
    async fn requested_close_only_clears_handle() {
        let (_peer, url) = silent_peer();
        let (coord, sink) = coordinator();
        coord.on_session_start("m1", "s1", &url);
        let record = coord.registry().get("m1").unwrap();
        coord.handle_event(
            &record,
            ChannelKind::Signaling,
            ChannelEvent::Closed(CloseReason::Requested),
        );
        assert!(coord.registry().contains("m1"));
        assert!(lock_record(&record).signaling.is_none());
        assert!(sink.delivered.lock().unwrap().is_empty());
        coord.on_session_stop("m1");
    }

    #[tokio::test]
    async fn ready_ack_withheld_until_signaling_ready() {
        let (_peer, url) = silent_peer();
        let (coord, _) = coordinator();
        coord.on_session_start("m1", "s1", &url);
        let record = coord.registry().get("m1").unwrap();
        coord.handle_event(&record, ChannelKind::Media, ChannelEvent::Ready);
        assert!(!lock_record(&record).ready_ack_sent);
        coord.on_session_stop("m1");
    }

    #[tokio::test]
    async fn media_opens_once_and_not_after_stop() {
        let (_peer, url) = silent_peer();
        let (coord, _) = coordinator();
        coord.on_session_start("m1", "s1", &url);
        coord.on_media_ready("m1", &url);
        let record = coord.registry().get("m1").unwrap();
        let first_url = lock_record(&record).media.as_ref().map(|m| m.url().to_string());
        assert_eq!(first_url.as_deref(), Some(url.as_str()));

        coord.on_media_ready("m1", "ws://127.0.0.1:1");
        assert_eq!(
            lock_record(&record).media.as_ref().map(|m| m.url().to_string()),
            first_url
        );

        coord.on_session_stop("m1");
        coord.handle_event(&record, ChannelKind::Signaling, ChannelEvent::OpenMedia(url));
        assert!(lock_record(&record).media.is_none());
    }

    #[tokio::test]
    async fn sessions_lists_live_records() {
        let (_peer, url) = silent_peer();
        let (coord, _) = coordinator();
        coord.on_session_start("b", "s1", &url);
        coord.on_session_start("a", "s2", &url);
        let ids: Vec<String> = coord.sessions().into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(coord.stop_all(), 2);
        assert!(coord.sessions().is_empty());
    }
}
