use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channel::{ChannelHandle, ChannelState, SessionEventSender};
use crate::wsproto::{ChannelKind, MediaChunk, MediaKind};

/// Media received for one session, in arrival order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MediaBuffer {
    chunks: Vec<MediaChunk>,
}

impl MediaBuffer {
    pub fn push(&mut self, chunk: MediaChunk) {
        self.chunks.push(chunk);
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.payload.len()).sum()
    }

    pub fn chunks(&self) -> &[MediaChunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<MediaChunk> {
        self.chunks
    }

    pub fn of_kind(&self, kind: MediaKind) -> impl Iterator<Item = &MediaChunk> {
        self.chunks.iter().filter(move |c| c.kind == kind)
    }

    /// Concatenated payloads of one kind.
    pub fn bytes(&self, kind: MediaKind) -> Vec<u8> {
        let mut out = Vec::new();
        for c in self.of_kind(kind) {
            out.extend_from_slice(&c.payload);
        }
        out
    }

    /// Hand everything accumulated so far to the caller, leaving this empty.
    pub fn take(&mut self) -> MediaBuffer {
        std::mem::take(self)
    }
}

pub struct SessionRecord {
    pub session_id: String,
    pub stream_id: String,
    pub signaling_url: String,
    pub media_url: Option<String>,
    pub signaling: Option<ChannelHandle>,
    pub media: Option<ChannelHandle>,
    pub media_buffer: MediaBuffer,
    pub ready_ack_sent: bool,
    /// Reconnects used since each channel kind last completed its handshake.
    pub signaling_reconnects: u32,
    pub media_reconnects: u32,
    /// Set once teardown starts. Nothing is attached or appended afterwards.
    pub closed: bool,
    pub started_at: DateTime<Utc>,
    pub(crate) events: SessionEventSender,
}

impl SessionRecord {
    pub fn new(
        session_id: &str,
        stream_id: &str,
        signaling_url: &str,
        events: SessionEventSender,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            stream_id: stream_id.to_string(),
            signaling_url: signaling_url.to_string(),
            media_url: None,
            signaling: None,
            media: None,
            media_buffer: MediaBuffer::default(),
            ready_ack_sent: false,
            signaling_reconnects: 0,
            media_reconnects: 0,
            closed: false,
            started_at: Utc::now(),
            events,
        }
    }

    pub fn reconnects_mut(&mut self, kind: ChannelKind) -> &mut u32 {
        match kind {
            ChannelKind::Signaling => &mut self.signaling_reconnects,
            ChannelKind::Media => &mut self.media_reconnects,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            stream_id: self.stream_id.clone(),
            started_at: self.started_at,
            signaling: self.signaling.as_ref().map(ChannelHandle::state),
            media: self.media.as_ref().map(ChannelHandle::state),
            ready_ack_sent: self.ready_ack_sent,
            reconnects: self.signaling_reconnects + self.media_reconnects,
            buffered_chunks: self.media_buffer.len(),
            buffered_bytes: self.media_buffer.total_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub stream_id: String,
    pub started_at: DateTime<Utc>,
    pub signaling: Option<ChannelState>,
    pub media: Option<ChannelState>,
    pub ready_ack_sent: bool,
    pub reconnects: u32,
    pub buffered_chunks: usize,
    pub buffered_bytes: usize,
}

pub type SharedRecord = Arc<Mutex<SessionRecord>>;

pub fn lock_record(record: &SharedRecord) -> MutexGuard<'_, SessionRecord> {
    record.lock().unwrap_or_else(|e| e.into_inner())
}

/// Live sessions keyed by session id. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, SharedRecord>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, SharedRecord>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// False when a record for `session_id` is already present.
    pub fn insert_if_absent(&self, session_id: &str, record: SharedRecord) -> bool {
        let mut map = self.map();
        if map.contains_key(session_id) {
            return false;
        }
        map.insert(session_id.to_string(), record);
        true
    }

    pub fn get(&self, session_id: &str) -> Option<SharedRecord> {
        self.map().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.map().contains_key(session_id)
    }

    pub fn remove(&self, session_id: &str) -> Option<SharedRecord> {
        self.map().remove(session_id)
    }

    /// Remove only if the stored record is `record` itself, not a later one
    /// registered under the same id.
    pub fn remove_if_same(&self, session_id: &str, record: &SharedRecord) -> bool {
        let mut map = self.map();
        match map.get(session_id) {
            Some(current) if Arc::ptr_eq(current, record) => {
                map.remove(session_id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.map().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of the current records; callers lock each one outside the map lock.
    pub fn records(&self) -> Vec<SharedRecord> {
        self.map().values().cloned().collect()
    }
}
