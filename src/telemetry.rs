use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Process-wide counters for channel traffic.
#[derive(Default)]
pub struct ChannelStats {
    frames_recv: AtomicI64,
    bytes_recv: AtomicI64,
    frames_dropped: AtomicI64,
    keep_alives: AtomicI64,
    media_bytes: AtomicI64,
    last_error: Mutex<Option<String>>,
}

impl ChannelStats {
    pub fn on_frame(&self, n: usize) {
        self.frames_recv.fetch_add(1, Ordering::Relaxed);
        self.bytes_recv.fetch_add(n as i64, Ordering::Relaxed);
    }

    pub fn on_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_keep_alive(&self) {
        self.keep_alives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_media(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.media_bytes.fetch_add(n as i64, Ordering::Relaxed);
    }

    pub fn set_last_error(&self, err: impl ToString) {
        let mut g = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        *g = Some(err.to_string());
    }

    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        let last_error = self
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default();
        ChannelStatsSnapshot {
            frames_recv_total: self.frames_recv.load(Ordering::Relaxed),
            bytes_recv_total: self.bytes_recv.load(Ordering::Relaxed),
            frames_dropped_total: self.frames_dropped.load(Ordering::Relaxed),
            keep_alives_total: self.keep_alives.load(Ordering::Relaxed),
            media_bytes_total: self.media_bytes.load(Ordering::Relaxed),
            last_error,
        }
    }
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct ChannelStatsSnapshot {
    pub frames_recv_total: i64,
    pub bytes_recv_total: i64,
    pub frames_dropped_total: i64,
    pub keep_alives_total: i64,
    pub media_bytes_total: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_error: String,
}
