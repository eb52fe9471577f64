use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::session::MediaBuffer;
use crate::wsproto::{MediaChunk, MediaKind};

/// Downstream consumer of a session's media, called once when the session ends.
pub trait MediaSink: Send + Sync {
    fn deliver(&self, session_id: &str, media: MediaBuffer) -> Result<()>;
}

/// Drops everything. Used when no data directory is wanted.
pub struct DiscardSink;

impl MediaSink for DiscardSink {
    fn deliver(&self, _session_id: &str, _media: MediaBuffer) -> Result<()> {
        Ok(())
    }
}

/// Appends each media kind to its own file under `<root>/<session>/`.
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(sanitize_session_id(session_id))
    }
}

pub fn file_name(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "audio.raw",
        MediaKind::Video => "video.raw",
        MediaKind::Deskshare => "deskshare.raw",
        MediaKind::Transcript => "transcript.txt",
        MediaKind::Chat => "chat.txt",
    }
}

impl MediaSink for FileSink {
    fn deliver(&self, session_id: &str, media: MediaBuffer) -> Result<()> {
        if media.is_empty() {
            return Ok(());
        }
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        for kind in MediaKind::ALL {
            let mut chunks = media.of_kind(kind).peekable();
            if chunks.peek().is_none() {
                continue;
            }
            let mut out = Vec::new();
            for chunk in chunks {
                if kind.is_text() {
                    out.extend_from_slice(text_line(chunk).as_bytes());
                } else {
                    out.extend_from_slice(&chunk.payload);
                }
            }
            let path = dir.join(file_name(kind));
            append(&path, &out)?;
        }
        crate::logging::info_kv(
            "media written",
            &[
                ("session", session_id),
                ("dir", &dir.display().to_string()),
                ("chunks", &media.len().to_string()),
                ("bytes", &media.total_bytes().to_string()),
            ],
        );
        Ok(())
    }
}

fn append(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    f.write_all(bytes)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn text_line(chunk: &MediaChunk) -> String {
    let ts = chunk
        .timestamp
        .as_ref()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "-".to_string());
    let who = chunk.user_name.as_deref().unwrap_or("unknown");
    let text = String::from_utf8_lossy(&chunk.payload);
    format!("{ts} {who}: {}\n", text.trim_end())
}

/// Meeting ids may contain `/`, `+` and `=`; keep them out of the path.
pub fn sanitize_session_id(session_id: &str) -> String {
    let mut out: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    out
}
