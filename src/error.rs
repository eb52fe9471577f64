use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Why a channel left the handshake or ready states involuntarily.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Connect, read or write failure on the websocket.
    #[error("transport error: {0}")]
    Transport(String),

    /// Handshake response carried a non-zero status code.
    #[error("handshake rejected: status_code={status_code} reason={reason}")]
    HandshakeRejected { status_code: i64, reason: String },

    #[error("handshake not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("no traffic for {0:?}")]
    IdleTimeout(Duration),

    /// Signaling server reported the stream as terminated.
    #[error("stream terminated: reason={reason}")]
    StreamTerminated { reason: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Close asked for by the coordinator (stop notification or sibling teardown).
    Requested,
    /// The peer closed the websocket.
    PeerClosed,
    Failed(ChannelError),
}

impl CloseReason {
    pub fn is_requested(&self) -> bool {
        matches!(self, CloseReason::Requested)
    }

    /// Drops worth reconnecting after. Rejections and terminations are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloseReason::PeerClosed
                | CloseReason::Failed(ChannelError::Transport(_))
                | CloseReason::Failed(ChannelError::IdleTimeout(_))
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("requested"),
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::Failed(err) => write!(f, "{err}"),
        }
    }
}

impl From<ChannelError> for CloseReason {
    fn from(err: ChannelError) -> Self {
        CloseReason::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_drops_are_retryable() {
        assert!(CloseReason::PeerClosed.is_retryable());
        assert!(CloseReason::from(ChannelError::Transport("reset".into())).is_retryable());
        let idle = ChannelError::IdleTimeout(Duration::from_secs(60));
        assert!(CloseReason::from(idle).is_retryable());

        assert!(!CloseReason::Requested.is_retryable());
        let rejected = ChannelError::HandshakeRejected {
            status_code: 15,
            reason: "bad".into(),
        };
        assert!(!CloseReason::from(rejected).is_retryable());
        assert!(!CloseReason::from(ChannelError::StreamTerminated { reason: 6 }).is_retryable());
        assert!(
            !CloseReason::from(ChannelError::HandshakeTimeout(Duration::from_secs(10)))
                .is_retryable()
        );
    }
}
