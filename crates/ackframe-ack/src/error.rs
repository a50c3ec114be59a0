use std::time::Duration;

use ackframe_frame::FrameError;

/// Errors returned by the request processor.
#[derive(Debug, thiserror::Error)]
pub enum AckError {
    /// Every idempotency key of this message type has been handed out.
    #[error("idempotency key space exhausted")]
    KeySpaceExhausted,

    /// No response arrived within the caller's deadline.
    #[error("no response after {0:?}")]
    Timeout(Duration),

    /// The key has no pending request and no uncollected response.
    #[error("no pending request with key {0}")]
    UnknownKey(u32),

    /// The outgoing queue is gone.
    #[error("outbox disconnected")]
    Disconnected,

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, AckError>;
