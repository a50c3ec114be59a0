/// Errors that can occur during frame and message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The tag is already bound to a message type.
    #[error("tag {tag} is already registered (to {existing})")]
    DuplicateTag { tag: u8, existing: &'static str },

    /// The message type is already bound to another tag.
    #[error("message type {name} is already registered under tag {tag}")]
    DuplicateType { name: &'static str, tag: u8 },

    /// No decoder is registered for the tag found on the wire.
    #[error("no message type registered for tag {0}")]
    UnknownTag(u8),

    /// The message being encoded was never registered.
    #[error("message type {0} is not registered")]
    UnregisteredType(&'static str),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A payload decoder ran past the end of its payload.
    #[error("payload truncated (needed {needed} bytes, {remaining} left)")]
    Truncated { needed: usize, remaining: usize },

    /// A payload decoder left bytes unread.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    /// The payload bytes are structurally invalid for the message type.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The ACK envelope carries a destination code that is illegal on the wire.
    #[error("malformed ACK envelope (destination code {code}, raw header {raw:#010x})")]
    MalformedEnvelope { code: u8, raw: u32 },

    /// An ACK message was encoded with a local-only destination.
    #[error("ACK message with destination {0:?} cannot be encoded")]
    InvalidDestination(crate::envelope::DestinationCode),

    /// An idempotency key is outside `[1, 2^29 - 1]`.
    #[error("idempotency key {0} out of range")]
    KeyOutOfRange(u32),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// The stream ended cleanly on a frame boundary.
    #[error("end of stream")]
    EndOfStream,
}

pub type Result<T> = std::result::Result<T, FrameError>;
