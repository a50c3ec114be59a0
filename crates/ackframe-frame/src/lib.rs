//! Tag/length message framing for serial lines and sockets.
//!
//! Every message travels as one frame:
//! - a 1-byte type tag
//! - a 2-byte big-endian payload length
//! - the payload
//!
//! A [`Registry`] binds tags to message types. ACK messages ([`Ack`]) put a
//! 4-byte [`Envelope`] (idempotency key + destination) at the start of
//! their payload.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod message;
pub mod payload;
pub mod reader;
pub mod registry;
#[cfg(feature = "async")]
pub mod tokio_codec;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, RawFrame, HEADER_SIZE, MAX_PAYLOAD};
pub use envelope::{DestinationCode, Envelope, IdempotencyKey, ENVELOPE_SIZE};
pub use error::{FrameError, Result};
pub use message::{Ack, AckPayload, AsAny, Decode, Message};
pub use reader::FrameReader;
pub use registry::{Registry, RegistryBuilder};
#[cfg(feature = "async")]
pub use tokio_codec::MessageCodec;
pub use writer::FrameWriter;
