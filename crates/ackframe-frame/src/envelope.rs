//! ACK envelope header.
//!
//! Every ACK message payload starts with a 4-byte big-endian header packing
//! the idempotency key and the destination code:
//!
//! ```text
//! ┌──────────────────────────────┬───────────┐
//! │ Idempotency key (29 bits)    │ Code (3b) │
//! └──────────────────────────────┴───────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::payload;

/// Size of the envelope header on the wire.
pub const ENVELOPE_SIZE: usize = 4;

const CODE_BITS: u32 = 3;
const CODE_MASK: u32 = (1 << CODE_BITS) - 1;

/// Where an ACK message is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DestinationCode {
    /// A request travelling towards the responder.
    ToServer = 1,
    /// A response travelling back to the requester.
    ToClient = 2,
    /// A received `ToServer` frame, as seen by the responder.
    ///
    /// Local only: never legal on the wire.
    ServerAck = 3,
}

impl DestinationCode {
    /// Map a wire code to a destination. Only 1 and 2 may appear on the wire.
    fn from_wire(code: u8, raw: u32) -> Result<Self> {
        match code {
            1 => Ok(Self::ServerAck),
            2 => Ok(Self::ToClient),
            _ => Err(FrameError::MalformedEnvelope { code, raw }),
        }
    }

    fn to_wire(self) -> Result<u8> {
        match self {
            Self::ToServer | Self::ToClient => Ok(self as u8),
            Self::ServerAck => Err(FrameError::InvalidDestination(self)),
        }
    }
}

/// An idempotency key in `[1, 2^29 - 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdempotencyKey(u32);

impl IdempotencyKey {
    /// Smallest valid key.
    pub const MIN: u32 = 1;
    /// Largest key that fits in the 29-bit envelope field.
    pub const MAX: u32 = (1 << (32 - CODE_BITS)) - 1;

    pub fn new(key: u32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&key) {
            Ok(Self(key))
        } else {
            Err(FrameError::KeyOutOfRange(key))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for IdempotencyKey {
    type Error = FrameError;

    fn try_from(key: u32) -> Result<Self> {
        Self::new(key)
    }
}

/// Key and destination of one ACK message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Envelope {
    pub key: IdempotencyKey,
    pub destination: DestinationCode,
}

impl Envelope {
    pub fn new(key: IdempotencyKey, destination: DestinationCode) -> Self {
        Self { key, destination }
    }

    /// Write the 4-byte header.
    ///
    /// Fails with [`FrameError::InvalidDestination`] for `ServerAck`.
    pub fn write(&self, dst: &mut BytesMut) -> Result<()> {
        let code = self.destination.to_wire()?;
        dst.put_u32((self.key.get() << CODE_BITS) | u32::from(code));
        Ok(())
    }

    /// Read the 4-byte header from the front of `src`.
    ///
    /// A wire `ToServer` comes back as [`DestinationCode::ServerAck`].
    pub fn read(src: &mut Bytes) -> Result<Self> {
        let raw = payload::get_u32(src)?;
        // Masked to 3 bits, fits in u8.
        let code = (raw & CODE_MASK) as u8;
        let destination = DestinationCode::from_wire(code, raw)?;
        let key = IdempotencyKey::new(raw >> CODE_BITS)?;
        Ok(Self { key, destination })
    }
}
