use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: tag (1) + length (2) = 3 bytes.
pub const HEADER_SIZE: usize = 3;

/// Largest payload the 2-byte length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// A complete frame whose payload has not been decoded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Message type tag.
    pub tag: u8,
    /// The payload bytes (exactly `length` bytes).
    pub payload: Bytes,
}

impl RawFrame {
    /// Create a new raw frame.
    pub fn new(tag: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Write a frame header.
///
/// Wire format:
/// ```text
/// ┌──────────┬─────────────┬─────────────────┐
/// │ Tag (1B) │ Length      │ Payload          │
/// │          │ (2B BE)     │ (Length bytes)   │
/// └──────────┴─────────────┴─────────────────┘
/// ```
pub fn encode_header(tag: u8, payload_len: usize, dst: &mut BytesMut) -> Result<()> {
    let len = u16::try_from(payload_len).map_err(|_| FrameError::PayloadTooLarge {
        size: payload_len,
        max: MAX_PAYLOAD,
    })?;
    dst.reserve(HEADER_SIZE + payload_len);
    dst.put_u8(tag);
    dst.put_u16(len);
    Ok(())
}

/// Encode an already-serialized payload into a frame.
pub fn encode_frame(tag: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    encode_header(tag, payload.len(), dst)?;
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` until the buffer holds the header and all `length`
/// payload bytes. On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<RawFrame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let tag = src[0];
    let payload_len = usize::from(u16::from_be_bytes([src[1], src[2]]));

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(RawFrame { tag, payload }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default and upper bound: 65535.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
