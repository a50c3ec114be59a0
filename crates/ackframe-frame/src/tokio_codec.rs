//! `tokio_util::codec` adapter over a [`Registry`].
//!
//! Use with `tokio_util::codec::Framed` to exchange messages on async
//! streams with the same wire format as [`FrameReader`](crate::FrameReader)
//! and [`FrameWriter`](crate::FrameWriter).

use std::sync::Arc;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::Message;
use crate::registry::Registry;

/// Decodes frames into registered messages and encodes messages into frames.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    registry: Arc<Registry>,
    max_payload_size: usize,
}

impl MessageCodec {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, &FrameConfig::default())
    }

    pub fn with_config(registry: Arc<Registry>, config: &FrameConfig) -> Self {
        Self {
            registry,
            max_payload_size: config.max_payload_size,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl Decoder for MessageCodec {
    type Item = Box<dyn Message>;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match decode_frame(src, self.max_payload_size)? {
            Some(frame) => {
                tracing::trace!(tag = frame.tag, len = frame.payload.len(), "frame decoded");
                self.registry.decode_frame(frame).map(Some)
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Box<dyn Message>> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Box<dyn Message>, dst: &mut BytesMut) -> Result<()> {
        let size = item.payload_len();
        if size > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.max_payload_size,
            });
        }
        self.registry.encode(&*item, dst)
    }
}
