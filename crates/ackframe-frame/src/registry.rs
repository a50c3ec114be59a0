use std::any::{Any, TypeId};
use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::codec::{encode_header, RawFrame};
use crate::error::{FrameError, Result};
use crate::message::{Decode, Message};

type DecodeFn = fn(Bytes) -> Result<Box<dyn Message>>;

struct Entry {
    name: &'static str,
    decode: DecodeFn,
}

fn decode_boxed<T: Decode>(payload: Bytes) -> Result<Box<dyn Message>> {
    let mut src = payload;
    let message = T::decode(&mut src)?;
    if !src.is_empty() {
        return Err(FrameError::TrailingBytes(src.len()));
    }
    Ok(Box::new(message))
}

/// Tag-keyed table of message decoders.
///
/// Built once at startup and then shared (usually behind an `Arc`) by
/// every reader and writer on the connection. Each tag maps to exactly one
/// type and each type to exactly one tag.
#[derive(Default)]
pub struct Registry {
    decoders: HashMap<u8, Entry>,
    tags: HashMap<TypeId, u8>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a chained registration.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            registry: Self::new(),
        }
    }

    /// Bind message type `T` to `tag`.
    pub fn register<T: Decode>(&mut self, tag: u8) -> Result<()> {
        let name = std::any::type_name::<T>();
        if let Some(existing) = self.decoders.get(&tag) {
            return Err(FrameError::DuplicateTag {
                tag,
                existing: existing.name,
            });
        }
        let type_id = TypeId::of::<T>();
        if let Some(&tag) = self.tags.get(&type_id) {
            return Err(FrameError::DuplicateType { name, tag });
        }

        self.decoders.insert(
            tag,
            Entry {
                name,
                decode: decode_boxed::<T>,
            },
        );
        self.tags.insert(type_id, tag);
        tracing::trace!(tag, name, "registered message type");
        Ok(())
    }

    /// The tag bound to `T`, if any.
    pub fn tag_of<T: Message>(&self) -> Option<u8> {
        self.tags.get(&TypeId::of::<T>()).copied()
    }

    /// The type name bound to `tag`, if any.
    pub fn name_of(&self, tag: u8) -> Option<&'static str> {
        self.decoders.get(&tag).map(|entry| entry.name)
    }

    pub fn contains_tag(&self, tag: u8) -> bool {
        self.decoders.contains_key(&tag)
    }

    /// Registered tags, ascending.
    pub fn tags(&self) -> Vec<u8> {
        let mut tags: Vec<u8> = self.decoders.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode a payload with the decoder bound to `tag`.
    pub fn decode(&self, tag: u8, payload: Bytes) -> Result<Box<dyn Message>> {
        let entry = self.decoders.get(&tag).ok_or(FrameError::UnknownTag(tag))?;
        (entry.decode)(payload)
    }

    /// Decode a complete raw frame.
    pub fn decode_frame(&self, frame: RawFrame) -> Result<Box<dyn Message>> {
        self.decode(frame.tag, frame.payload)
    }

    /// Append `message` as a complete frame (header + payload) to `dst`.
    ///
    /// On error `dst` is left as it was.
    pub fn encode(&self, message: &dyn Message, dst: &mut BytesMut) -> Result<()> {
        let type_id = Any::type_id(message.as_any());
        let tag = *self
            .tags
            .get(&type_id)
            .ok_or(FrameError::UnregisteredType(message.name()))?;

        let len = message.payload_len();
        let start = dst.len();
        encode_header(tag, len, dst)?;
        if let Err(err) = message.write_payload(dst) {
            dst.truncate(start);
            return Err(err);
        }
        debug_assert_eq!(
            dst.len() - start,
            crate::HEADER_SIZE + len,
            "{} wrote a payload that differs from its declared length",
            message.name()
        );
        Ok(())
    }

    /// Encode `message` into a fresh buffer.
    pub fn encode_to_vec(&self, message: &dyn Message) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        self.encode(message, &mut buf)?;
        Ok(buf.to_vec())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<(u8, &'static str)> = self
            .decoders
            .iter()
            .map(|(tag, entry)| (*tag, entry.name))
            .collect();
        entries.sort_unstable_by_key(|(tag, _)| *tag);
        f.debug_struct("Registry").field("types", &entries).finish()
    }
}

/// Chained registration for [`Registry`].
///
/// ```ignore
/// let registry = Registry::builder()
///     .register::<LongData>(1)?
///     .register::<Ack<Counter>>(4)?
///     .build();
/// ```
pub struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    pub fn register<T: Decode>(mut self, tag: u8) -> Result<Self> {
        self.registry.register::<T>(tag)?;
        Ok(self)
    }

    pub fn build(self) -> Registry {
        self.registry
    }
}
