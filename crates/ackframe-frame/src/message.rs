//! Message traits and the generic ACK message.

use std::any::Any;
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::envelope::{DestinationCode, Envelope, IdempotencyKey, ENVELOPE_SIZE};
use crate::error::Result;

/// Upcast to `&dyn Any`, implemented for every `'static` type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A typed message that can be written into a frame payload.
///
/// The tag is not part of the type: it is bound when the type is
/// registered with a [`Registry`](crate::Registry).
pub trait Message: AsAny + fmt::Debug + Send + Sync {
    /// Number of payload bytes [`write_payload`](Message::write_payload)
    /// will produce.
    fn payload_len(&self) -> usize;

    /// Serialize the payload (without frame header).
    fn write_payload(&self, dst: &mut BytesMut) -> Result<()>;

    /// Type name used in logs and errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A message type that can be rebuilt from its payload bytes.
///
/// `decode` must consume exactly the bytes it understands. The registry
/// treats anything left in `src` as an error.
pub trait Decode: Message + Sized {
    fn decode(src: &mut Bytes) -> Result<Self>;
}

impl dyn Message {
    /// Returns the concrete message if it is a `T`.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Direction-specific body of an ACK message.
///
/// One type carries both the request fields and the response fields;
/// which half goes on the wire depends on the envelope destination.
pub trait AckPayload: Clone + fmt::Debug + Send + Sync + 'static {
    fn request_len(&self) -> usize;
    fn write_request(&self, dst: &mut BytesMut) -> Result<()>;
    fn read_request(src: &mut Bytes) -> Result<Self>;

    fn response_len(&self) -> usize;
    fn write_response(&self, dst: &mut BytesMut) -> Result<()>;
    fn read_response(src: &mut Bytes) -> Result<Self>;
}

/// A message carrying an ACK envelope followed by a payload `P`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack<P> {
    envelope: Envelope,
    payload: P,
}

impl<P: AckPayload> Ack<P> {
    pub fn new(envelope: Envelope, payload: P) -> Self {
        Self { envelope, payload }
    }

    /// A `ToServer` request.
    pub fn request(key: IdempotencyKey, payload: P) -> Self {
        Self::new(Envelope::new(key, DestinationCode::ToServer), payload)
    }

    /// A `ToClient` response.
    pub fn response(key: IdempotencyKey, payload: P) -> Self {
        Self::new(Envelope::new(key, DestinationCode::ToClient), payload)
    }

    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    pub fn key(&self) -> IdempotencyKey {
        self.envelope.key
    }

    pub fn destination(&self) -> DestinationCode {
        self.envelope.destination
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    fn is_response(&self) -> bool {
        self.envelope.destination == DestinationCode::ToClient
    }
}

impl<P: AckPayload> Message for Ack<P> {
    fn payload_len(&self) -> usize {
        let body = if self.is_response() {
            self.payload.response_len()
        } else {
            self.payload.request_len()
        };
        ENVELOPE_SIZE + body
    }

    fn write_payload(&self, dst: &mut BytesMut) -> Result<()> {
        self.envelope.write(dst)?;
        if self.is_response() {
            self.payload.write_response(dst)
        } else {
            self.payload.write_request(dst)
        }
    }
}

impl<P: AckPayload> Decode for Ack<P> {
    fn decode(src: &mut Bytes) -> Result<Self> {
        let envelope = Envelope::read(src)?;
        let payload = match envelope.destination {
            DestinationCode::ToClient => P::read_response(src)?,
            _ => P::read_request(src)?,
        };
        Ok(Self { envelope, payload })
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;
    use crate::error::FrameError;
    use crate::payload;

    #[derive(Debug, Clone, PartialEq)]
    struct Echo {
        question: u8,
        answer: u16,
    }

    impl AckPayload for Echo {
        fn request_len(&self) -> usize {
            1
        }
        fn write_request(&self, dst: &mut BytesMut) -> Result<()> {
            dst.put_u8(self.question);
            Ok(())
        }
        fn read_request(src: &mut Bytes) -> Result<Self> {
            Ok(Self {
                question: payload::get_u8(src)?,
                answer: 0,
            })
        }
        fn response_len(&self) -> usize {
            2
        }
        fn write_response(&self, dst: &mut BytesMut) -> Result<()> {
            dst.put_u16(self.answer);
            Ok(())
        }
        fn read_response(src: &mut Bytes) -> Result<Self> {
            Ok(Self {
                question: 0,
                answer: payload::get_u16(src)?,
            })
        }
    }

    #[derive(Debug)]
    struct Ping;

    impl Message for Ping {
        fn payload_len(&self) -> usize {
            0
        }
        fn write_payload(&self, _dst: &mut BytesMut) -> Result<()> {
            Ok(())
        }
    }

    fn key(k: u32) -> IdempotencyKey {
        IdempotencyKey::new(k).unwrap()
    }

    fn encode(msg: &dyn Message) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        msg.write_payload(&mut buf)?;
        assert_eq!(buf.len(), msg.payload_len());
        Ok(buf.freeze())
    }

    #[test]
    fn request_writes_request_half() {
        let msg = Ack::request(
            key(2),
            Echo {
                question: 9,
                answer: 500,
            },
        );
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes.as_ref(), &[0, 0, 0, 0x11, 9]);

        let decoded = Ack::<Echo>::decode(&mut bytes.clone()).unwrap();
        assert_eq!(decoded.destination(), DestinationCode::ServerAck);
        assert_eq!(decoded.key(), key(2));
        assert_eq!(decoded.payload().question, 9);
    }

    #[test]
    fn response_writes_response_half() {
        let msg = Ack::response(
            key(2),
            Echo {
                question: 9,
                answer: 500,
            },
        );
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes.as_ref(), &[0, 0, 0, 0x12, 0x01, 0xF4]);

        let decoded = Ack::<Echo>::decode(&mut bytes.clone()).unwrap();
        assert_eq!(decoded.destination(), DestinationCode::ToClient);
        assert_eq!(decoded.into_payload().answer, 500);
    }

    #[test]
    fn server_ack_message_does_not_encode() {
        let msg = Ack::new(
            Envelope::new(key(1), DestinationCode::ServerAck),
            Echo {
                question: 1,
                answer: 1,
            },
        );
        assert!(matches!(
            encode(&msg),
            Err(FrameError::InvalidDestination(_))
        ));
    }

    #[test]
    fn downcast_through_dyn_message() {
        let boxed: Box<dyn Message> = Box::new(Ping);
        assert!(boxed.is::<Ping>());
        assert!(!boxed.is::<Ack<Echo>>());
        assert!(boxed.downcast_ref::<Ping>().is_some());
        assert!(boxed.name().ends_with("Ping"));
    }
}
