//! Message set shared by the host and the microcontroller firmware.
//!
//! | Tag | Type | Kind |
//! |---|---|---|
//! | 1 | [`LongData`] | plain |
//! | 2 | [`PeerInfo`] | plain |
//! | 3 | `Ack<HardwareInfo>` | ACK |
//! | 4 | `Ack<Counter>` | ACK |
//! | 5 | [`DigitalWrite`] | plain |
//! | 6 | [`Blob`] | plain |

use bytes::{BufMut, Bytes, BytesMut};

use ackframe_frame::{payload, Ack, AckPayload, Decode, FrameError, Message, Registry, Result};

pub const LONG_DATA: u8 = 1;
pub const PEER_INFO: u8 = 2;
pub const HARDWARE_INFO: u8 = 3;
pub const COUNTER: u8 = 4;
pub const DIGITAL_WRITE: u8 = 5;
pub const BLOB: u8 = 6;

/// Registry with every message of this module.
pub fn registry() -> Result<Registry> {
    Ok(Registry::builder()
        .register::<LongData>(LONG_DATA)?
        .register::<PeerInfo>(PEER_INFO)?
        .register::<Ack<HardwareInfo>>(HARDWARE_INFO)?
        .register::<Ack<Counter>>(COUNTER)?
        .register::<DigitalWrite>(DIGITAL_WRITE)?
        .register::<Blob>(BLOB)?
        .build())
}

/// A single 64-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct LongData(pub u64);

impl Message for LongData {
    fn payload_len(&self) -> usize {
        8
    }

    fn write_payload(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u64(self.0);
        Ok(())
    }
}

impl Decode for LongData {
    fn decode(src: &mut Bytes) -> Result<Self> {
        Ok(Self(payload::get_u64(src)?))
    }
}

/// Self-introduction of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct PeerInfo {
    pub name: String,
    pub date_of_birth: String,
    pub age: u32,
}

impl Message for PeerInfo {
    fn payload_len(&self) -> usize {
        payload::str_len(&self.name) + payload::str_len(&self.date_of_birth) + 4
    }

    fn write_payload(&self, dst: &mut BytesMut) -> Result<()> {
        payload::put_str(dst, &self.name)?;
        payload::put_str(dst, &self.date_of_birth)?;
        dst.put_u32(self.age);
        Ok(())
    }
}

impl Decode for PeerInfo {
    fn decode(src: &mut Bytes) -> Result<Self> {
        Ok(Self {
            name: payload::get_str(src)?,
            date_of_birth: payload::get_str(src)?,
            age: payload::get_u32(src)?,
        })
    }
}

/// Which piece of hardware information is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
#[cfg_attr(feature = "cli", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum InfoCode {
    /// Name of the device.
    HardwareName = 1,
    /// Serial port the device is attached to.
    SerialPortName = 2,
}

impl TryFrom<u8> for InfoCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::HardwareName),
            2 => Ok(Self::SerialPortName),
            other => Err(FrameError::InvalidPayload(format!(
                "unknown hardware info code {other}"
            ))),
        }
    }
}

/// ACK payload: request a piece of hardware information.
///
/// The request carries only the code; the response echoes the code and
/// adds the text.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct HardwareInfo {
    pub code: InfoCode,
    pub information: String,
}

impl HardwareInfo {
    pub fn request(code: InfoCode) -> Self {
        Self {
            code,
            information: String::new(),
        }
    }

    pub fn answer(code: InfoCode, information: impl Into<String>) -> Self {
        Self {
            code,
            information: information.into(),
        }
    }
}

impl AckPayload for HardwareInfo {
    fn request_len(&self) -> usize {
        1
    }

    fn write_request(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u8(self.code as u8);
        Ok(())
    }

    fn read_request(src: &mut Bytes) -> Result<Self> {
        Ok(Self::request(InfoCode::try_from(payload::get_u8(src)?)?))
    }

    fn response_len(&self) -> usize {
        1 + payload::str_len(&self.information)
    }

    fn write_response(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u8(self.code as u8);
        payload::put_str(dst, &self.information)
    }

    fn read_response(src: &mut Bytes) -> Result<Self> {
        let code = InfoCode::try_from(payload::get_u8(src)?)?;
        Ok(Self::answer(code, payload::get_str(src)?))
    }
}

/// ACK payload: step a counter held by the responder.
///
/// Requests carry `increment` (false means decrement); responses carry the
/// counter value after the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Counter {
    pub increment: bool,
    pub count: i32,
}

impl Counter {
    pub fn step(increment: bool) -> Self {
        Self {
            increment,
            count: 0,
        }
    }

    pub fn value(count: i32) -> Self {
        Self {
            increment: false,
            count,
        }
    }
}

impl AckPayload for Counter {
    fn request_len(&self) -> usize {
        1
    }

    fn write_request(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u8(u8::from(self.increment));
        Ok(())
    }

    fn read_request(src: &mut Bytes) -> Result<Self> {
        Ok(Self::step(payload::get_bool(src)?))
    }

    fn response_len(&self) -> usize {
        4
    }

    fn write_response(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i32(self.count);
        Ok(())
    }

    fn read_response(src: &mut Bytes) -> Result<Self> {
        Ok(Self::value(payload::get_i32(src)?))
    }
}

/// Set a digital output pin.
///
/// Packed in one byte: pin in the upper seven bits, state in the lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct DigitalWrite {
    pub pin: u8,
    pub state: bool,
}

impl DigitalWrite {
    pub const MAX_PIN: u8 = 127;
}

impl Message for DigitalWrite {
    fn payload_len(&self) -> usize {
        1
    }

    fn write_payload(&self, dst: &mut BytesMut) -> Result<()> {
        if self.pin > Self::MAX_PIN {
            return Err(FrameError::InvalidPayload(format!(
                "pin {} does not fit in 7 bits",
                self.pin
            )));
        }
        dst.put_u8((self.pin << 1) | u8::from(self.state));
        Ok(())
    }
}

impl Decode for DigitalWrite {
    fn decode(src: &mut Bytes) -> Result<Self> {
        let packed = payload::get_u8(src)?;
        Ok(Self {
            pin: packed >> 1,
            state: packed & 1 == 1,
        })
    }
}

/// Opaque bytes filling the whole payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Blob(#[cfg_attr(feature = "cli", serde(serialize_with = "hex"))] pub Bytes);

#[cfg(feature = "cli")]
fn hex<S: serde::Serializer>(data: &Bytes, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let text: String = data.iter().map(|b| format!("{b:02x}")).collect();
    serializer.serialize_str(&text)
}

impl Message for Blob {
    fn payload_len(&self) -> usize {
        self.0.len()
    }

    fn write_payload(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_slice(&self.0);
        Ok(())
    }
}

impl Decode for Blob {
    fn decode(src: &mut Bytes) -> Result<Self> {
        Ok(Self(std::mem::take(src)))
    }
}

#[cfg(test)]
mod tests {
    use ackframe_frame::{decode_frame, IdempotencyKey};

    use super::*;

    fn roundtrip(registry: &Registry, message: &dyn Message) -> Box<dyn Message> {
        let mut wire = BytesMut::from(registry.encode_to_vec(message).unwrap().as_slice());
        let frame = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert!(wire.is_empty());
        registry.decode_frame(frame).unwrap()
    }

    #[test]
    fn registry_binds_every_tag() {
        let registry = registry().unwrap();
        assert_eq!(registry.tags(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(registry.tag_of::<Ack<Counter>>(), Some(COUNTER));
        assert_eq!(registry.tag_of::<Blob>(), Some(BLOB));
    }

    #[test]
    fn peer_info_layout() {
        let registry = registry().unwrap();
        let info = PeerInfo {
            name: "uno".to_string(),
            date_of_birth: "2010".to_string(),
            age: 12,
        };
        let wire = registry.encode_to_vec(&info).unwrap();
        assert_eq!(
            wire,
            vec![2, 0, 15, 0, 3, b'u', b'n', b'o', 0, 4, b'2', b'0', b'1', b'0', 0, 0, 0, 12]
        );
        let decoded = roundtrip(&registry, &info);
        assert_eq!(decoded.downcast_ref::<PeerInfo>(), Some(&info));
    }

    #[test]
    fn digital_write_packs_pin_and_state() {
        let registry = registry().unwrap();
        let msg = DigitalWrite {
            pin: 13,
            state: true,
        };
        assert_eq!(registry.encode_to_vec(&msg).unwrap(), vec![5, 0, 1, 27]);
        assert_eq!(
            roundtrip(&registry, &msg).downcast_ref::<DigitalWrite>(),
            Some(&msg)
        );
    }

    #[test]
    fn digital_write_rejects_wide_pin() {
        let registry = registry().unwrap();
        let mut buf = BytesMut::new();
        let err = registry
            .encode(
                &DigitalWrite {
                    pin: 200,
                    state: false,
                },
                &mut buf,
            )
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidPayload(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn hardware_info_request_and_response_halves() {
        let registry = registry().unwrap();
        let key = IdempotencyKey::new(9).unwrap();

        let request = Ack::request(key, HardwareInfo::request(InfoCode::SerialPortName));
        let wire = registry.encode_to_vec(&request).unwrap();
        // tag, len 5, header (9 << 3 | 1), code
        assert_eq!(wire, vec![3, 0, 5, 0, 0, 0, 73, 2]);

        let response = Ack::response(key, HardwareInfo::answer(InfoCode::HardwareName, "uno"));
        let decoded = roundtrip(&registry, &response);
        assert_eq!(decoded.downcast_ref::<Ack<HardwareInfo>>(), Some(&response));
    }

    #[test]
    fn hardware_info_unknown_code_is_invalid() {
        let registry = registry().unwrap();
        let err = registry
            .decode(HARDWARE_INFO, Bytes::from_static(&[0, 0, 0, 9, 7]))
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidPayload(_)));
    }

    #[test]
    fn counter_response_carries_signed_count() {
        let registry = registry().unwrap();
        let key = IdempotencyKey::new(2).unwrap();
        let response = Ack::response(key, Counter::value(-3));
        let decoded = roundtrip(&registry, &response);
        assert_eq!(
            decoded.downcast_ref::<Ack<Counter>>().unwrap().payload().count,
            -3
        );
    }

    #[test]
    fn blob_takes_whole_payload() {
        let registry = registry().unwrap();
        let blob = Blob(Bytes::from_static(b"\x00\x01raw"));
        assert_eq!(roundtrip(&registry, &blob).downcast_ref::<Blob>(), Some(&blob));

        let empty = Blob(Bytes::new());
        assert_eq!(registry.encode_to_vec(&empty).unwrap(), vec![6, 0, 0]);
    }

    #[test]
    fn oversized_blob_is_refused() {
        let registry = registry().unwrap();
        let blob = Blob(Bytes::from(vec![0u8; 65_536]));
        assert!(matches!(
            registry.encode_to_vec(&blob),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }
}
