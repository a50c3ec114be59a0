//! Checked payload readers and writers.
//!
//! `bytes::Buf` getters panic when the buffer runs short. Payloads come from
//! the peer, so decoders read through these helpers instead and get a
//! [`FrameError::Truncated`] on short input.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

fn ensure(src: &Bytes, needed: usize) -> Result<()> {
    if src.remaining() < needed {
        return Err(FrameError::Truncated {
            needed,
            remaining: src.remaining(),
        });
    }
    Ok(())
}

pub fn get_u8(src: &mut Bytes) -> Result<u8> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

/// Any non-zero byte reads as `true`.
pub fn get_bool(src: &mut Bytes) -> Result<bool> {
    Ok(get_u8(src)? != 0)
}

pub fn get_u16(src: &mut Bytes) -> Result<u16> {
    ensure(src, 2)?;
    Ok(src.get_u16())
}

pub fn get_u32(src: &mut Bytes) -> Result<u32> {
    ensure(src, 4)?;
    Ok(src.get_u32())
}

pub fn get_i32(src: &mut Bytes) -> Result<i32> {
    ensure(src, 4)?;
    Ok(src.get_i32())
}

pub fn get_u64(src: &mut Bytes) -> Result<u64> {
    ensure(src, 8)?;
    Ok(src.get_u64())
}

/// Split off the next `len` bytes without copying.
pub fn get_bytes(src: &mut Bytes, len: usize) -> Result<Bytes> {
    ensure(src, len)?;
    Ok(src.split_to(len))
}

/// Read a string prefixed with its u16 byte length.
pub fn get_str(src: &mut Bytes) -> Result<String> {
    let len = usize::from(get_u16(src)?);
    let raw = get_bytes(src, len)?;
    String::from_utf8(raw.to_vec()).map_err(|e| FrameError::InvalidPayload(e.to_string()))
}

/// Encoded size of a u16-length-prefixed string.
pub fn str_len(s: &str) -> usize {
    2 + s.len()
}

/// Write a string prefixed with its u16 byte length.
pub fn put_str(dst: &mut BytesMut, s: &str) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: s.len(),
        max: usize::from(u16::MAX),
    })?;
    dst.put_u16(len);
    dst.put_slice(s.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_in_order() {
        let mut src = Bytes::from_static(&[1, 0, 2, 0, 0, 0, 3, 0xFF, 0xFF, 0xFF, 0xFE]);
        assert_eq!(get_u8(&mut src).unwrap(), 1);
        assert_eq!(get_u16(&mut src).unwrap(), 2);
        assert_eq!(get_u32(&mut src).unwrap(), 3);
        assert_eq!(get_i32(&mut src).unwrap(), -2);
        assert!(src.is_empty());
    }

    #[test]
    fn test_short_read_is_truncated() {
        let mut src = Bytes::from_static(&[0, 0, 0]);
        assert!(matches!(
            get_u64(&mut src),
            Err(FrameError::Truncated {
                needed: 8,
                remaining: 3
            })
        ));
        // Nothing consumed on failure.
        assert_eq!(src.len(), 3);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut dst = BytesMut::new();
        put_str(&mut dst, "Gwen").unwrap();
        assert_eq!(dst.len(), str_len("Gwen"));
        assert_eq!(&dst[..2], &[0, 4]);

        let mut src = dst.freeze();
        assert_eq!(get_str(&mut src).unwrap(), "Gwen");
    }

    #[test]
    fn test_string_length_past_end() {
        let mut src = Bytes::from_static(&[0, 10, b'a', b'b']);
        assert!(matches!(
            get_str(&mut src),
            Err(FrameError::Truncated {
                needed: 10,
                remaining: 2
            })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut src = Bytes::from_static(&[0, 2, 0xC3, 0x28]);
        assert!(matches!(
            get_str(&mut src),
            Err(FrameError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_bool_nonzero_is_true() {
        let mut src = Bytes::from_static(&[0, 1, 7]);
        assert!(!get_bool(&mut src).unwrap());
        assert!(get_bool(&mut src).unwrap());
        assert!(get_bool(&mut src).unwrap());
    }
}
