//! Fixed-width big-endian read/write primitives shared by the control
//! encoder (write side) and the video packet header / device metadata
//! parsers (read side).
//!
//! Writes go through [`bytes::BufMut`], so any growable buffer works
//! (`Vec<u8>`, `BytesMut`) and capacity grows on demand.

use bytes::BufMut;

use crate::types::Rect;

/// Wire size of an encoded [`Rect`]: 4 + 4 + 2 + 2 bytes.
pub const RECT_SIZE: usize = 12;

#[inline]
pub fn write_u16_be(buf: &mut impl BufMut, value: u16) {
    buf.put_u16(value);
}

#[inline]
pub fn write_u32_be(buf: &mut impl BufMut, value: u32) {
    buf.put_u32(value);
}

#[inline]
pub fn write_u64_be(buf: &mut impl BufMut, value: u64) {
    buf.put_u64(value);
}

/// Encode a rectangle as `x:i32 | y:i32 | width:u16 | height:u16`, all big-endian.
pub fn write_rect(buf: &mut impl BufMut, rect: &Rect) {
    buf.put_i32(rect.x);
    buf.put_i32(rect.y);
    buf.put_u16(rect.width);
    buf.put_u16(rect.height);
}

// ── Read side ─────────────────────────────────────────────────────────────────

/// Read a big-endian `u16` at `offset`, or `None` if `buf` is too short.
#[inline]
pub fn read_u16_be(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes(bytes.try_into().ok()?))
}

/// Read a big-endian `u32` at `offset`, or `None` if `buf` is too short.
#[inline]
pub fn read_u32_be(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

/// Read a big-endian `u64` at `offset`, or `None` if `buf` is too short.
#[inline]
pub fn read_u64_be(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset.checked_add(8)?)?;
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_big_endian() {
        let mut buf = Vec::new();
        write_u16_be(&mut buf, 0x0102);
        write_u32_be(&mut buf, 0x0304_0506);
        write_u64_be(&mut buf, 0x0708_090A_0B0C_0D0E);
        assert_eq!(
            buf,
            [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E]
        );
    }

    #[test]
    fn rect_layout() {
        let mut buf = Vec::new();
        write_rect(&mut buf, &Rect::new(-1, 258, 1080, 2400));
        assert_eq!(buf.len(), RECT_SIZE);
        assert_eq!(&buf[0..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&buf[4..8], &[0x00, 0x00, 0x01, 0x02]);
        assert_eq!(&buf[8..10], &1080u16.to_be_bytes());
        assert_eq!(&buf[10..12], &2400u16.to_be_bytes());
    }

    #[test]
    fn reads_check_bounds() {
        let buf = [0x00, 0x00, 0x04, 0x38, 0xFF];
        assert_eq!(read_u32_be(&buf, 0), Some(1080));
        assert_eq!(read_u16_be(&buf, 2), Some(0x0438));
        assert_eq!(read_u32_be(&buf, 2), None);
        assert_eq!(read_u64_be(&buf, 0), None);
        assert_eq!(read_u16_be(&buf, usize::MAX), None);
    }

    #[test]
    fn read_u64_matches_write() {
        let mut buf = Vec::new();
        write_u64_be(&mut buf, 0xC000_0000_0000_1234);
        assert_eq!(read_u64_be(&buf, 0), Some(0xC000_0000_0000_1234));
    }
}
