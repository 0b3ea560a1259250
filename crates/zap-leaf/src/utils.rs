//! Native-order field access on raw block bytes.
//!
//! Structural fields are stored in the byte order of the host that wrote the
//! block; `byteswap` is the only thing that ever reorders them.

use bytes::{Buf, BufMut};

pub(crate) fn get_u16(buf: &[u8], offset: usize) -> u16 {
    (&buf[offset..]).get_u16_ne()
}

pub(crate) fn get_u32(buf: &[u8], offset: usize) -> u32 {
    (&buf[offset..]).get_u32_ne()
}

pub(crate) fn get_u64(buf: &[u8], offset: usize) -> u64 {
    (&buf[offset..]).get_u64_ne()
}

pub(crate) fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    (&mut buf[offset..]).put_u16_ne(value);
}

pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    (&mut buf[offset..]).put_u32_ne(value);
}

pub(crate) fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    (&mut buf[offset..]).put_u64_ne(value);
}

pub(crate) fn swap_u16(buf: &mut [u8], offset: usize) {
    let v = get_u16(buf, offset);
    put_u16(buf, offset, v.swap_bytes());
}

pub(crate) fn swap_u32(buf: &mut [u8], offset: usize) {
    let v = get_u32(buf, offset);
    put_u32(buf, offset, v.swap_bytes());
}

pub(crate) fn swap_u64(buf: &mut [u8], offset: usize) {
    let v = get_u64(buf, offset);
    put_u64(buf, offset, v.swap_bytes());
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn put_then_get_at_offset() {
        let mut buf = [0u8; 16];
        put_u16(&mut buf, 1, 0xbeef);
        put_u32(&mut buf, 3, 0xdead_beef);
        put_u64(&mut buf, 7, 0x0102_0304_0506_0708);
        assert_eq!(get_u16(&buf, 1), 0xbeef);
        assert_eq!(get_u32(&buf, 3), 0xdead_beef);
        assert_eq!(get_u64(&buf, 7), 0x0102_0304_0506_0708);
        assert_eq!(buf[0], 0);
        assert_eq!(buf[15], 0);
    }

    #[test]
    fn swap_reverses_bytes() {
        let mut buf = [1u8, 2, 3, 4];
        swap_u32(&mut buf, 0);
        assert_eq!(buf, [4, 3, 2, 1]);
        swap_u16(&mut buf, 1);
        assert_eq!(buf, [4, 2, 3, 1]);
    }
}
