//! Integer arrays stored as chains of array chunks.
//!
//! Each integer is written most-significant byte first, independent of the
//! host byte order, and integers run across chunk boundaries:
//!
//! ```text
//!  head                         next                          next
//! ┌─────┬─────────────────┬───┐  ┌─────┬─────────────────┬───┐
//! │ 251 │ 21 payload bytes│ ──┼─▶│ 251 │ 21 payload bytes│END│
//! └─────┴─────────────────┴───┘  └─────┴─────────────────┴───┘
//! ```

use std::ops::ControlFlow;

use crate::{
    chunk::{ArrayChunk, Chunk, LINK_NEXT},
    error::{ZapError, ZapResult},
    layout::{array_nchunks, ARRAY_BYTES, CHAIN_END},
    leaf::Leaf,
    utils::put_u16,
};

/// A borrowed sequence of same-width integers: an entry name or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ints<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
    U64(&'a [u64]),
}

impl<'a> Ints<'a> {
    /// Width of one integer in bytes.
    pub fn width(&self) -> usize {
        match self {
            Ints::U8(_) => 1,
            Ints::U16(_) => 2,
            Ints::U32(_) => 4,
            Ints::U64(_) => 8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Ints::U8(v) => v.len(),
            Ints::U16(v) => v.len(),
            Ints::U32(v) => v.len(),
            Ints::U64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.width() * self.len()
    }

    pub fn get(&self, index: usize) -> u64 {
        match self {
            Ints::U8(v) => v[index] as u64,
            Ints::U16(v) => v[index] as u64,
            Ints::U32(v) => v[index] as u64,
            Ints::U64(v) => v[index],
        }
    }

    /// Byte `index` of the MSB-first encoding.
    pub(crate) fn be_byte(&self, index: usize) -> u8 {
        if let Ints::U8(v) = self {
            return v[index];
        }
        let width = self.width();
        let shift = 8 * (width - 1 - index % width);
        (self.get(index / width) >> shift) as u8
    }

    fn copy_be_bytes(&self, start: usize, out: &mut [u8]) {
        match self {
            Ints::U8(v) => out.copy_from_slice(&v[start..start + out.len()]),
            _ => {
                for (i, b) in out.iter_mut().enumerate() {
                    *b = self.be_byte(start + i);
                }
            }
        }
    }

    fn be_bytes_eq(&self, start: usize, other: &[u8]) -> bool {
        match self {
            Ints::U8(v) => &v[start..start + other.len()] == other,
            _ => other
                .iter()
                .enumerate()
                .all(|(i, &b)| self.be_byte(start + i) == b),
        }
    }
}

impl<'a> From<&'a [u8]> for Ints<'a> {
    fn from(value: &'a [u8]) -> Self {
        Ints::U8(value)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Ints<'a> {
    fn from(value: &'a [u8; N]) -> Self {
        Ints::U8(value)
    }
}

impl<'a> From<&'a str> for Ints<'a> {
    fn from(value: &'a str) -> Self {
        Ints::U8(value.as_bytes())
    }
}

impl<'a> From<&'a [u16]> for Ints<'a> {
    fn from(value: &'a [u16]) -> Self {
        Ints::U16(value)
    }
}

impl<'a> From<&'a [u32]> for Ints<'a> {
    fn from(value: &'a [u32]) -> Self {
        Ints::U32(value)
    }
}

impl<'a, const N: usize> From<&'a [u16; N]> for Ints<'a> {
    fn from(value: &'a [u16; N]) -> Self {
        Ints::U16(value)
    }
}

impl<'a, const N: usize> From<&'a [u32; N]> for Ints<'a> {
    fn from(value: &'a [u32; N]) -> Self {
        Ints::U32(value)
    }
}

impl<'a> From<&'a [u64]> for Ints<'a> {
    fn from(value: &'a [u64]) -> Self {
        Ints::U64(value)
    }
}

impl<'a, const N: usize> From<&'a [u64; N]> for Ints<'a> {
    fn from(value: &'a [u64; N]) -> Self {
        Ints::U64(value)
    }
}

/// Caller-owned output buffer for [`Ints`].
#[derive(Debug, PartialEq, Eq)]
pub enum IntsMut<'a> {
    U8(&'a mut [u8]),
    U16(&'a mut [u16]),
    U32(&'a mut [u32]),
    U64(&'a mut [u64]),
}

impl<'a> IntsMut<'a> {
    pub fn width(&self) -> usize {
        match self {
            IntsMut::U8(_) => 1,
            IntsMut::U16(_) => 2,
            IntsMut::U32(_) => 4,
            IntsMut::U64(_) => 8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IntsMut::U8(v) => v.len(),
            IntsMut::U16(v) => v.len(),
            IntsMut::U32(v) => v.len(),
            IntsMut::U64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `value`, truncated to the slot width.
    fn set(&mut self, index: usize, value: u64) {
        match self {
            IntsMut::U8(v) => v[index] = value as u8,
            IntsMut::U16(v) => v[index] = value as u16,
            IntsMut::U32(v) => v[index] = value as u32,
            IntsMut::U64(v) => v[index] = value,
        }
    }
}

impl<'a> From<&'a mut [u8]> for IntsMut<'a> {
    fn from(value: &'a mut [u8]) -> Self {
        IntsMut::U8(value)
    }
}

impl<'a, const N: usize> From<&'a mut [u8; N]> for IntsMut<'a> {
    fn from(value: &'a mut [u8; N]) -> Self {
        IntsMut::U8(value)
    }
}

impl<'a> From<&'a mut [u16]> for IntsMut<'a> {
    fn from(value: &'a mut [u16]) -> Self {
        IntsMut::U16(value)
    }
}

impl<'a> From<&'a mut [u32]> for IntsMut<'a> {
    fn from(value: &'a mut [u32]) -> Self {
        IntsMut::U32(value)
    }
}

impl<'a, const N: usize> From<&'a mut [u16; N]> for IntsMut<'a> {
    fn from(value: &'a mut [u16; N]) -> Self {
        IntsMut::U16(value)
    }
}

impl<'a, const N: usize> From<&'a mut [u32; N]> for IntsMut<'a> {
    fn from(value: &'a mut [u32; N]) -> Self {
        IntsMut::U32(value)
    }
}

impl<'a> From<&'a mut [u64]> for IntsMut<'a> {
    fn from(value: &'a mut [u64]) -> Self {
        IntsMut::U64(value)
    }
}

impl<'a, const N: usize> From<&'a mut [u64; N]> for IntsMut<'a> {
    fn from(value: &'a mut [u64; N]) -> Self {
        IntsMut::U64(value)
    }
}

/// Chunks needed to store `ints` as an array chain.
pub fn ints_nchunks(ints: Ints<'_>) -> usize {
    array_nchunks(ints.byte_len())
}

impl<'a> Leaf<'a> {
    /// Allocates a chain holding `ints` and returns its head, or `CHAIN_END`
    /// for an empty sequence. The caller has checked that enough chunks are
    /// free.
    pub(crate) fn array_create(&mut self, ints: Ints<'_>) -> ZapResult<u16> {
        let total = ints.byte_len();
        let mut head = CHAIN_END;
        let mut prev = CHAIN_END;
        let mut written = 0;
        while written < total {
            let chunk = self.chunk_alloc()?;
            let n = (total - written).min(ARRAY_BYTES);
            let mut la = ArrayChunk::default();
            ints.copy_be_bytes(written, &mut la.data[..n]);
            self.write_chunk(chunk, &Chunk::Array(la))?;
            if prev == CHAIN_END {
                head = chunk;
            } else {
                put_u16(self.raw_chunk_mut(prev)?, LINK_NEXT, chunk);
            }
            prev = chunk;
            written += n;
        }
        Ok(head)
    }

    /// Calls `f` with the payload of each chunk of the chain, covering
    /// exactly `nbytes` bytes, until `f` breaks.
    pub(crate) fn array_walk<F>(&self, head: u16, nbytes: usize, mut f: F) -> ZapResult<()>
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        let mut chunk = head;
        let mut remaining = nbytes;
        while remaining > 0 {
            if chunk == CHAIN_END {
                return Err(ZapError::corrupt(format!(
                    "array chain ends {} bytes early",
                    remaining
                )));
            }
            let la = self.read_array_chunk(chunk)?;
            let n = remaining.min(ARRAY_BYTES);
            if f(&la.data[..n]).is_break() {
                return Ok(());
            }
            remaining -= n;
            chunk = la.next;
        }
        Ok(())
    }

    /// Decodes `min(stored_count, out.len())` integers of `stored_width`
    /// bytes into `out`.
    pub(crate) fn array_read(
        &self,
        head: u16,
        stored_width: usize,
        stored_count: usize,
        out: &mut IntsMut<'_>,
    ) -> ZapResult<()> {
        if stored_width > out.width() {
            return Err(ZapError::invalid(format!(
                "cannot read {}-byte integers into {}-byte slots",
                stored_width,
                out.width()
            )));
        }
        let len = stored_count.min(out.len());
        if len == 0 {
            return Ok(());
        }

        // one 8-byte integer, the most common value shape
        if stored_width == 8 && len == 1 {
            if let IntsMut::U64(slots) = out {
                ensure_cov::notify_cov("zap_leaf::array::read::single_u64");
                let la = self.read_array_chunk(head)?;
                let mut be = [0u8; 8];
                be.copy_from_slice(&la.data[..8]);
                slots[0] = u64::from_be_bytes(be);
                return Ok(());
            }
        }

        // byte arrays with room to spare, as when reading back entry names
        if stored_width == 1 && out.len() > stored_count + ARRAY_BYTES {
            if let IntsMut::U8(dst) = out {
                ensure_cov::notify_cov("zap_leaf::array::read::bytes");
                let mut pos = 0;
                self.array_walk(head, stored_count, |payload| {
                    dst[pos..pos + payload.len()].copy_from_slice(payload);
                    pos += payload.len();
                    ControlFlow::Continue(())
                })?;
                return Ok(());
            }
        }

        let mut value: u64 = 0;
        let mut byten = 0;
        let mut idx = 0;
        self.array_walk(head, len * stored_width, |payload| {
            for &b in payload {
                value = (value << 8) | b as u64;
                byten += 1;
                if byten == stored_width {
                    out.set(idx, value);
                    idx += 1;
                    value = 0;
                    byten = 0;
                }
            }
            ControlFlow::Continue(())
        })
    }

    /// Whether the chain at `head`, `stored_count` integers long, holds
    /// exactly `candidate`. Stops at the first chunk that differs.
    pub(crate) fn array_equal(
        &self,
        head: u16,
        stored_count: usize,
        candidate: Ints<'_>,
    ) -> ZapResult<bool> {
        if stored_count != candidate.len() {
            return Ok(false);
        }
        let mut seen = 0;
        let mut equal = true;
        self.array_walk(head, candidate.byte_len(), |payload| {
            if !candidate.be_bytes_eq(seen, payload) {
                equal = false;
                return ControlFlow::Break(());
            }
            seen += payload.len();
            ControlFlow::Continue(())
        })?;
        Ok(equal)
    }

    /// Frees the whole chain and resets `head` to `CHAIN_END`.
    pub(crate) fn array_free(&mut self, head: &mut u16) -> ZapResult<()> {
        let mut chunk = *head;
        let mut steps = 0;
        while chunk != CHAIN_END {
            steps += 1;
            if steps > self.num_chunks() {
                return Err(ZapError::corrupt("array chain loops"));
            }
            let la = self.read_array_chunk(chunk)?;
            self.chunk_free(chunk)?;
            chunk = la.next;
        }
        *head = CHAIN_END;
        Ok(())
    }

    /// Moves the chain at `chunk` into `dest`, chunk by chunk, freeing the
    /// source chunks. Returns the head of the new chain in `dest`.
    pub(crate) fn array_transfer(&mut self, mut chunk: u16, dest: &mut Leaf<'_>) -> ZapResult<u16> {
        let mut head = CHAIN_END;
        let mut prev = CHAIN_END;
        let mut steps = 0;
        while chunk != CHAIN_END {
            steps += 1;
            if steps > self.num_chunks() {
                return Err(ZapError::corrupt("array chain loops"));
            }
            let nchunk = dest.chunk_alloc()?;
            let mut la = self.read_array_chunk(chunk)?;
            let next = la.next;
            la.next = CHAIN_END;
            dest.write_chunk(nchunk, &Chunk::Array(la))?;
            if prev == CHAIN_END {
                head = nchunk;
            } else {
                put_u16(dest.raw_chunk_mut(prev)?, LINK_NEXT, nchunk);
            }
            prev = nchunk;
            self.chunk_free(chunk)?;
            chunk = next;
        }
        Ok(head)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn with_leaf(f: impl FnOnce(&mut Leaf<'_>)) {
        let mut buf = vec![0u8; 4096];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        f(&mut leaf);
    }

    #[test]
    fn msb_first_packing() {
        with_leaf(|leaf| {
            let head = leaf.array_create(Ints::U32(&[0x0102_0304, 0x0506_0708])).unwrap();
            let la = leaf.read_array_chunk(head).unwrap();
            assert_eq!(&la.data[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
            assert!(la.data[8..].iter().all(|&b| b == 0));
            assert_eq!(la.next, CHAIN_END);
        });
    }

    #[test]
    fn integers_span_chunks() {
        with_leaf(|leaf| {
            let values: Vec<u64> = (0..10).map(|i| 0x1111_1111_1111_1111 * i).collect();
            let head = leaf.array_create(Ints::U64(&values)).unwrap();
            assert_eq!(leaf.nfree() as usize, leaf.num_chunks() - array_nchunks(80));
            let mut out = vec![0u64; 10];
            leaf.array_read(head, 8, 10, &mut IntsMut::U64(&mut out))
                .unwrap();
            assert_eq!(out, values);
        });
    }

    #[test]
    fn read_widens() {
        with_leaf(|leaf| {
            let head = leaf.array_create(Ints::U16(&[1, 0xffff, 3])).unwrap();
            let mut out = [0u64; 3];
            leaf.array_read(head, 2, 3, &mut IntsMut::U64(&mut out))
                .unwrap();
            assert_eq!(out, [1, 0xffff, 3]);
            let mut narrow = [0u8; 3];
            assert!(leaf
                .array_read(head, 2, 3, &mut IntsMut::U8(&mut narrow))
                .is_err());
        });
    }

    #[test]
    fn fixed_arrays_of_every_width() {
        assert_eq!(Ints::from(&[1u8, 2]), Ints::U8(&[1, 2]));
        assert_eq!(Ints::from(&[1u16, 2]), Ints::U16(&[1, 2]));
        assert_eq!(Ints::from(&[1u32, 2, 3]), Ints::U32(&[1, 2, 3]));
        assert_eq!(Ints::from(&[1u64]), Ints::U64(&[1]));

        let mut words = [0u16; 2];
        assert_eq!(IntsMut::from(&mut words).width(), 2);
        let mut dwords = [0u32; 3];
        let out = IntsMut::from(&mut dwords);
        assert_eq!((out.width(), out.len()), (4, 3));
    }

    #[test]
    fn single_u64_fast_path() {
        with_leaf(|leaf| {
            let head = leaf.array_create(Ints::U64(&[0xdead_beef_0000_0001])).unwrap();
            let mut out = [0u64; 1];
            leaf.array_read(head, 8, 1, &mut IntsMut::U64(&mut out))
                .unwrap();
            ensure_cov::assert_cov("zap_leaf::array::read::single_u64");
            assert_eq!(out[0], 0xdead_beef_0000_0001);
        });
    }

    #[test]
    fn byte_fast_path_copies_exact_length() {
        with_leaf(|leaf| {
            let name: Vec<u8> = (0..50u8).collect();
            let head = leaf.array_create(Ints::U8(&name)).unwrap();
            let mut out = vec![0xffu8; 100];
            leaf.array_read(head, 1, 50, &mut IntsMut::U8(&mut out))
                .unwrap();
            ensure_cov::assert_cov("zap_leaf::array::read::bytes");
            assert_eq!(&out[..50], &name[..]);
            assert!(out[50..].iter().all(|&b| b == 0xff));
        });
    }

    #[test]
    fn partial_read() {
        with_leaf(|leaf| {
            let head = leaf.array_create(Ints::U8(b"abcdefgh")).unwrap();
            let mut out = [0u8; 3];
            leaf.array_read(head, 1, 8, &mut IntsMut::U8(&mut out))
                .unwrap();
            assert_eq!(&out, b"abc");
        });
    }

    #[test]
    fn equal_stops_on_mismatch() {
        with_leaf(|leaf| {
            let name = b"a fairly long entry name spanning chunks";
            let head = leaf.array_create(Ints::U8(name)).unwrap();
            assert!(leaf.array_equal(head, name.len(), Ints::U8(name)).unwrap());
            let mut other = *name;
            other[30] = b'X';
            assert!(!leaf.array_equal(head, name.len(), Ints::U8(&other)).unwrap());
            assert!(!leaf.array_equal(head, name.len(), Ints::U8(b"short")).unwrap());

            let key = [7u64, 0x0102_0304_0506_0708, 9];
            let head = leaf.array_create(Ints::U64(&key)).unwrap();
            assert!(leaf.array_equal(head, 3, Ints::U64(&key)).unwrap());
            assert!(!leaf.array_equal(head, 3, Ints::U64(&[7, 0, 9])).unwrap());
        });
    }

    #[test]
    fn free_returns_every_chunk() {
        with_leaf(|leaf| {
            let before = leaf.nfree();
            let mut head = leaf.array_create(Ints::U8(&[1u8; 100])).unwrap();
            assert_eq!(leaf.nfree(), before - 5);
            leaf.array_free(&mut head).unwrap();
            assert_eq!(head, CHAIN_END);
            assert_eq!(leaf.nfree(), before);
        });
    }

    #[test]
    fn empty_array_has_no_chain() {
        with_leaf(|leaf| {
            let before = leaf.nfree();
            let mut head = leaf.array_create(Ints::U8(&[])).unwrap();
            assert_eq!(head, CHAIN_END);
            assert_eq!(leaf.nfree(), before);
            leaf.array_free(&mut head).unwrap();
            let mut out = [0u8; 4];
            leaf.array_read(head, 1, 0, &mut IntsMut::U8(&mut out))
                .unwrap();
        });
    }
}
