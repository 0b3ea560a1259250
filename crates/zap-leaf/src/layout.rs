use crate::error::{ZapError, ZapResult};

pub const SIZE_OF_U8: usize = std::mem::size_of::<u8>();
pub const SIZE_OF_U16: usize = std::mem::size_of::<u16>();
pub const SIZE_OF_U32: usize = std::mem::size_of::<u32>();
pub const SIZE_OF_U64: usize = std::mem::size_of::<u64>();

/// Size of every chunk in the chunk array.
pub const CHUNK_SIZE: usize = 24;
/// Payload bytes of an array chunk: the chunk minus the tag and the `next` link.
pub const ARRAY_BYTES: usize = CHUNK_SIZE - SIZE_OF_U8 - SIZE_OF_U16;
/// The header takes two chunk-equivalents at the start of the block.
pub const HEADER_SIZE: usize = 2 * CHUNK_SIZE;
/// End of a free list, bucket chain or array chain.
pub const CHAIN_END: u16 = 0xffff;

pub const LEAF_MAGIC: u32 = 0x2AB1EAF;
pub const BLOCK_TYPE_LEAF: u64 = 1 << 63;

/// Collision differentiators are assigned from `0..MAX_CD`.
pub const MAX_CD: u32 = u32::MAX;
pub const HISTOGRAM_SIZE: usize = 10;

pub const MIN_BLOCK_SHIFT: u8 = 9;
pub const MAX_BLOCK_SHIFT: u8 = 17;
pub const DEFAULT_BLOCK_SHIFT: u8 = 14;

// header field offsets
pub(crate) const HDR_BLOCK_TYPE: usize = 0;
pub(crate) const HDR_PREFIX: usize = 16;
pub(crate) const HDR_MAGIC: usize = 24;
pub(crate) const HDR_NFREE: usize = 28;
pub(crate) const HDR_NENTRIES: usize = 30;
pub(crate) const HDR_PREFIX_LEN: usize = 32;
pub(crate) const HDR_FREELIST: usize = 34;
pub(crate) const HDR_FLAGS: usize = 36;

/// Number of array chunks needed to hold `bytes` payload bytes.
pub const fn array_nchunks(bytes: usize) -> usize {
    (bytes + ARRAY_BYTES - 1) / ARRAY_BYTES
}

/// Sizes derived from the block shift.
///
/// ```text
/// ┌──────────────┬──────────────────────────┬──────────────────────────────┐
/// │ Header (48B) │ Hash table               │ Chunks                       │
/// │              │ 2^(shift-5) x u16        │ num_chunks x 24B             │
/// └──────────────┴──────────────────────────┴──────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafGeometry {
    block_shift: u8,
}

impl LeafGeometry {
    pub fn from_block_size(block_size: usize) -> ZapResult<Self> {
        if !block_size.is_power_of_two() {
            return Err(ZapError::invalid(format!(
                "block size {} is not a power of two",
                block_size
            )));
        }
        let block_shift = block_size.trailing_zeros() as u8;
        if !(MIN_BLOCK_SHIFT..=MAX_BLOCK_SHIFT).contains(&block_shift) {
            return Err(ZapError::invalid(format!(
                "block size {} is outside {}..={}",
                block_size,
                1usize << MIN_BLOCK_SHIFT,
                1usize << MAX_BLOCK_SHIFT
            )));
        }
        Ok(Self { block_shift })
    }

    pub fn block_shift(&self) -> u8 {
        self.block_shift
    }

    pub fn block_size(&self) -> usize {
        1 << self.block_shift
    }

    pub fn hash_shift(&self) -> u32 {
        self.block_shift as u32 - 5
    }

    pub fn hash_entries(&self) -> usize {
        1 << self.hash_shift()
    }

    pub fn num_chunks(&self) -> usize {
        (self.block_size() - SIZE_OF_U16 * self.hash_entries()) / CHUNK_SIZE - 2
    }

    pub(crate) fn hash_slot_offset(&self, slot: usize) -> usize {
        debug_assert!(slot < self.hash_entries());
        HEADER_SIZE + slot * SIZE_OF_U16
    }

    pub(crate) fn chunk_offset(&self, chunk: usize) -> usize {
        debug_assert!(chunk < self.num_chunks());
        HEADER_SIZE + SIZE_OF_U16 * self.hash_entries() + chunk * CHUNK_SIZE
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn geometry_of_common_sizes() {
        let g = LeafGeometry::from_block_size(4096).unwrap();
        assert_eq!(g.hash_entries(), 128);
        assert_eq!(g.num_chunks(), 158);
        assert_eq!(g.chunk_offset(157) + CHUNK_SIZE, 4096);

        let g = LeafGeometry::from_block_size(512).unwrap();
        assert_eq!(g.hash_entries(), 16);
        assert_eq!(g.num_chunks(), 18);

        let g = LeafGeometry::from_block_size(1 << 17).unwrap();
        assert_eq!(g.num_chunks(), 5118);
        assert!(g.num_chunks() < CHAIN_END as usize);
    }

    #[test]
    fn chunks_never_overflow_the_block() {
        for shift in MIN_BLOCK_SHIFT..=MAX_BLOCK_SHIFT {
            let g = LeafGeometry::from_block_size(1 << shift).unwrap();
            let end = g.chunk_offset(g.num_chunks() - 1) + CHUNK_SIZE;
            assert!(end <= g.block_size());
        }
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(LeafGeometry::from_block_size(4000).is_err());
        assert!(LeafGeometry::from_block_size(256).is_err());
        assert!(LeafGeometry::from_block_size(1 << 18).is_err());
    }

    #[test]
    fn nchunks_rounds_up() {
        assert_eq!(array_nchunks(0), 0);
        assert_eq!(array_nchunks(1), 1);
        assert_eq!(array_nchunks(ARRAY_BYTES), 1);
        assert_eq!(array_nchunks(ARRAY_BYTES + 1), 2);
    }
}
