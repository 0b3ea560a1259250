use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::{
    chunk::{Chunk, ChunkType, FreeChunk, LeafEntry},
    config::LeafConfig,
    error::{ZapError, ZapResult},
    layout::{
        array_nchunks, LeafGeometry, BLOCK_TYPE_LEAF, CHAIN_END, CHUNK_SIZE, HDR_BLOCK_TYPE,
        HDR_FLAGS, HDR_FREELIST, HDR_MAGIC, HDR_NENTRIES, HDR_NFREE, HDR_PREFIX, HDR_PREFIX_LEN,
        LEAF_MAGIC,
    },
    utils::{get_u16, get_u32, get_u64, put_u16, put_u32, put_u64, swap_u16, swap_u32, swap_u64},
};

/// Snapshot of the leaf header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LeafHeader {
    pub block_type: u64,
    pub prefix: u64,
    pub magic: u32,
    pub nfree: u16,
    pub nentries: u16,
    pub prefix_len: u16,
    pub freelist: u16,
    pub flags: u8,
}

/// How the chunks of a leaf are used, as counted by [`Leaf::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChunkUsage {
    pub free: usize,
    pub entry: usize,
    pub array: usize,
}

impl ChunkUsage {
    pub fn total(&self) -> usize {
        self.free + self.entry + self.array
    }
}

/// A place that holds the index of an entry chunk: a hash bucket or the
/// `next` field of the entry before it in the same bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChainLink {
    Bucket(usize),
    Entry(u16),
    /// Not part of any chain (handles from `lookup_closest`).
    Detached,
}

/// A leaf block of the hashed directory, viewed in place.
///
/// The leaf borrows the caller's buffer for its whole lifetime; holding the
/// `&mut` is what gives every operation exclusive access to the block.
pub struct Leaf<'a> {
    buf: &'a mut [u8],
    geometry: LeafGeometry,
    config: LeafConfig,
}

impl std::fmt::Debug for Leaf<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leaf")
            .field("block_size", &self.block_size())
            .field("header", &self.header())
            .field("config", &self.config)
            .finish()
    }
}

impl<'a> Leaf<'a> {
    /// Formats `buf` as an empty leaf. The block size is `buf.len()`.
    pub fn init(buf: &'a mut [u8]) -> ZapResult<Self> {
        Self::init_with_config(buf, LeafConfig::default())
    }

    pub fn init_with_config(buf: &'a mut [u8], config: LeafConfig) -> ZapResult<Self> {
        let geometry = LeafGeometry::from_block_size(buf.len())?;
        buf.fill(0);
        let mut leaf = Self {
            buf,
            geometry,
            config,
        };
        leaf.clear_hash_table();
        let num_chunks = geometry.num_chunks();
        for i in 0..num_chunks {
            let next = if i + 1 == num_chunks {
                CHAIN_END
            } else {
                (i + 1) as u16
            };
            leaf.write_chunk(i as u16, &Chunk::Free(FreeChunk { next }))?;
        }
        put_u64(leaf.buf, HDR_BLOCK_TYPE, BLOCK_TYPE_LEAF);
        put_u32(leaf.buf, HDR_MAGIC, LEAF_MAGIC);
        leaf.set_nfree(num_chunks as u16);
        leaf.set_freelist(0);
        trace!(
            "init leaf: block_size={} num_chunks={}",
            geometry.block_size(),
            num_chunks
        );
        Ok(leaf)
    }

    /// Wraps a block that already holds a leaf.
    pub fn open(buf: &'a mut [u8]) -> ZapResult<Self> {
        Self::open_with_config(buf, LeafConfig::default())
    }

    pub fn open_with_config(buf: &'a mut [u8], config: LeafConfig) -> ZapResult<Self> {
        let geometry = LeafGeometry::from_block_size(buf.len())?;
        let block_type = get_u64(buf, HDR_BLOCK_TYPE);
        if block_type != BLOCK_TYPE_LEAF {
            return Err(ZapError::corrupt(format!(
                "block type {:#x} is not a leaf",
                block_type
            )));
        }
        let magic = get_u32(buf, HDR_MAGIC);
        if magic != LEAF_MAGIC {
            return Err(ZapError::corrupt(format!("bad leaf magic {:#x}", magic)));
        }
        let leaf = Self {
            buf,
            geometry,
            config,
        };
        if leaf.nfree() as usize > leaf.num_chunks() {
            return Err(ZapError::corrupt(format!(
                "free count {} exceeds {} chunks",
                leaf.nfree(),
                leaf.num_chunks()
            )));
        }
        Ok(leaf)
    }

    pub fn header(&self) -> LeafHeader {
        LeafHeader {
            block_type: get_u64(self.buf, HDR_BLOCK_TYPE),
            prefix: self.prefix(),
            magic: get_u32(self.buf, HDR_MAGIC),
            nfree: self.nfree(),
            nentries: self.nentries(),
            prefix_len: self.prefix_len(),
            freelist: self.freelist(),
            flags: self.buf[HDR_FLAGS],
        }
    }

    pub fn config(&self) -> LeafConfig {
        self.config
    }

    pub fn block_size(&self) -> usize {
        self.geometry.block_size()
    }

    pub fn num_chunks(&self) -> usize {
        self.geometry.num_chunks()
    }

    pub fn hash_entries(&self) -> usize {
        self.geometry.hash_entries()
    }

    pub fn nentries(&self) -> u16 {
        get_u16(self.buf, HDR_NENTRIES)
    }

    pub fn nfree(&self) -> u16 {
        get_u16(self.buf, HDR_NFREE)
    }

    pub fn prefix(&self) -> u64 {
        get_u64(self.buf, HDR_PREFIX)
    }

    pub fn prefix_len(&self) -> u16 {
        get_u16(self.buf, HDR_PREFIX_LEN)
    }

    /// Whether `hash` falls in the part of the hash space this leaf serves.
    pub fn covers(&self, hash: u64) -> bool {
        match self.prefix_len() as u32 {
            0 => true,
            len @ 1..=64 => hash.checked_shr(64 - len).unwrap_or(0) == self.prefix(),
            _ => false,
        }
    }

    pub(crate) fn geometry(&self) -> LeafGeometry {
        self.geometry
    }

    pub(crate) fn buf(&self) -> &[u8] {
        self.buf
    }

    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        self.buf
    }

    pub(crate) fn freelist(&self) -> u16 {
        get_u16(self.buf, HDR_FREELIST)
    }

    pub(crate) fn set_freelist(&mut self, chunk: u16) {
        put_u16(self.buf, HDR_FREELIST, chunk);
    }

    pub(crate) fn set_nfree(&mut self, nfree: u16) {
        put_u16(self.buf, HDR_NFREE, nfree);
    }

    fn set_nentries(&mut self, nentries: u16) {
        put_u16(self.buf, HDR_NENTRIES, nentries);
    }

    pub(crate) fn add_nentries(&mut self, delta: i32) -> ZapResult<()> {
        let n = self.nentries() as i32 + delta;
        let n = u16::try_from(n)
            .map_err(|_| ZapError::corrupt(format!("entry count would become {}", n)))?;
        self.set_nentries(n);
        Ok(())
    }

    fn set_prefix(&mut self, prefix: u64, prefix_len: u16) {
        put_u64(self.buf, HDR_PREFIX, prefix);
        put_u16(self.buf, HDR_PREFIX_LEN, prefix_len);
    }

    /// Bucket of `hash`: the hash bits right below the leaf's prefix.
    pub(crate) fn bucket(&self, hash: u64) -> usize {
        let shift = 64u32.saturating_sub(self.geometry.hash_shift() + self.prefix_len() as u32);
        let mask = self.hash_entries() as u64 - 1;
        (hash.checked_shr(shift).unwrap_or(0) & mask) as usize
    }

    pub(crate) fn bucket_head(&self, bucket: usize) -> u16 {
        get_u16(self.buf, self.geometry.hash_slot_offset(bucket))
    }

    fn set_bucket_head(&mut self, bucket: usize, chunk: u16) {
        let offset = self.geometry.hash_slot_offset(bucket);
        put_u16(self.buf, offset, chunk);
    }

    fn clear_hash_table(&mut self) {
        for bucket in 0..self.hash_entries() {
            self.set_bucket_head(bucket, CHAIN_END);
        }
    }

    pub(crate) fn link_get(&self, link: ChainLink) -> ZapResult<u16> {
        match link {
            ChainLink::Bucket(bucket) => Ok(self.bucket_head(bucket)),
            ChainLink::Entry(chunk) => Ok(self.read_entry(chunk)?.next),
            ChainLink::Detached => Err(ZapError::invalid("detached chain link")),
        }
    }

    pub(crate) fn link_set(&mut self, link: ChainLink, target: u16) -> ZapResult<()> {
        match link {
            ChainLink::Bucket(bucket) => {
                self.set_bucket_head(bucket, target);
                Ok(())
            }
            ChainLink::Entry(chunk) => {
                let mut le = self.read_entry(chunk)?;
                le.next = target;
                self.write_entry(chunk, &le)
            }
            ChainLink::Detached => Err(ZapError::invalid("detached chain link")),
        }
    }

    /// Links the entry at `chunk` at the head of its bucket.
    pub(crate) fn rehash_entry(&mut self, chunk: u16, le: &mut LeafEntry) -> ZapResult<ChainLink> {
        let bucket = self.bucket(le.hash);
        le.next = self.bucket_head(bucket);
        self.write_entry(chunk, le)?;
        self.set_bucket_head(bucket, chunk);
        Ok(ChainLink::Bucket(bucket))
    }

    /// Moves every entry whose hash has the next prefix bit set into `dest`,
    /// which must be an empty leaf of the same size. Afterwards both leaves
    /// serve one half of this leaf's former hash range.
    #[tracing::instrument(level = "debug", skip_all, fields(prefix = self.prefix(), prefix_len = self.prefix_len()))]
    pub fn split(&mut self, dest: &mut Leaf<'_>) -> ZapResult<()> {
        if dest.geometry != self.geometry {
            return Err(ZapError::invalid(format!(
                "split target is {} bytes, source is {}",
                dest.block_size(),
                self.block_size()
            )));
        }
        if dest.nentries() != 0 || dest.nfree() as usize != dest.num_chunks() {
            return Err(ZapError::invalid("split target is not an empty leaf"));
        }
        let prefix_len = self.prefix_len();
        if prefix_len >= 64 {
            return Err(ZapError::invalid("leaf prefix already covers all hash bits"));
        }
        let bit = 63 - prefix_len as u32;

        let prefix = self.prefix() << 1;
        self.set_prefix(prefix, prefix_len + 1);
        dest.set_prefix(prefix | 1, prefix_len + 1);
        self.clear_hash_table();

        // physical order: sequential over the block, and the table is being
        // rebuilt anyway
        let mut moved = 0;
        for i in 0..self.num_chunks() as u16 {
            let mut le = match self.read_chunk(i)? {
                Chunk::Entry(le) => le,
                _ => continue,
            };
            if le.hash & (1 << bit) != 0 {
                self.transfer_entry(i, le, dest)?;
                moved += 1;
            } else {
                self.rehash_entry(i, &mut le)?;
            }
        }
        debug!(
            "split moved {} entries, {} stay",
            moved,
            self.nentries()
        );
        Ok(())
    }

    fn transfer_entry(&mut self, chunk: u16, le: LeafEntry, dest: &mut Leaf<'_>) -> ZapResult<()> {
        let nchunk = dest.chunk_alloc()?;
        let mut nle = le;
        nle.name_chunk = self.array_transfer(le.name_chunk, dest)?;
        nle.value_chunk = self.array_transfer(le.value_chunk, dest)?;
        dest.rehash_entry(nchunk, &mut nle)?;
        self.chunk_free(chunk)?;
        self.add_nentries(-1)?;
        dest.add_nentries(1)?;
        Ok(())
    }

    /// Walks every structure of the leaf and checks that they agree with
    /// each other and with the header.
    pub fn verify(&self) -> ZapResult<ChunkUsage> {
        let header = self.header();
        if header.block_type != BLOCK_TYPE_LEAF || header.magic != LEAF_MAGIC {
            return Err(ZapError::corrupt("bad leaf header"));
        }
        let num_chunks = self.num_chunks();
        let mut seen = FxHashSet::default();
        let mut usage = ChunkUsage::default();

        let mut chunk = header.freelist;
        while chunk != CHAIN_END {
            if !seen.insert(chunk) {
                return Err(ZapError::corrupt(format!("chunk {} reached twice", chunk)));
            }
            match self.read_chunk(chunk)? {
                Chunk::Free(lf) => chunk = lf.next,
                other => {
                    return Err(ZapError::corrupt(format!(
                        "free list holds {:?} chunk {}",
                        other.chunk_type(),
                        chunk
                    )))
                }
            }
            usage.free += 1;
        }
        if usage.free != header.nfree as usize {
            return Err(ZapError::corrupt(format!(
                "free list has {} chunks, header says {}",
                usage.free, header.nfree
            )));
        }

        let key_width = self.config.key_width();
        for bucket in 0..self.hash_entries() {
            let mut chunk = self.bucket_head(bucket);
            while chunk != CHAIN_END {
                if !seen.insert(chunk) {
                    return Err(ZapError::corrupt(format!("chunk {} reached twice", chunk)));
                }
                let le = self.read_entry(chunk)?;
                if self.bucket(le.hash) != bucket {
                    return Err(ZapError::corrupt(format!(
                        "entry {} with hash {:#x} sits in bucket {}",
                        chunk, le.hash, bucket
                    )));
                }
                if !self.covers(le.hash) {
                    return Err(ZapError::corrupt(format!(
                        "entry {} with hash {:#x} is outside the leaf prefix",
                        chunk, le.hash
                    )));
                }
                usage.entry += 1;
                usage.array += self.verify_array(
                    le.name_chunk,
                    le.name_numints as usize * key_width,
                    &mut seen,
                )?;
                usage.array += self.verify_array(
                    le.value_chunk,
                    le.value_numints as usize * le.value_intlen as usize,
                    &mut seen,
                )?;
                chunk = le.next;
            }
        }
        if usage.entry != header.nentries as usize {
            return Err(ZapError::corrupt(format!(
                "found {} entries, header says {}",
                usage.entry, header.nentries
            )));
        }
        if usage.total() != num_chunks {
            return Err(ZapError::corrupt(format!(
                "{} chunks accounted for out of {}",
                usage.total(),
                num_chunks
            )));
        }
        Ok(usage)
    }

    fn verify_array(
        &self,
        head: u16,
        nbytes: usize,
        seen: &mut FxHashSet<u16>,
    ) -> ZapResult<usize> {
        let expected = array_nchunks(nbytes);
        let mut count = 0;
        let mut chunk = head;
        while chunk != CHAIN_END {
            if !seen.insert(chunk) {
                return Err(ZapError::corrupt(format!("chunk {} reached twice", chunk)));
            }
            chunk = self.read_array_chunk(chunk)?.next;
            count += 1;
        }
        if count != expected {
            return Err(ZapError::corrupt(format!(
                "array at {} has {} chunks, its length needs {}",
                head, count, expected
            )));
        }
        Ok(count)
    }
}

/// Converts a leaf block written on a host of the other byte order.
///
/// Every chunk tag is checked before anything is touched, so a block with
/// an unknown tag is returned unchanged. Applying it twice restores the
/// original bytes.
pub fn byteswap(buf: &mut [u8]) -> ZapResult<()> {
    let geometry = LeafGeometry::from_block_size(buf.len())?;
    let num_chunks = geometry.num_chunks();
    for i in 0..num_chunks {
        ChunkType::try_from(buf[geometry.chunk_offset(i)])?;
    }

    swap_u64(buf, HDR_BLOCK_TYPE);
    swap_u64(buf, HDR_PREFIX);
    swap_u32(buf, HDR_MAGIC);
    swap_u16(buf, HDR_NFREE);
    swap_u16(buf, HDR_NENTRIES);
    swap_u16(buf, HDR_PREFIX_LEN);
    swap_u16(buf, HDR_FREELIST);

    for slot in 0..geometry.hash_entries() {
        swap_u16(buf, geometry.hash_slot_offset(slot));
    }

    for i in 0..num_chunks {
        let offset = geometry.chunk_offset(i);
        Chunk::byteswap(&mut buf[offset..offset + CHUNK_SIZE])?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn init_builds_free_list() {
        let mut buf = vec![0xaau8; 4096];
        let leaf = Leaf::init(&mut buf).unwrap();
        let header = leaf.header();
        assert_eq!(header.block_type, BLOCK_TYPE_LEAF);
        assert_eq!(header.magic, LEAF_MAGIC);
        assert_eq!(header.nfree, 158);
        assert_eq!(header.nentries, 0);
        assert_eq!(header.prefix_len, 0);
        assert_eq!(header.freelist, 0);
        assert!((0..leaf.hash_entries()).all(|b| leaf.bucket_head(b) == CHAIN_END));
        assert_eq!(
            leaf.read_chunk(157).unwrap(),
            Chunk::Free(FreeChunk { next: CHAIN_END })
        );
        assert_eq!(
            leaf.read_chunk(3).unwrap(),
            Chunk::Free(FreeChunk { next: 4 })
        );
        let usage = leaf.verify().unwrap();
        assert_eq!(usage.free, 158);
    }

    #[test]
    fn open_checks_header() {
        let mut buf = vec![0u8; 4096];
        assert!(Leaf::open(&mut buf).unwrap_err().is_corruption());
        Leaf::init(&mut buf).unwrap();
        assert!(Leaf::open(&mut buf).is_ok());
        let mut odd = vec![0u8; 3000];
        assert!(matches!(
            Leaf::init(&mut odd),
            Err(ZapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn bucket_uses_bits_below_prefix() {
        let mut buf = vec![0u8; 4096];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        // 128 buckets: the top 7 bits pick the bucket
        assert_eq!(leaf.bucket(0x0200_0000_0000_0000), 1);
        assert_eq!(leaf.bucket(u64::MAX), 127);
        assert_eq!(leaf.bucket(5), 0);
        leaf.set_prefix(1, 1);
        assert_eq!(leaf.bucket(0x8100_0000_0000_0000), 1);
        assert!(leaf.covers(0x8100_0000_0000_0000));
        assert!(!leaf.covers(0x0100_0000_0000_0000));
    }

    #[test]
    fn alloc_and_free_track_count() {
        let mut buf = vec![0u8; 512];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        let a = leaf.chunk_alloc().unwrap();
        let b = leaf.chunk_alloc().unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(leaf.nfree(), 16);
        leaf.write_chunk(a, &Chunk::Array(Default::default())).unwrap();
        leaf.chunk_free(a).unwrap();
        assert_eq!(leaf.nfree(), 17);
        assert_eq!(leaf.freelist(), a);
        assert!(leaf.chunk_free(a).unwrap_err().is_corruption());
    }

    #[test]
    fn byteswap_rejects_unknown_tag_untouched() {
        let mut buf = vec![0u8; 512];
        Leaf::init(&mut buf).unwrap();
        let geometry = LeafGeometry::from_block_size(512).unwrap();
        buf[geometry.chunk_offset(5)] = 17;
        let before = buf.clone();
        assert!(byteswap(&mut buf).unwrap_err().is_corruption());
        assert_eq!(buf, before);
    }
}
