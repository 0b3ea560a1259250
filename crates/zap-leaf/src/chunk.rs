//! Tagged chunks and the chunk free list.
//!
//! Every chunk starts with a one-byte tag:
//!
//! ```text
//! Entry (252)
//! ┌──────┬────────┬──────┬───────────┬────────────┬────────────┬─────────────┬──────┬──────┐
//! │ tag  │ intlen │ next │ name head │ name len   │ value head │ value len   │  cd  │ hash │
//! │ u8   │ u8     │ u16  │ u16       │ u16        │ u16        │ u16         │ u32  │ u64  │
//! └──────┴────────┴──────┴───────────┴────────────┴────────────┴─────────────┴──────┴──────┘
//! Array (251)                               Free (253)
//! ┌──────┬──────────────────┬──────┐        ┌──────┬──────────────────┬──────┐
//! │ tag  │ payload          │ next │        │ tag  │ zero             │ next │
//! │ u8   │ 21 bytes         │ u16  │        │ u8   │ 21 bytes         │ u16  │
//! └──────┴──────────────────┴──────┘        └──────┴──────────────────┴──────┘
//! ```

use bytes::{Buf, BufMut};
use enum_as_inner::EnumAsInner;

use crate::{
    error::{ZapError, ZapResult},
    layout::{ARRAY_BYTES, CHAIN_END, CHUNK_SIZE},
    leaf::Leaf,
    utils::{swap_u16, swap_u32, swap_u64},
};

pub(crate) const ENTRY_NEXT: usize = 2;
pub(crate) const ENTRY_NAME_CHUNK: usize = 4;
pub(crate) const ENTRY_NAME_NUMINTS: usize = 6;
pub(crate) const ENTRY_VALUE_CHUNK: usize = 8;
pub(crate) const ENTRY_VALUE_NUMINTS: usize = 10;
pub(crate) const ENTRY_CD: usize = 12;
pub(crate) const ENTRY_HASH: usize = 16;
/// `next` of array and free chunks sits after the payload.
pub(crate) const LINK_NEXT: usize = 1 + ARRAY_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    Array = 251,
    Entry = 252,
    Free = 253,
}

impl TryFrom<u8> for ChunkType {
    type Error = ZapError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            251 => Ok(ChunkType::Array),
            252 => Ok(ChunkType::Entry),
            253 => Ok(ChunkType::Free),
            _ => Err(ZapError::corrupt(format!("bad chunk type {}", value))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafEntry {
    pub value_intlen: u8,
    pub next: u16,
    pub name_chunk: u16,
    pub name_numints: u16,
    pub value_chunk: u16,
    pub value_numints: u16,
    pub cd: u32,
    pub hash: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayChunk {
    pub data: [u8; ARRAY_BYTES],
    pub next: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeChunk {
    pub next: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumAsInner)]
pub enum Chunk {
    Entry(LeafEntry),
    Array(ArrayChunk),
    Free(FreeChunk),
}

impl Chunk {
    pub fn chunk_type(&self) -> ChunkType {
        match self {
            Chunk::Entry(_) => ChunkType::Entry,
            Chunk::Array(_) => ChunkType::Array,
            Chunk::Free(_) => ChunkType::Free,
        }
    }

    pub fn decode(raw: &[u8]) -> ZapResult<Self> {
        debug_assert_eq!(raw.len(), CHUNK_SIZE);
        let mut buf = raw;
        let tag = ChunkType::try_from(buf.get_u8())?;
        Ok(match tag {
            ChunkType::Entry => Chunk::Entry(LeafEntry {
                value_intlen: buf.get_u8(),
                next: buf.get_u16_ne(),
                name_chunk: buf.get_u16_ne(),
                name_numints: buf.get_u16_ne(),
                value_chunk: buf.get_u16_ne(),
                value_numints: buf.get_u16_ne(),
                cd: buf.get_u32_ne(),
                hash: buf.get_u64_ne(),
            }),
            ChunkType::Array => {
                let mut data = [0; ARRAY_BYTES];
                buf.copy_to_slice(&mut data);
                Chunk::Array(ArrayChunk {
                    data,
                    next: buf.get_u16_ne(),
                })
            }
            ChunkType::Free => {
                buf.advance(ARRAY_BYTES);
                Chunk::Free(FreeChunk {
                    next: buf.get_u16_ne(),
                })
            }
        })
    }

    pub fn encode(&self, raw: &mut [u8]) {
        debug_assert_eq!(raw.len(), CHUNK_SIZE);
        let mut buf = raw;
        buf.put_u8(self.chunk_type() as u8);
        match self {
            Chunk::Entry(le) => {
                buf.put_u8(le.value_intlen);
                buf.put_u16_ne(le.next);
                buf.put_u16_ne(le.name_chunk);
                buf.put_u16_ne(le.name_numints);
                buf.put_u16_ne(le.value_chunk);
                buf.put_u16_ne(le.value_numints);
                buf.put_u32_ne(le.cd);
                buf.put_u64_ne(le.hash);
            }
            Chunk::Array(la) => {
                buf.put_slice(&la.data);
                buf.put_u16_ne(la.next);
            }
            Chunk::Free(lf) => {
                // zeroed so that free space compresses well
                buf.put_bytes(0, ARRAY_BYTES);
                buf.put_u16_ne(lf.next);
            }
        }
    }

    /// Swaps the multi-byte fields of one raw chunk in place. Array payload
    /// is left alone, it is MSB-first regardless of host order.
    pub(crate) fn byteswap(raw: &mut [u8]) -> ZapResult<()> {
        match ChunkType::try_from(raw[0])? {
            ChunkType::Entry => {
                swap_u16(raw, ENTRY_NEXT);
                swap_u16(raw, ENTRY_NAME_CHUNK);
                swap_u16(raw, ENTRY_NAME_NUMINTS);
                swap_u16(raw, ENTRY_VALUE_CHUNK);
                swap_u16(raw, ENTRY_VALUE_NUMINTS);
                swap_u32(raw, ENTRY_CD);
                swap_u64(raw, ENTRY_HASH);
            }
            ChunkType::Array | ChunkType::Free => {
                swap_u16(raw, LINK_NEXT);
            }
        }
        Ok(())
    }
}

impl<'a> Leaf<'a> {
    fn check_chunk_index(&self, chunk: u16) -> ZapResult<usize> {
        let idx = chunk as usize;
        if idx >= self.num_chunks() {
            return Err(ZapError::corrupt(format!(
                "chunk index {} out of range (num chunks {})",
                chunk,
                self.num_chunks()
            )));
        }
        Ok(idx)
    }

    pub(crate) fn raw_chunk(&self, chunk: u16) -> ZapResult<&[u8]> {
        let idx = self.check_chunk_index(chunk)?;
        let offset = self.geometry().chunk_offset(idx);
        Ok(&self.buf()[offset..offset + CHUNK_SIZE])
    }

    pub(crate) fn raw_chunk_mut(&mut self, chunk: u16) -> ZapResult<&mut [u8]> {
        let idx = self.check_chunk_index(chunk)?;
        let offset = self.geometry().chunk_offset(idx);
        Ok(&mut self.buf_mut()[offset..offset + CHUNK_SIZE])
    }

    pub(crate) fn read_chunk(&self, chunk: u16) -> ZapResult<Chunk> {
        Chunk::decode(self.raw_chunk(chunk)?)
    }

    pub(crate) fn write_chunk(&mut self, chunk: u16, value: &Chunk) -> ZapResult<()> {
        value.encode(self.raw_chunk_mut(chunk)?);
        Ok(())
    }

    pub(crate) fn read_entry(&self, chunk: u16) -> ZapResult<LeafEntry> {
        match self.read_chunk(chunk)? {
            Chunk::Entry(le) => Ok(le),
            other => Err(ZapError::corrupt(format!(
                "chunk {} is {:?}, expected an entry",
                chunk,
                other.chunk_type()
            ))),
        }
    }

    pub(crate) fn write_entry(&mut self, chunk: u16, le: &LeafEntry) -> ZapResult<()> {
        self.write_chunk(chunk, &Chunk::Entry(*le))
    }

    pub(crate) fn read_array_chunk(&self, chunk: u16) -> ZapResult<ArrayChunk> {
        match self.read_chunk(chunk)? {
            Chunk::Array(la) => Ok(la),
            other => Err(ZapError::corrupt(format!(
                "chunk {} is {:?}, expected an array chunk",
                chunk,
                other.chunk_type()
            ))),
        }
    }

    /// Pops the head of the free list.
    ///
    /// Callers check `nfree` against the chunks they need before starting,
    /// so an empty or broken free list means the block is corrupted.
    pub(crate) fn chunk_alloc(&mut self) -> ZapResult<u16> {
        let nfree = self.nfree();
        if nfree == 0 {
            return Err(ZapError::corrupt("chunk allocation from an empty free list"));
        }
        let chunk = self.freelist();
        let free = match self.read_chunk(chunk)? {
            Chunk::Free(lf) => lf,
            other => {
                return Err(ZapError::corrupt(format!(
                    "free list head {} is {:?}",
                    chunk,
                    other.chunk_type()
                )))
            }
        };
        self.set_freelist(free.next);
        self.set_nfree(nfree - 1);
        Ok(chunk)
    }

    /// Pushes a chunk onto the free list.
    pub(crate) fn chunk_free(&mut self, chunk: u16) -> ZapResult<()> {
        let nfree = self.nfree();
        if nfree as usize >= self.num_chunks() {
            return Err(ZapError::corrupt("free count already covers every chunk"));
        }
        let raw = self.raw_chunk(chunk)?;
        if raw[0] == ChunkType::Free as u8 {
            return Err(ZapError::corrupt(format!("chunk {} freed twice", chunk)));
        }
        let next = self.freelist();
        self.write_chunk(chunk, &Chunk::Free(FreeChunk { next }))?;
        self.set_freelist(chunk);
        self.set_nfree(nfree + 1);
        Ok(())
    }
}

impl Default for ArrayChunk {
    fn default() -> Self {
        Self {
            data: [0; ARRAY_BYTES],
            next: CHAIN_END,
        }
    }
}
