//! # ZAP Leaf Documentation
//!
//! A leaf is one fixed-size block of a hashed attribute/directory store. It holds
//! many (name, value) pairs packed into uniform 24-byte chunks and finds them
//! through a small hash table embedded in the same block. Names and values of
//! any length live in chains of array chunks linked by `u16` chunk indices, so
//! a leaf never points outside its own block.
//!
//! ## Overall Structure
//!
//! ┌──────────────────────────────────────────────────────────────────────────────────┐
//! │ Leaf Block (2^9 ..= 2^17 bytes)                                                  │
//! │┌ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┐│
//! │        Header         │        Hash Table          │           Chunks              │
//! ││      48 bytes       │ 2^(block_shift-5) x u16    │      num_chunks x 24 bytes   ││
//! │ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┴ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┴ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘│
//! └──────────────────────────────────────────────────────────────────────────────────┘
//!
//! ### Header
//!
//! ┌──────────────────────────────────────────────────────────────────────────────────────────┐
//! │ Header                                                                                   │
//! │┌ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ┬ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ┬ ─ ─ ─ ┐│
//! │  block type  reserved   prefix    magic    nfree   nentries  prefix len  freelist   flags │
//! ││    u64    │   u64   │   u64   │   u32   │  u16  │    u16    │    u16    │   u16   │  u8  ││
//! │ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ │
//! └──────────────────────────────────────────────────────────────────────────────────────────┘
//!
//! The remaining 11 bytes are reserved. All header fields, hash slots and
//! chunk links are stored in the byte order of the host that wrote the block;
//! [`byteswap`] converts a block from the other order.
//!
//! ### Hash Table
//!
//! Slot `i` holds the first entry chunk of bucket `i` or `CHAIN_END`. The bucket
//! of a hash is taken from the bits right below the leaf's prefix:
//!
//! ```text
//! bucket(h) = (h >> (64 - hash_shift - prefix_len)) & (hash_entries - 1)
//! ```
//!
//! ### Chunks
//!
//! Each chunk is an entry, a piece of an array or free; see [`chunk`] for the
//! encodings. An entry costs one chunk plus `ceil(bytes / 21)` chunks for each
//! of its name and value.
//!
//! ## Operations
//!
//! 1. [`Leaf::init`] formats a buffer; [`Leaf::open`] wraps an existing leaf.
//! 2. [`Leaf::lookup`], [`Leaf::lookup_closest`] find entries and return an
//!    [`EntryHandle`].
//! 3. [`Leaf::entry_create`], [`Leaf::entry_update`], [`Leaf::entry_remove`]
//!    mutate the leaf. `InsufficientSpace` asks the caller to [`Leaf::split`]
//!    and retry.
//! 4. [`Leaf::entry_read`], [`Leaf::entry_read_name`] copy data out.
//! 5. [`Leaf::stats`] and [`Leaf::verify`] are diagnostics.
//!
pub mod array;
pub mod chunk;
pub mod config;
pub mod entry;
pub mod error;
pub mod hash;
pub mod layout;
pub mod leaf;
pub mod stats;
mod utils;

pub use array::{ints_nchunks, Ints, IntsMut};
pub use config::LeafConfig;
pub use entry::EntryHandle;
pub use error::{ZapError, ZapResult};
pub use hash::{zap_hash, HASH_BITS, HASH_BITS_WIDE};
pub use layout::{
    LeafGeometry, ARRAY_BYTES, CHAIN_END, CHUNK_SIZE, DEFAULT_BLOCK_SHIFT, HEADER_SIZE,
    MAX_BLOCK_SHIFT, MAX_CD, MIN_BLOCK_SHIFT,
};
pub use leaf::{byteswap, ChunkUsage, Leaf, LeafHeader};
pub use stats::ZapStats;
