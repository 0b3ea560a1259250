//! Hash buckets and the entry operations.
//!
//! Each bucket of the hash table heads a singly linked chain of entry
//! chunks. New entries are linked at the head of their bucket, so chains are
//! in no particular hash or cd order.

use tracing::trace;

use crate::{
    array::{ints_nchunks, Ints, IntsMut},
    chunk::{Chunk, LeafEntry},
    error::{ZapError, ZapResult},
    layout::{array_nchunks, CHAIN_END},
    leaf::{ChainLink, Leaf},
};

/// A located entry.
///
/// The handle remembers where the entry is linked from so that it can be
/// removed without walking the bucket again. It does not borrow the leaf:
/// any mutation made without it leaves it stale, and stale handles are
/// rejected with [`ZapError::InvalidArgument`] where that can be detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle {
    link: ChainLink,
    chunk: u16,
    hash: u64,
    cd: u32,
    integer_size: u8,
    num_integers: u16,
    name_numints: u16,
}

impl EntryHandle {
    fn new(link: ChainLink, chunk: u16, le: &LeafEntry) -> Self {
        Self {
            link,
            chunk,
            hash: le.hash,
            cd: le.cd,
            integer_size: le.value_intlen,
            num_integers: le.value_numints,
            name_numints: le.name_numints,
        }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn cd(&self) -> u32 {
        self.cd
    }

    /// Width in bytes of the value integers.
    pub fn integer_size(&self) -> usize {
        self.integer_size as usize
    }

    /// Number of integers in the value.
    pub fn num_integers(&self) -> usize {
        self.num_integers as usize
    }

    /// Number of integers in the name.
    pub fn name_len(&self) -> usize {
        self.name_numints as usize
    }

    /// Index of the entry chunk.
    pub fn chunk(&self) -> u16 {
        self.chunk
    }

    /// Handles from [`Leaf::lookup_closest`] do not know their chain link.
    pub fn is_detached(&self) -> bool {
        self.link == ChainLink::Detached
    }
}

impl<'a> Leaf<'a> {
    fn check_key_width(&self, name: &Ints<'_>) -> ZapResult<()> {
        let key_width = self.config().key_width();
        if name.width() != key_width {
            return Err(ZapError::invalid(format!(
                "name has {}-byte integers, keys of this leaf are {}-byte",
                name.width(),
                key_width
            )));
        }
        Ok(())
    }

    /// Next entry of a bucket chain, with the walk bounded by the chunk count.
    fn chain_step(&self, chunk: u16, steps: &mut usize) -> ZapResult<LeafEntry> {
        *steps += 1;
        if *steps > self.num_chunks() {
            return Err(ZapError::corrupt("bucket chain loops"));
        }
        self.read_entry(chunk)
    }

    /// Re-reads the entry a handle points at, rejecting handles whose chunk
    /// has since been freed or reused.
    fn resolve(&self, handle: &EntryHandle) -> ZapResult<LeafEntry> {
        match self.read_chunk(handle.chunk)? {
            Chunk::Entry(le) if le.hash == handle.hash && le.cd == handle.cd => Ok(le),
            _ => Err(ZapError::invalid(format!(
                "stale handle for chunk {}",
                handle.chunk
            ))),
        }
    }

    /// Finds the link holding `chunk` by walking its bucket.
    fn find_link(&self, chunk: u16, hash: u64) -> ZapResult<ChainLink> {
        let mut link = ChainLink::Bucket(self.bucket(hash));
        let mut cur = self.link_get(link)?;
        let mut steps = 0;
        while cur != CHAIN_END {
            if cur == chunk {
                return Ok(link);
            }
            let le = self.chain_step(cur, &mut steps)?;
            link = ChainLink::Entry(cur);
            cur = le.next;
        }
        Err(ZapError::invalid(format!(
            "chunk {} is not linked in its bucket",
            chunk
        )))
    }

    /// Finds the entry with this exact hash and name.
    pub fn lookup<'n>(&self, name: impl Into<Ints<'n>>, hash: u64) -> ZapResult<EntryHandle> {
        let name = name.into();
        self.check_key_width(&name)?;
        let mut link = ChainLink::Bucket(self.bucket(hash));
        let mut chunk = self.link_get(link)?;
        let mut steps = 0;
        while chunk != CHAIN_END {
            let le = self.chain_step(chunk, &mut steps)?;
            if le.hash == hash && self.array_equal(le.name_chunk, le.name_numints as usize, name)? {
                trace!("lookup hash={:#x} found cd={} at chunk {}", hash, le.cd, chunk);
                return Ok(EntryHandle::new(link, chunk, &le));
            }
            link = ChainLink::Entry(chunk);
            chunk = le.next;
        }
        trace!("lookup hash={:#x} missed", hash);
        Err(ZapError::NotFound)
    }

    /// Finds the entry with the smallest `(hash, cd)` that is not below the
    /// given pair. Used to iterate a leaf in hash order.
    ///
    /// Buckets are scanned upward from the bucket of `hash`. A bucket after
    /// the one holding the best candidate so far can only hold larger
    /// hashes, so the scan stops there.
    pub fn lookup_closest(&self, hash: u64, cd: u32) -> ZapResult<EntryHandle> {
        let mut best: Option<(u16, LeafEntry)> = None;
        let mut best_bucket = self.hash_entries() - 1;
        let mut bucket = self.bucket(hash);
        while bucket <= best_bucket {
            let mut chunk = self.bucket_head(bucket);
            let mut steps = 0;
            while chunk != CHAIN_END {
                let le = self.chain_step(chunk, &mut steps)?;
                let candidate = (le.hash, le.cd);
                if candidate >= (hash, cd)
                    && best.map_or(true, |(_, b)| candidate <= (b.hash, b.cd))
                {
                    best = Some((chunk, le));
                    best_bucket = bucket;
                }
                chunk = le.next;
            }
            bucket += 1;
        }
        match best {
            Some((chunk, le)) => {
                trace!(
                    "closest to ({:#x}, {}) is ({:#x}, {})",
                    hash,
                    cd,
                    le.hash,
                    le.cd
                );
                Ok(EntryHandle::new(ChainLink::Detached, chunk, &le))
            }
            None => Err(ZapError::NotFound),
        }
    }

    /// Lowest cd in `0..max_cd` not taken by an entry with `hash`.
    fn unused_cd(&self, hash: u64) -> ZapResult<u32> {
        let head = self.bucket_head(self.bucket(hash));
        'next_cd: for cd in 0..self.config().cd_limit() {
            let mut chunk = head;
            let mut steps = 0;
            while chunk != CHAIN_END {
                let le = self.chain_step(chunk, &mut steps)?;
                if le.hash == hash && le.cd == cd {
                    continue 'next_cd;
                }
                chunk = le.next;
            }
            return Ok(cd);
        }
        Err(ZapError::NoSpace { hash })
    }

    /// Adds an entry. With `cd == None` the lowest free collision
    /// differentiator for `hash` is assigned.
    ///
    /// The caller is expected to have checked with [`Leaf::lookup`] that
    /// the name is not present yet.
    pub fn entry_create<'n, 'v>(
        &mut self,
        name: impl Into<Ints<'n>>,
        hash: u64,
        cd: Option<u32>,
        value: impl Into<Ints<'v>>,
    ) -> ZapResult<EntryHandle> {
        let name = name.into();
        let value = value.into();
        self.check_key_width(&name)?;

        let needed = 1 + ints_nchunks(name) + ints_nchunks(value);
        if needed > self.num_chunks()
            || name.len() > u16::MAX as usize
            || value.len() > u16::MAX as usize
        {
            return Err(ZapError::TooLarge {
                needed,
                capacity: self.num_chunks(),
            });
        }

        let cd = match cd {
            Some(cd) if cd >= self.config().cd_limit() => {
                return Err(ZapError::invalid(format!(
                    "cd {} is not below {}",
                    cd,
                    self.config().cd_limit()
                )))
            }
            Some(cd) => cd,
            None => self.unused_cd(hash)?,
        };

        let free = self.nfree() as usize;
        if free < needed {
            return Err(ZapError::InsufficientSpace { needed, free });
        }

        let chunk = self.chunk_alloc()?;
        let name_chunk = self.array_create(name)?;
        let value_chunk = self.array_create(value)?;
        let mut le = LeafEntry {
            value_intlen: value.width() as u8,
            next: CHAIN_END,
            name_chunk,
            name_numints: name.len() as u16,
            value_chunk,
            value_numints: value.len() as u16,
            cd,
            hash,
        };
        let link = self.rehash_entry(chunk, &mut le)?;
        self.add_nentries(1)?;
        trace!(
            "create hash={:#x} cd={} at chunk {} using {} chunks",
            hash,
            cd,
            chunk,
            needed
        );
        Ok(EntryHandle::new(link, chunk, &le))
    }

    /// Replaces the value of an entry. On `InsufficientSpace` the leaf is
    /// unchanged.
    pub fn entry_update<'v>(
        &mut self,
        handle: &mut EntryHandle,
        value: impl Into<Ints<'v>>,
    ) -> ZapResult<()> {
        let value = value.into();
        let mut le = self.resolve(handle)?;
        let key_width = self.config().key_width();
        let old = array_nchunks(le.value_numints as usize * le.value_intlen as usize);
        let new = ints_nchunks(value);
        let name_chunks = array_nchunks(le.name_numints as usize * key_width);
        if value.len() > u16::MAX as usize || 1 + name_chunks + new > self.num_chunks() {
            return Err(ZapError::TooLarge {
                needed: 1 + name_chunks + new,
                capacity: self.num_chunks(),
            });
        }
        let free = self.nfree() as usize;
        if new > old && free < new - old {
            return Err(ZapError::InsufficientSpace {
                needed: new - old,
                free,
            });
        }

        self.array_free(&mut le.value_chunk)?;
        le.value_chunk = self.array_create(value)?;
        le.value_intlen = value.width() as u8;
        le.value_numints = value.len() as u16;
        self.write_entry(handle.chunk, &le)?;
        handle.integer_size = le.value_intlen;
        handle.num_integers = le.value_numints;
        trace!(
            "update hash={:#x} cd={} value chunks {} -> {}",
            le.hash,
            le.cd,
            old,
            new
        );
        Ok(())
    }

    /// Deletes an entry together with its name and value.
    pub fn entry_remove(&mut self, handle: EntryHandle) -> ZapResult<()> {
        let mut le = self.resolve(&handle)?;
        debug_assert!(
            !handle.is_detached(),
            "entry_remove needs a handle from lookup or entry_create"
        );
        // the cached link is a hint; the predecessor may have been removed
        let cached = match handle.link {
            ChainLink::Bucket(bucket) => self.bucket_head(bucket) == handle.chunk,
            ChainLink::Entry(prev) => matches!(
                self.read_chunk(prev)?,
                Chunk::Entry(p) if p.next == handle.chunk
            ),
            ChainLink::Detached => false,
        };
        let link = if cached {
            handle.link
        } else {
            self.find_link(handle.chunk, le.hash)?
        };

        self.array_free(&mut le.name_chunk)?;
        self.array_free(&mut le.value_chunk)?;
        self.link_set(link, le.next)?;
        self.chunk_free(handle.chunk)?;
        self.add_nentries(-1)?;
        trace!("remove hash={:#x} cd={} at chunk {}", le.hash, le.cd, handle.chunk);
        Ok(())
    }

    /// Reads the value into `out`. If `out` is too short the first
    /// `out.len()` integers are written and `Truncated` is returned.
    pub fn entry_read<'o>(
        &self,
        handle: &EntryHandle,
        out: impl Into<IntsMut<'o>>,
    ) -> ZapResult<()> {
        let mut out = out.into();
        let le = self.resolve(handle)?;
        self.array_read(
            le.value_chunk,
            le.value_intlen as usize,
            le.value_numints as usize,
            &mut out,
        )?;
        if le.value_numints as usize > out.len() {
            return Err(ZapError::Truncated {
                stored: le.value_numints as usize,
                capacity: out.len(),
            });
        }
        Ok(())
    }

    /// Reads the name into `out`, whose width must be the key width.
    pub fn entry_read_name<'o>(
        &self,
        handle: &EntryHandle,
        out: impl Into<IntsMut<'o>>,
    ) -> ZapResult<()> {
        let mut out = out.into();
        let key_width = self.config().key_width();
        if out.width() != key_width {
            return Err(ZapError::invalid(format!(
                "name buffer has {}-byte slots, keys are {}-byte",
                out.width(),
                key_width
            )));
        }
        let le = self.resolve(handle)?;
        self.array_read(
            le.name_chunk,
            key_width,
            le.name_numints as usize,
            &mut out,
        )?;
        if le.name_numints as usize > out.len() {
            return Err(ZapError::Truncated {
                stored: le.name_numints as usize,
                capacity: out.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::LeafConfig;

    #[test]
    fn create_links_at_bucket_head() {
        let mut buf = vec![0u8; 4096];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        let a = leaf.entry_create("a", 42, None, &[1u64]).unwrap();
        let b = leaf.entry_create("b", 42, None, &[2u64]).unwrap();
        assert_eq!(a.cd(), 0);
        assert_eq!(b.cd(), 1);
        assert_eq!(leaf.bucket_head(leaf.bucket(42)), b.chunk());
        let found = leaf.lookup("a", 42).unwrap();
        assert_eq!(found.link, ChainLink::Entry(b.chunk()));
        assert_eq!(leaf.nentries(), 2);
    }

    #[test]
    fn auto_cd_fills_gaps() {
        let mut buf = vec![0u8; 4096];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        for name in ["x", "y", "z"] {
            leaf.entry_create(name, 7, None, &[0u8]).unwrap();
        }
        let y = leaf.lookup("y", 7).unwrap();
        assert_eq!(y.cd(), 1);
        leaf.entry_remove(y).unwrap();
        let w = leaf.entry_create("w", 7, None, &[0u8]).unwrap();
        assert_eq!(w.cd(), 1);
        let v = leaf.entry_create("v", 7, None, &[0u8]).unwrap();
        assert_eq!(v.cd(), 3);
    }

    #[test]
    fn explicit_cd_must_be_below_limit() {
        let mut buf = vec![0u8; 4096];
        let config = LeafConfig::new().max_cd(4);
        let mut leaf = Leaf::init_with_config(&mut buf, config).unwrap();
        assert!(matches!(
            leaf.entry_create("a", 1, Some(4), &[0u8]),
            Err(ZapError::InvalidArgument(_))
        ));
        assert_eq!(leaf.entry_create("a", 1, Some(3), &[0u8]).unwrap().cd(), 3);
    }

    #[test]
    fn name_width_must_match_keys() {
        let mut buf = vec![0u8; 4096];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        assert!(matches!(
            leaf.entry_create(&[1u64, 2], 1, None, &[0u8]),
            Err(ZapError::InvalidArgument(_))
        ));
        assert!(matches!(
            leaf.lookup(&[1u64], 1),
            Err(ZapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn update_in_place_keeps_accounting() {
        let mut buf = vec![0u8; 4096];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        let mut h = leaf.entry_create("k", 9, None, &[1u8; 10]).unwrap();
        let free = leaf.nfree();
        leaf.entry_update(&mut h, &[5u64; 8]).unwrap();
        assert_eq!(leaf.nfree(), free - 3);
        assert_eq!(h.integer_size(), 8);
        assert_eq!(h.num_integers(), 8);
        let mut out = [0u64; 8];
        leaf.entry_read(&h, &mut out).unwrap();
        assert_eq!(out, [5u64; 8]);
        leaf.entry_update(&mut h, &[1u8]).unwrap();
        assert_eq!(leaf.nfree(), free);
        leaf.verify().unwrap();
    }

    #[test]
    fn update_without_room_changes_nothing() {
        let mut buf = vec![0u8; 512];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        let mut h = leaf.entry_create("k", 9, None, &[1u8]).unwrap();
        leaf.entry_create("filler", 1 << 63, None, &[0u8; 200]).unwrap();
        let before = leaf.nfree();
        let err = leaf.entry_update(&mut h, &[2u8; 100]).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(leaf.nfree(), before);
        let mut out = [0u8; 1];
        leaf.entry_read(&h, &mut out).unwrap();
        assert_eq!(out, [1]);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut buf = vec![0u8; 4096];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        let h = leaf.entry_create("gone", 3, None, &[0u8]).unwrap();
        leaf.entry_remove(h).unwrap();
        assert!(matches!(
            leaf.entry_remove(h),
            Err(ZapError::InvalidArgument(_))
        ));
        let mut out = [0u8; 1];
        assert!(matches!(
            leaf.entry_read(&h, &mut out),
            Err(ZapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn remove_after_predecessor_removed() {
        let mut buf = vec![0u8; 4096];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        leaf.entry_create("b", 42, None, &[2u64]).unwrap();
        leaf.entry_create("a", 42, None, &[1u64]).unwrap();
        let a = leaf.lookup("a", 42).unwrap();
        let b = leaf.lookup("b", 42).unwrap();
        assert_eq!(b.link, ChainLink::Entry(a.chunk()));
        leaf.entry_remove(a).unwrap();
        leaf.entry_remove(b).unwrap();
        assert_eq!(leaf.nentries(), 0);
        assert!(matches!(leaf.lookup("b", 42), Err(ZapError::NotFound)));
        assert_eq!(leaf.verify().unwrap().total(), leaf.num_chunks());
        assert!(matches!(
            leaf.entry_remove(b),
            Err(ZapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn remove_middle_of_chain() {
        let mut buf = vec![0u8; 4096];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        for name in ["a", "b", "c"] {
            leaf.entry_create(name, 11, None, name).unwrap();
        }
        let b = leaf.lookup("b", 11).unwrap();
        leaf.entry_remove(b).unwrap();
        assert!(leaf.lookup("a", 11).is_ok());
        assert!(leaf.lookup("c", 11).is_ok());
        assert_eq!(leaf.lookup("b", 11), Err(ZapError::NotFound));
        leaf.verify().unwrap();
    }

    #[test]
    fn read_name_back() {
        let mut buf = vec![0u8; 4096];
        let mut leaf = Leaf::init(&mut buf).unwrap();
        let h = leaf.entry_create("directory entry", 5, None, &[1u64]).unwrap();
        let mut out = [0u8; 15];
        leaf.entry_read_name(&h, &mut out).unwrap();
        assert_eq!(&out, b"directory entry");
        let mut short = [0u8; 4];
        assert_eq!(
            leaf.entry_read_name(&h, &mut short),
            Err(ZapError::Truncated {
                stored: 15,
                capacity: 4
            })
        );
        assert_eq!(&short, b"dire");
        let mut wide = [0u64; 15];
        assert!(matches!(
            leaf.entry_read_name(&h, &mut wide),
            Err(ZapError::InvalidArgument(_))
        ));
    }
}
