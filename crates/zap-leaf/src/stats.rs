use crate::{
    error::{ZapError, ZapResult},
    layout::{array_nchunks, ARRAY_BYTES, CHAIN_END, HISTOGRAM_SIZE},
    leaf::Leaf,
};

/// Histograms accumulated over the leaves of a directory. Every counter
/// saturates into its last bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ZapStats {
    /// Leaves by log2 of the pointer-table slots pointing at them.
    pub leafs_with_2n_pointers: [u64; HISTOGRAM_SIZE],
    /// Leaves by `nentries / 5`.
    pub blocks_with_n5_entries: [u64; HISTOGRAM_SIZE],
    pub blocks_n_tenths_full: [u64; HISTOGRAM_SIZE],
    /// Entries by chunks used, entry chunk included.
    pub entries_using_n_chunks: [u64; HISTOGRAM_SIZE],
    pub buckets_with_n_entries: [u64; HISTOGRAM_SIZE],
}

fn bump(histogram: &mut [u64; HISTOGRAM_SIZE], n: usize) {
    histogram[n.min(HISTOGRAM_SIZE - 1)] += 1;
}

impl<'a> Leaf<'a> {
    /// Adds this leaf to `stats`. `ptrtbl_shift` is the log2 size of the
    /// owning directory's pointer table.
    pub fn stats(&self, ptrtbl_shift: u32, stats: &mut ZapStats) -> ZapResult<()> {
        let pointers = ptrtbl_shift.saturating_sub(self.prefix_len() as u32);
        bump(&mut stats.leafs_with_2n_pointers, pointers as usize);
        bump(
            &mut stats.blocks_with_n5_entries,
            self.nentries() as usize / 5,
        );

        let block_size = self.block_size();
        let used = block_size.saturating_sub(self.nfree() as usize * (ARRAY_BYTES + 1));
        bump(&mut stats.blocks_n_tenths_full, used * 10 / block_size);

        let key_width = self.config().key_width();
        for bucket in 0..self.hash_entries() {
            let mut n = 0;
            let mut chunk = self.bucket_head(bucket);
            while chunk != CHAIN_END {
                if n >= self.num_chunks() {
                    return Err(ZapError::corrupt("bucket chain loops"));
                }
                let le = self.read_entry(chunk)?;
                let chunks = 1
                    + array_nchunks(le.name_numints as usize * key_width)
                    + array_nchunks(le.value_numints as usize * le.value_intlen as usize);
                bump(&mut stats.entries_using_n_chunks, chunks);
                chunk = le.next;
                n += 1;
            }
            bump(&mut stats.buckets_with_n_entries, n);
        }
        Ok(())
    }
}
