use crate::layout::MAX_CD;

/// Per-directory settings a leaf needs but does not store on disk.
///
/// The owning directory keeps these in its own header and hands them to
/// every leaf it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafConfig {
    pub(crate) uint64_keys: bool,
    pub(crate) max_cd: u32,
}

impl Default for LeafConfig {
    fn default() -> Self {
        Self {
            uint64_keys: false,
            max_cd: MAX_CD,
        }
    }
}

impl LeafConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names are arrays of 8-byte integers instead of byte strings.
    pub fn uint64_keys(mut self, uint64_keys: bool) -> Self {
        self.uint64_keys = uint64_keys;
        self
    }

    /// Exclusive upper bound of automatically assigned collision differentiators.
    pub fn max_cd(mut self, max_cd: u32) -> Self {
        self.max_cd = max_cd;
        self
    }

    pub fn key_width(&self) -> usize {
        if self.uint64_keys {
            8
        } else {
            1
        }
    }

    pub fn cd_limit(&self) -> u32 {
        self.max_cd
    }
}
