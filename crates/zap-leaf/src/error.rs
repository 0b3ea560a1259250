use thiserror::Error;

pub type ZapResult<T> = Result<T, ZapError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZapError {
    #[error("Cannot find the entry")]
    NotFound,
    #[error("The leaf has {free} free chunks but the entry needs {needed}. Split the leaf and retry.")]
    InsufficientSpace { needed: usize, free: usize },
    #[error("The entry needs {needed} chunks, but a leaf of this size only has {capacity}")]
    TooLarge { needed: usize, capacity: usize },
    #[error("No collision differentiator is left for hash {hash:#018x}")]
    NoSpace { hash: u64 },
    #[error("The stored array has {stored} integers but the buffer only holds {capacity}")]
    Truncated { stored: usize, capacity: usize },
    #[error("Leaf block is corrupted ({0})")]
    Corrupt(Box<str>),
    #[error("Invalid argument ({0})")]
    InvalidArgument(Box<str>),
}

impl ZapError {
    /// Whether the caller can make the operation succeed by splitting the
    /// leaf (or picking another one) and trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ZapError::InsufficientSpace { .. })
    }

    /// The block can no longer be trusted for any chunk-index arithmetic.
    pub fn is_corruption(&self) -> bool {
        matches!(self, ZapError::Corrupt(_))
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        tracing::warn!("zap leaf corruption: {}", msg);
        ensure_cov::notify_cov("zap_leaf::error::corrupt");
        ZapError::Corrupt(msg.into_boxed_str())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        ZapError::InvalidArgument(msg.into_boxed_str())
    }
}
