use cairn_types::{Cid, TypeError};

/// Errors from blockstore operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No block under this CID.
    #[error("block not found: {0}")]
    NotFound(Cid),

    /// The block's bytes exceed the encoded-size ceiling.
    #[error("block {cid} of {size} bytes exceeds the size limit")]
    OverSize { cid: Cid, size: usize },

    /// Invalid content at the type boundary (digest mismatch, bad parse).
    #[error(transparent)]
    Type(#[from] TypeError),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
