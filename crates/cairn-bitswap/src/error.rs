use cairn_net::NetError;
use cairn_store::StoreError;
use cairn_types::{Cid, TypeError};

/// Errors from the exchange layer.
#[derive(Debug, thiserror::Error)]
pub enum BitswapError {
    /// The caller's context was cancelled while waiting.
    #[error("cancelled")]
    Cancelled,

    /// No provider supplied the block before the context expired.
    #[error("block not found: {0}")]
    NotFound(Cid),

    /// The session has been shut down.
    #[error("session closed")]
    Closed,

    /// Malformed wire message.
    #[error("codec error: {0}")]
    Codec(String),

    /// Content verification failure naming the offending CID.
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Net(#[from] NetError),
}

/// Result alias for exchange operations.
pub type BitswapResult<T> = Result<T, BitswapError>;
