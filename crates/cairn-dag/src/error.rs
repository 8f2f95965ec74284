use cairn_blockservice::BlockServiceError;
use cairn_store::StoreError;
use cairn_types::{Cid, Codec, TypeError};

/// Errors from the DAG layer.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// No node under this CID, locally or from the exchange.
    #[error("node not found: {0}")]
    NotFound(Cid),

    /// The block's codec admits no structural decode.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(Codec),

    /// Malformed node bytes.
    #[error("decode failed: {0}")]
    Decode(&'static str),

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blocks(#[from] BlockServiceError),
}

impl DagError {
    /// Collapse block-service misses into the DAG layer's `NotFound`.
    pub fn from_fetch(err: BlockServiceError) -> Self {
        match err {
            BlockServiceError::NotFound(cid) => Self::NotFound(cid),
            BlockServiceError::Exchange(cairn_bitswap::BitswapError::NotFound(cid)) => {
                Self::NotFound(cid)
            }
            BlockServiceError::Exchange(cairn_bitswap::BitswapError::Cancelled) => Self::Cancelled,
            other => Self::Blocks(other),
        }
    }
}

/// Result alias for DAG operations.
pub type DagResult<T> = Result<T, DagError>;
