use cairn_bitswap::BitswapError;
use cairn_store::StoreError;
use cairn_types::Cid;

/// Errors from the block service facade.
#[derive(Debug, thiserror::Error)]
pub enum BlockServiceError {
    /// The block is absent locally and no exchange could supply it.
    #[error("block not found: {0}")]
    NotFound(Cid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Exchange(#[from] BitswapError),
}

/// Result alias for block service operations.
pub type BlockServiceResult<T> = Result<T, BlockServiceError>;
