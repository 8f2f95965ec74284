use cairn_dag::DagError;
use cairn_types::TypeError;

/// Errors from import and export.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// A chunk or assembled node would exceed the block size ceiling.
    #[error("chunk size {0} would produce over-size blocks")]
    ChunkTooLarge(usize),

    /// The DAG under export is not a well-formed file tree.
    #[error("malformed file node: {0}")]
    MalformedFile(&'static str),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Result alias for import operations.
pub type ImportResult<T> = Result<T, ImportError>;
