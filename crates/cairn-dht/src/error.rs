use cairn_net::NetError;

/// Errors from DHT operations.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// No record or peer was found.
    #[error("not found")]
    NotFound,

    /// The routing table has no peers to seed a lookup.
    #[error("routing table empty, lookup cannot start")]
    LookupFailure,

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// An individual RPC exceeded its deadline.
    #[error("rpc timed out")]
    Timeout,

    /// A record failed validation and was rejected.
    #[error("invalid record: {0}")]
    InvalidRecord(&'static str),

    /// Malformed wire message.
    #[error("codec error: {0}")]
    Codec(String),

    /// Transport failure.
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Result alias for DHT operations.
pub type DhtResult<T> = Result<T, DhtError>;
