use cairn_types::PeerId;

/// Errors from the network adapter.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The peer is not reachable (not registered, or dial failed).
    #[error("peer unreachable: {0}")]
    PeerUnreachable(PeerId),

    /// The remote has no handler for the requested protocol.
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// A request/response exchange produced no response.
    #[error("no response from {0}")]
    NoResponse(PeerId),

    /// The operation was cancelled or timed out with the caller's context.
    #[error("cancelled")]
    Cancelled,

    /// Malformed protocol header on an inbound stream.
    #[error("bad protocol header: {0}")]
    BadHeader(&'static str),

    /// Failure surfaced through the content-routing seam.
    #[error("routing: {0}")]
    Routing(String),
}

/// Result alias for network operations.
pub type NetResult<T> = Result<T, NetError>;
