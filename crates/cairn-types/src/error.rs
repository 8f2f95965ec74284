/// Errors from parsing or constructing the foundation types.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// A varint was truncated or longer than 10 bytes.
    #[error("invalid varint: {0}")]
    InvalidVarint(&'static str),

    /// Unknown multihash algorithm code.
    #[error("unknown hash algorithm code: {0:#x}")]
    UnknownHashAlg(u64),

    /// The digest length does not match what the algorithm declares.
    #[error("digest length mismatch: declared {declared}, got {actual}")]
    DigestLength { declared: usize, actual: usize },

    /// Unknown CID version.
    #[error("unknown CID version: {0}")]
    UnknownVersion(u64),

    /// Unknown codec tag.
    #[error("unknown codec: {0:#x}")]
    UnknownCodec(u64),

    /// Bytes remained after a complete parse.
    #[error("trailing bytes after {0}")]
    TrailingBytes(&'static str),

    /// The computed digest does not match the digest the CID declares.
    #[error("content verification failed for {cid}")]
    VerificationFailed { cid: String },

    /// A block exceeded the 1 MiB encoded-size ceiling.
    #[error("block of {size} bytes exceeds the {limit} byte limit")]
    OverSize { size: usize, limit: usize },

    /// Invalid hex input when parsing a displayed identifier.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Byte slice had the wrong length for a fixed-size type.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
