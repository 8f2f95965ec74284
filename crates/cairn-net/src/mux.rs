//! Protocol multiplexing.
//!
//! Each protocol is identified by a short string. The dialer writes the
//! protocol name, length-prefixed with a single byte, as the first bytes of
//! a fresh stream; the acceptor reads it and dispatches to the registered
//! handler. Unknown protocols are closed.

use std::fmt;

use crate::error::{NetError, NetResult};

/// A protocol identifier, e.g. `/cairn/bitswap/1.0.0`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolId(String);

impl ProtocolId {
    /// Wrap a protocol name. Names longer than 255 bytes cannot be framed.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(name.len() <= u8::MAX as usize, "protocol name too long");
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolId({})", self.0)
    }
}

impl From<&str> for ProtocolId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Frame a protocol header: `[1-byte length][name bytes]`.
pub fn write_protocol_header(buf: &mut Vec<u8>, protocol: &ProtocolId) {
    buf.push(protocol.0.len() as u8);
    buf.extend_from_slice(protocol.0.as_bytes());
}

/// Read a protocol header from the front of `buf`; returns the protocol and
/// the number of bytes consumed.
pub fn read_protocol_header(buf: &[u8]) -> NetResult<(ProtocolId, usize)> {
    let len = *buf.first().ok_or(NetError::BadHeader("empty stream"))? as usize;
    if buf.len() < 1 + len {
        return Err(NetError::BadHeader("truncated protocol name"));
    }
    let name = std::str::from_utf8(&buf[1..1 + len])
        .map_err(|_| NetError::BadHeader("protocol name not utf-8"))?;
    Ok((ProtocolId::new(name), 1 + len))
}
