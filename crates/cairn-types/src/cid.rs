use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::multihash::{HashAlg, Multihash};
use crate::varint::{read_uvarint, write_uvarint};

/// CID version.
///
/// V0 is the bare multihash of a 32-byte SHA-256 digest, kept for backwards
/// compatibility, and always implies the [`Codec::DagPb`] codec. V1 is the
/// self-describing `varint(1) ‖ varint(codec) ‖ multihash` form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Version {
    V0,
    V1,
}

/// Codec tag describing how a block's bytes decode into a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Codec {
    /// Opaque bytes, no links.
    Raw,
    /// The classical node format with data and named links.
    DagPb,
    /// Generic linked CBOR. Carried as opaque blocks; no structural decode.
    DagCbor,
}

impl Codec {
    pub const fn code(self) -> u64 {
        match self {
            Self::Raw => 0x55,
            Self::DagPb => 0x70,
            Self::DagCbor => 0x71,
        }
    }

    pub fn from_code(code: u64) -> Result<Self, TypeError> {
        match code {
            0x55 => Ok(Self::Raw),
            0x70 => Ok(Self::DagPb),
            0x71 => Ok(Self::DagCbor),
            other => Err(TypeError::UnknownCodec(other)),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::DagPb => write!(f, "dag-pb"),
            Self::DagCbor => write!(f, "dag-cbor"),
        }
    }
}

/// Content identifier: `(version, codec, multihash)`.
///
/// Immutable; equality is byte equality of the canonical binary encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cid {
    version: Version,
    codec: Codec,
    hash: Multihash,
}

impl Cid {
    /// Build a v1 CID from a codec and multihash.
    pub fn new_v1(codec: Codec, hash: Multihash) -> Self {
        Self {
            version: Version::V1,
            codec,
            hash,
        }
    }

    /// Build a v0 CID. Only SHA-256 digests qualify; the codec is DagPb.
    pub fn new_v0(hash: Multihash) -> Result<Self, TypeError> {
        if hash.alg() != HashAlg::Sha2_256 {
            return Err(TypeError::UnknownHashAlg(hash.alg().code()));
        }
        Ok(Self {
            version: Version::V0,
            codec: Codec::DagPb,
            hash,
        })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn hash(&self) -> &Multihash {
        &self.hash
    }

    /// Canonical binary encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 34);
        self.write_to(&mut buf);
        buf
    }

    /// Append the canonical encoding to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self.version {
            Version::V0 => self.hash.write_to(buf),
            Version::V1 => {
                write_uvarint(buf, 1);
                write_uvarint(buf, self.codec.code());
                self.hash.write_to(buf);
            }
        }
    }

    /// Parse a CID from the front of `buf`; returns bytes consumed.
    pub fn read_from(buf: &[u8]) -> Result<(Self, usize), TypeError> {
        // V0: a bare sha2-256 multihash, which necessarily starts 0x12 0x20.
        if buf.len() >= 2 && buf[0] == 0x12 && buf[1] == 0x20 {
            let (hash, consumed) = Multihash::read_from(buf)?;
            return Ok((Self::new_v0(hash)?, consumed));
        }
        let (version, n1) = read_uvarint(buf)?;
        if version != 1 {
            return Err(TypeError::UnknownVersion(version));
        }
        let (code, n2) = read_uvarint(&buf[n1..])?;
        let codec = Codec::from_code(code)?;
        let (hash, n3) = Multihash::read_from(&buf[n1 + n2..])?;
        Ok((
            Self {
                version: Version::V1,
                codec,
                hash,
            },
            n1 + n2 + n3,
        ))
    }

    /// Parse a CID that must occupy the whole slice.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, TypeError> {
        let (cid, consumed) = Self::read_from(buf)?;
        if consumed != buf.len() {
            return Err(TypeError::TrailingBytes("cid"));
        }
        Ok(cid)
    }

    /// Short digest hex for logs.
    pub fn short_hex(&self) -> String {
        self.hash.short_hex()
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({}:{})", self.codec, self.short_hex())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}
