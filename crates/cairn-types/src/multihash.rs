use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TypeError;
use crate::varint::{read_uvarint, write_uvarint};

/// Hash algorithms a multihash may carry.
///
/// SHA-256 is the default everywhere (and the only algorithm CIDv0 admits);
/// BLAKE3 is the supported alternate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HashAlg {
    Sha2_256,
    Blake3,
}

impl HashAlg {
    /// The multihash code for this algorithm.
    pub const fn code(self) -> u64 {
        match self {
            Self::Sha2_256 => 0x12,
            Self::Blake3 => 0x1e,
        }
    }

    /// Digest length in bytes. Both supported algorithms emit 32 bytes.
    pub const fn digest_len(self) -> usize {
        32
    }

    /// Look up an algorithm by its multihash code.
    pub fn from_code(code: u64) -> Result<Self, TypeError> {
        match code {
            0x12 => Ok(Self::Sha2_256),
            0x1e => Ok(Self::Blake3),
            other => Err(TypeError::UnknownHashAlg(other)),
        }
    }
}

impl fmt::Display for HashAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha2_256 => write!(f, "sha2-256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

/// A self-describing hash: algorithm tag, digest length, digest bytes.
///
/// Binary layout: `varint(code) ‖ varint(length) ‖ digest`. Equality is byte
/// equality of that canonical encoding, which for fixed 32-byte digests is
/// the same as field equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Multihash {
    alg: HashAlg,
    digest: [u8; 32],
}

impl Multihash {
    /// Hash `data` with `alg`.
    pub fn digest(alg: HashAlg, data: &[u8]) -> Self {
        let digest = match alg {
            HashAlg::Sha2_256 => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                hasher.finalize().into()
            }
            HashAlg::Blake3 => *blake3::hash(data).as_bytes(),
        };
        Self { alg, digest }
    }

    /// Wrap a pre-computed digest, validating the declared length.
    pub fn wrap(alg: HashAlg, digest: &[u8]) -> Result<Self, TypeError> {
        if digest.len() != alg.digest_len() {
            return Err(TypeError::DigestLength {
                declared: alg.digest_len(),
                actual: digest.len(),
            });
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(digest);
        Ok(Self { alg, digest: bytes })
    }

    pub fn alg(&self) -> HashAlg {
        self.alg
    }

    /// The raw digest bytes.
    pub fn digest_bytes(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Canonical binary encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + 32);
        self.write_to(&mut buf);
        buf
    }

    /// Append the canonical encoding to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        write_uvarint(buf, self.alg.code());
        write_uvarint(buf, self.alg.digest_len() as u64);
        buf.extend_from_slice(&self.digest);
    }

    /// Parse a multihash from the front of `buf`; returns bytes consumed.
    pub fn read_from(buf: &[u8]) -> Result<(Self, usize), TypeError> {
        let (code, n1) = read_uvarint(buf)?;
        let alg = HashAlg::from_code(code)?;
        let (declared, n2) = read_uvarint(&buf[n1..])?;
        let declared = declared as usize;
        if declared != alg.digest_len() {
            return Err(TypeError::DigestLength {
                declared: alg.digest_len(),
                actual: declared,
            });
        }
        let start = n1 + n2;
        let end = start + declared;
        if buf.len() < end {
            return Err(TypeError::InvalidLength {
                expected: end,
                actual: buf.len(),
            });
        }
        let mh = Self::wrap(alg, &buf[start..end])?;
        Ok((mh, end))
    }

    /// Parse a multihash that must occupy the whole slice.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, TypeError> {
        let (mh, consumed) = Self::read_from(buf)?;
        if consumed != buf.len() {
            return Err(TypeError::TrailingBytes("multihash"));
        }
        Ok(mh)
    }

    /// Hex of the digest, truncated for logs.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.digest[..4])
    }
}

impl fmt::Debug for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multihash({}:{})", self.alg, self.short_hex())
    }
}

impl fmt::Display for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}
