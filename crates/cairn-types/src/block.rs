use std::fmt;

use bytes::Bytes;

use crate::cid::{Cid, Codec};
use crate::error::TypeError;
use crate::multihash::{HashAlg, Multihash};

/// Ceiling on a single encoded block. Importers and decoders reject inputs
/// that would exceed it; the store refuses to hold them.
pub const MAX_BLOCK_SIZE: usize = 1 << 20;

/// A verified pairing of a [`Cid`] with the bytes it addresses.
///
/// Invariant: `cid.hash().digest == H(bytes)` for the CID's hash algorithm.
/// Both constructors uphold it, [`Block::new`] by hashing and [`Block::with_cid`]
/// by checking, so holding a `Block` means holding verified content.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    /// Hash `data` and build the block's CID from the given codec.
    pub fn new(data: impl Into<Bytes>, alg: HashAlg, codec: Codec) -> Result<Self, TypeError> {
        let data = data.into();
        if data.len() > MAX_BLOCK_SIZE {
            return Err(TypeError::OverSize {
                size: data.len(),
                limit: MAX_BLOCK_SIZE,
            });
        }
        let cid = Cid::new_v1(codec, Multihash::digest(alg, &data));
        Ok(Self { cid, data })
    }

    /// Pair existing bytes with a claimed CID, verifying the digest.
    ///
    /// Failing verification is fatal for the item: the block is never
    /// constructed and the caller must not store the bytes.
    pub fn with_cid(cid: Cid, data: impl Into<Bytes>) -> Result<Self, TypeError> {
        let data = data.into();
        if data.len() > MAX_BLOCK_SIZE {
            return Err(TypeError::OverSize {
                size: data.len(),
                limit: MAX_BLOCK_SIZE,
            });
        }
        let computed = Multihash::digest(cid.hash().alg(), &data);
        if &computed != cid.hash() {
            return Err(TypeError::VerificationFailed {
                cid: cid.to_string(),
            });
        }
        Ok(Self { cid, data })
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("cid", &self.cid)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_hashes_content() {
        let block = Block::new(&b"hello"[..], HashAlg::Sha2_256, Codec::Raw).unwrap();
        assert_eq!(
            hex::encode(block.cid().hash().digest_bytes()),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(block.data().as_ref(), b"hello");
    }

    #[test]
    fn with_cid_accepts_matching_digest() {
        let original = Block::new(&b"verify"[..], HashAlg::Sha2_256, Codec::Raw).unwrap();
        let rebuilt = Block::with_cid(*original.cid(), original.data().clone()).unwrap();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn with_cid_rejects_mismatch() {
        let block = Block::new(&b"original"[..], HashAlg::Sha2_256, Codec::Raw).unwrap();
        let err = Block::with_cid(*block.cid(), &b"tampered"[..]).unwrap_err();
        assert!(matches!(err, TypeError::VerificationFailed { .. }));
    }

    #[test]
    fn oversize_rejected() {
        let data = vec![0u8; MAX_BLOCK_SIZE + 1];
        assert!(matches!(
            Block::new(data, HashAlg::Sha2_256, Codec::Raw),
            Err(TypeError::OverSize { .. })
        ));
    }

    #[test]
    fn exactly_max_size_accepted() {
        let data = vec![0u8; MAX_BLOCK_SIZE];
        assert!(Block::new(data, HashAlg::Sha2_256, Codec::Raw).is_ok());
    }

    #[test]
    fn blake3_blocks_differ_from_sha256() {
        let a = Block::new(&b"same"[..], HashAlg::Sha2_256, Codec::Raw).unwrap();
        let b = Block::new(&b"same"[..], HashAlg::Blake3, Codec::Raw).unwrap();
        assert_ne!(a.cid(), b.cid());
    }
}
