//! Persistence key layout for disk-backed blockstores.
//!
//! Block bytes live under `/blocks/<multihash>`; the DAG layer's cached link
//! lists live under `/local/links/<cid>`. The memory store keys natively by
//! CID and does not use these, but every durable backend must, so that repos
//! written by different backends agree.

use cairn_types::Cid;

const BLOCK_PREFIX: &str = "/blocks/";
const LINKS_PREFIX: &str = "/local/links/";

/// Datastore key for a block's bytes, derived from the CID's multihash.
pub fn block_key(cid: &Cid) -> String {
    format!("{}{}", BLOCK_PREFIX, hex::encode(cid.hash().to_bytes()))
}

/// Datastore key for a CID's cached link list.
pub fn links_key(cid: &Cid) -> String {
    format!("{}{}", LINKS_PREFIX, cid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::{Codec, HashAlg, Multihash};

    fn cid(data: &[u8]) -> Cid {
        Cid::new_v1(Codec::Raw, Multihash::digest(HashAlg::Sha2_256, data))
    }

    #[test]
    fn block_key_is_prefixed_multihash() {
        let c = cid(b"k");
        let key = block_key(&c);
        assert!(key.starts_with("/blocks/"));
        assert!(key.ends_with(&hex::encode(c.hash().to_bytes())));
    }

    #[test]
    fn same_content_different_codec_shares_block_key() {
        // Block bytes are keyed by multihash, so codec does not split storage.
        let mh = Multihash::digest(HashAlg::Sha2_256, b"k");
        let raw = Cid::new_v1(Codec::Raw, mh);
        let pb = Cid::new_v1(Codec::DagPb, mh);
        assert_eq!(block_key(&raw), block_key(&pb));
        assert_ne!(links_key(&raw), links_key(&pb));
    }

    #[test]
    fn links_key_uses_full_cid() {
        let c = cid(b"k");
        assert_eq!(links_key(&c), format!("/local/links/{}", c));
    }
}
