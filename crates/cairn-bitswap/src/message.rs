//! The bitswap wire message.
//!
//! Blocks travel in two encodings: the legacy form is bare payload bytes
//! whose hash the receiver recomputes; the modern form pairs each payload
//! with a CID prefix (version, codec, hash algorithm) so the receiver can
//! derive and verify the full CID. Both are accepted on ingress; egress
//! always emits the modern form.

use serde::{Deserialize, Serialize};

use cairn_types::varint::{read_uvarint, write_uvarint};
use cairn_types::{Block, Cid, Codec, HashAlg, Multihash, TypeError, Version};

use crate::error::{BitswapError, BitswapResult};

/// Upper bound on an encoded bitswap message.
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

const FRAME_TAG: u8 = 0x01;

/// One wantlist entry on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantEntry {
    /// Canonical CID bytes.
    pub block: Vec<u8>,
    pub priority: i32,
    pub cancel: bool,
}

/// Modern block carriage: CID prefix + payload bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayload {
    pub prefix: Vec<u8>,
    pub data: Vec<u8>,
}

/// A bitswap message: wants, cancels and blocks, in either direction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BitswapMessage {
    pub wantlist: Vec<WantEntry>,
    /// When set, this wantlist replaces the receiver's view of ours.
    pub full: bool,
    /// Legacy block carriage: raw payloads, hash recomputed by the receiver.
    pub blocks: Vec<Vec<u8>>,
    /// Modern block carriage.
    pub payload: Vec<BlockPayload>,
}

impl BitswapMessage {
    pub fn new(full: bool) -> Self {
        Self {
            full,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.wantlist.is_empty() && self.blocks.is_empty() && self.payload.is_empty()
    }

    pub fn add_want(&mut self, cid: &Cid, priority: i32) {
        self.wantlist.push(WantEntry {
            block: cid.to_bytes(),
            priority,
            cancel: false,
        });
    }

    pub fn add_cancel(&mut self, cid: &Cid) {
        self.wantlist.push(WantEntry {
            block: cid.to_bytes(),
            priority: 0,
            cancel: true,
        });
    }

    /// Attach a block in the modern prefix form.
    pub fn add_block(&mut self, block: &Block) {
        self.payload.push(BlockPayload {
            prefix: cid_prefix(block.cid()),
            data: block.data().to_vec(),
        });
    }

    /// Total block payload bytes carried, both encodings.
    pub fn block_bytes(&self) -> u64 {
        let legacy: usize = self.blocks.iter().map(Vec::len).sum();
        let modern: usize = self.payload.iter().map(|p| p.data.len()).sum();
        (legacy + modern) as u64
    }

    /// Decode the wantlist entries' CIDs, dropping undecodable ones.
    pub fn wants(&self) -> impl Iterator<Item = (Cid, i32, bool)> + '_ {
        self.wantlist
            .iter()
            .filter_map(|e| Cid::from_bytes(&e.block).ok().map(|c| (c, e.priority, e.cancel)))
    }

    /// Encode with framing: `[4 bytes BE length][1 byte tag][payload]`.
    pub fn encode(&self) -> BitswapResult<Vec<u8>> {
        let payload =
            bincode::serialize(self).map_err(|e| BitswapError::Codec(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(BitswapError::Codec(format!(
                "message of {} bytes exceeds limit",
                payload.len()
            )));
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(4 + 1 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(FRAME_TAG);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a framed message.
    pub fn decode(data: &[u8]) -> BitswapResult<Self> {
        if data.len() < 5 {
            return Err(BitswapError::Codec("frame too short".into()));
        }
        let len = u32::from_be_bytes(data[0..4].try_into().expect("4 bytes")) as usize;
        if len < 1 || len - 1 > MAX_MESSAGE_SIZE {
            return Err(BitswapError::Codec("bad frame length".into()));
        }
        if data.len() != 4 + len {
            return Err(BitswapError::Codec("frame length mismatch".into()));
        }
        if data[4] != FRAME_TAG {
            return Err(BitswapError::Codec("unknown frame tag".into()));
        }
        bincode::deserialize(&data[5..]).map_err(|e| BitswapError::Codec(e.to_string()))
    }
}

/// The CID prefix carried with modern payloads:
/// `varint(version) ‖ varint(codec) ‖ varint(hash code) ‖ varint(digest len)`.
pub fn cid_prefix(cid: &Cid) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4);
    let version = match cid.version() {
        Version::V0 => 0,
        Version::V1 => 1,
    };
    write_uvarint(&mut buf, version);
    write_uvarint(&mut buf, cid.codec().code());
    write_uvarint(&mut buf, cid.hash().alg().code());
    write_uvarint(&mut buf, cid.hash().alg().digest_len() as u64);
    buf
}

/// Derive and verify a block from a prefix + payload pair.
pub fn block_from_payload(payload: &BlockPayload) -> BitswapResult<Block> {
    let buf = &payload.prefix;
    let (version, n1) = read_uvarint(buf).map_err(BitswapError::Type)?;
    let (codec_code, n2) = read_uvarint(&buf[n1..]).map_err(BitswapError::Type)?;
    let (hash_code, n3) = read_uvarint(&buf[n1 + n2..]).map_err(BitswapError::Type)?;
    let (digest_len, n4) = read_uvarint(&buf[n1 + n2 + n3..]).map_err(BitswapError::Type)?;
    if n1 + n2 + n3 + n4 != buf.len() {
        return Err(BitswapError::Type(TypeError::TrailingBytes("cid prefix")));
    }

    let codec = Codec::from_code(codec_code).map_err(BitswapError::Type)?;
    let alg = HashAlg::from_code(hash_code).map_err(BitswapError::Type)?;
    if digest_len as usize != alg.digest_len() {
        return Err(BitswapError::Type(TypeError::DigestLength {
            declared: alg.digest_len(),
            actual: digest_len as usize,
        }));
    }

    let hash = Multihash::digest(alg, &payload.data);
    let cid = match version {
        0 => Cid::new_v0(hash).map_err(BitswapError::Type)?,
        1 => Cid::new_v1(codec, hash),
        other => return Err(BitswapError::Type(TypeError::UnknownVersion(other))),
    };
    Block::with_cid(cid, payload.data.clone()).map_err(BitswapError::Type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(data: &[u8]) -> Block {
        Block::new(data.to_vec(), HashAlg::Sha2_256, Codec::Raw).unwrap()
    }

    fn cid(n: u8) -> Cid {
        *block(&[n]).cid()
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut msg = BitswapMessage::new(true);
        msg.add_want(&cid(1), 5);
        msg.add_cancel(&cid(2));
        msg.add_block(&block(b"data"));

        let decoded = BitswapMessage::decode(&msg.encode().unwrap()).unwrap();
        assert!(decoded.full);
        assert_eq!(decoded.wantlist.len(), 2);
        assert_eq!(decoded.payload.len(), 1);
    }

    #[test]
    fn wants_iterator_decodes_entries() {
        let mut msg = BitswapMessage::new(false);
        msg.add_want(&cid(1), 7);
        msg.add_cancel(&cid(2));
        let wants: Vec<_> = msg.wants().collect();
        assert_eq!(wants, vec![(cid(1), 7, false), (cid(2), 0, true)]);
    }

    #[test]
    fn modern_payload_roundtrip() {
        let original = block(b"modern block");
        let mut msg = BitswapMessage::new(false);
        msg.add_block(&original);

        let recovered = block_from_payload(&msg.payload[0]).unwrap();
        assert_eq!(recovered.cid(), original.cid());
        assert_eq!(recovered.data(), original.data());
    }

    #[test]
    fn payload_prefix_preserves_codec_and_alg() {
        let original = Block::new(b"x".to_vec(), HashAlg::Blake3, Codec::DagPb).unwrap();
        let mut msg = BitswapMessage::new(false);
        msg.add_block(&original);
        let recovered = block_from_payload(&msg.payload[0]).unwrap();
        assert_eq!(recovered.cid().codec(), Codec::DagPb);
        assert_eq!(recovered.cid().hash().alg(), HashAlg::Blake3);
    }

    #[test]
    fn corrupt_prefix_is_rejected() {
        let payload = BlockPayload {
            prefix: vec![1, 0x99],
            data: b"data".to_vec(),
        };
        assert!(block_from_payload(&payload).is_err());
    }

    #[test]
    fn prefix_with_trailing_bytes_rejected() {
        let original = block(b"t");
        let mut prefix = cid_prefix(original.cid());
        prefix.push(0);
        let payload = BlockPayload {
            prefix,
            data: original.data().to_vec(),
        };
        assert!(block_from_payload(&payload).is_err());
    }

    #[test]
    fn block_bytes_counts_both_encodings() {
        let mut msg = BitswapMessage::new(false);
        msg.blocks.push(vec![0u8; 10]);
        msg.add_block(&block(b"12345"));
        assert_eq!(msg.block_bytes(), 15);
    }

    #[test]
    fn empty_message() {
        let msg = BitswapMessage::new(false);
        assert!(msg.is_empty());
        let decoded = BitswapMessage::decode(&msg.encode().unwrap()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn bad_frame_rejected() {
        assert!(BitswapMessage::decode(&[0, 0, 0]).is_err());
        let mut encoded = BitswapMessage::new(false).encode().unwrap();
        encoded[4] = 0x7f;
        assert!(BitswapMessage::decode(&encoded).is_err());
    }
}
