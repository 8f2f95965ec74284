//! Typed DAG nodes and their canonical encodings.
//!
//! The canonical byte layouts here define block identity: the same node must
//! always encode to the same bytes, and decode must be the exact inverse.
//! Everything is length-prefixed varints; decoders reject trailing bytes,
//! links without a target, and anything truncated.

use bytes::Bytes;

use cairn_types::varint::{read_uvarint, write_uvarint};
use cairn_types::{Block, Cid, Codec, HashAlg, Link, MAX_BLOCK_SIZE};

use crate::error::{DagError, DagResult};

/// A block's decoded structural view, polymorphic over codec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DagNode {
    /// Opaque bytes; no links by construction.
    Raw(Bytes),
    /// The classical format: payload data plus an ordered list of named,
    /// size-annotated links.
    Pb(PbNode),
}

/// Data plus ordered links. Link order is part of the node's identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PbNode {
    pub data: Bytes,
    pub links: Vec<Link>,
}

impl PbNode {
    pub fn new(data: impl Into<Bytes>, links: Vec<Link>) -> Self {
        Self {
            data: data.into(),
            links,
        }
    }
}

impl DagNode {
    /// The node's codec tag.
    pub fn codec(&self) -> Codec {
        match self {
            Self::Raw(_) => Codec::Raw,
            Self::Pb(_) => Codec::DagPb,
        }
    }

    /// The node's links. Raw nodes have none by construction.
    pub fn links(&self) -> &[Link] {
        match self {
            Self::Raw(_) => &[],
            Self::Pb(node) => &node.links,
        }
    }

    /// The node's payload data.
    pub fn data(&self) -> &Bytes {
        match self {
            Self::Raw(data) => data,
            Self::Pb(node) => &node.data,
        }
    }

    /// Canonical encoding of this node.
    pub fn encode(&self) -> DagResult<Vec<u8>> {
        let bytes = match self {
            Self::Raw(data) => data.to_vec(),
            Self::Pb(node) => encode_pb(node),
        };
        if bytes.len() > MAX_BLOCK_SIZE {
            return Err(DagError::Type(cairn_types::TypeError::OverSize {
                size: bytes.len(),
                limit: MAX_BLOCK_SIZE,
            }));
        }
        Ok(bytes)
    }

    /// Decode a block into its structural view.
    ///
    /// Raw blocks become [`DagNode::Raw`]; dag-pb blocks are parsed; the
    /// cbor codec carries no structural decode here and errors.
    pub fn decode(block: &Block) -> DagResult<Self> {
        match block.cid().codec() {
            Codec::Raw => Ok(Self::Raw(block.data().clone())),
            Codec::DagPb => Ok(Self::Pb(decode_pb(block.data())?)),
            Codec::DagCbor => Err(DagError::UnsupportedCodec(Codec::DagCbor)),
        }
    }

    /// Encode and hash into a block.
    pub fn to_block(&self, alg: HashAlg) -> DagResult<Block> {
        let bytes = self.encode()?;
        Block::new(bytes, alg, self.codec()).map_err(DagError::Type)
    }

    /// The CID this node would store under.
    pub fn cid(&self, alg: HashAlg) -> DagResult<Cid> {
        Ok(*self.to_block(alg)?.cid())
    }
}

/// `varint(data len) ‖ data ‖ varint(link count) ‖ links`, each link being
/// `varint(name len) ‖ name ‖ varint(size) ‖ varint(cid len) ‖ cid`.
fn encode_pb(node: &PbNode) -> Vec<u8> {
    let mut buf = Vec::with_capacity(node.data.len() + 64);
    write_uvarint(&mut buf, node.data.len() as u64);
    buf.extend_from_slice(&node.data);
    write_uvarint(&mut buf, node.links.len() as u64);
    for link in &node.links {
        write_uvarint(&mut buf, link.name.len() as u64);
        buf.extend_from_slice(link.name.as_bytes());
        write_uvarint(&mut buf, link.size);
        let cid = link.cid.to_bytes();
        write_uvarint(&mut buf, cid.len() as u64);
        buf.extend_from_slice(&cid);
    }
    buf
}

fn decode_pb(bytes: &[u8]) -> DagResult<PbNode> {
    let mut pos = 0usize;

    let (data_len, n) = read_uvarint(&bytes[pos..])?;
    pos += n;
    let data_len = data_len as usize;
    if bytes.len() < pos + data_len {
        return Err(DagError::Decode("truncated data"));
    }
    let data = Bytes::copy_from_slice(&bytes[pos..pos + data_len]);
    pos += data_len;

    let (link_count, n) = read_uvarint(&bytes[pos..])?;
    pos += n;
    let mut links = Vec::with_capacity(link_count as usize);
    for _ in 0..link_count {
        let (name_len, n) = read_uvarint(&bytes[pos..])?;
        pos += n;
        let name_len = name_len as usize;
        if bytes.len() < pos + name_len {
            return Err(DagError::Decode("truncated link name"));
        }
        let name = std::str::from_utf8(&bytes[pos..pos + name_len])
            .map_err(|_| DagError::Decode("link name not utf-8"))?
            .to_string();
        pos += name_len;

        let (size, n) = read_uvarint(&bytes[pos..])?;
        pos += n;

        let (cid_len, n) = read_uvarint(&bytes[pos..])?;
        pos += n;
        if cid_len == 0 {
            return Err(DagError::Decode("link without a CID target"));
        }
        let cid_len = cid_len as usize;
        if bytes.len() < pos + cid_len {
            return Err(DagError::Decode("truncated link CID"));
        }
        let cid = Cid::from_bytes(&bytes[pos..pos + cid_len])?;
        pos += cid_len;

        links.push(Link { name, size, cid });
    }

    if pos != bytes.len() {
        return Err(DagError::Decode("trailing bytes after node"));
    }
    Ok(PbNode { data, links })
}

/// Serialize a link list for the link cache.
pub fn encode_links(links: &[Link]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_uvarint(&mut buf, links.len() as u64);
    for link in links {
        write_uvarint(&mut buf, link.name.len() as u64);
        buf.extend_from_slice(link.name.as_bytes());
        write_uvarint(&mut buf, link.size);
        let cid = link.cid.to_bytes();
        write_uvarint(&mut buf, cid.len() as u64);
        buf.extend_from_slice(&cid);
    }
    buf
}

/// Inverse of [`encode_links`].
pub fn decode_links(bytes: &[u8]) -> DagResult<Vec<Link>> {
    // A link list is a pb node without the data section.
    let mut framed = Vec::with_capacity(bytes.len() + 1);
    write_uvarint(&mut framed, 0);
    framed.extend_from_slice(bytes);
    Ok(decode_pb(&framed)?.links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::Multihash;

    fn cid(data: &[u8]) -> Cid {
        Cid::new_v1(Codec::Raw, Multihash::digest(HashAlg::Sha2_256, data))
    }

    fn pb_node() -> DagNode {
        DagNode::Pb(PbNode::new(
            &b"payload"[..],
            vec![
                Link::new("a", 10, cid(b"child-a")),
                Link::new("b", 20, cid(b"child-b")),
            ],
        ))
    }

    #[test]
    fn raw_roundtrip() {
        let node = DagNode::Raw(Bytes::from_static(b"raw bytes"));
        let block = node.to_block(HashAlg::Sha2_256).unwrap();
        assert_eq!(block.cid().codec(), Codec::Raw);
        let decoded = DagNode::decode(&block).unwrap();
        assert_eq!(decoded, node);
        assert!(decoded.links().is_empty());
    }

    #[test]
    fn pb_roundtrip() {
        let node = pb_node();
        let block = node.to_block(HashAlg::Sha2_256).unwrap();
        assert_eq!(block.cid().codec(), Codec::DagPb);
        let decoded = DagNode::decode(&block).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.links().len(), 2);
    }

    #[test]
    fn link_order_changes_cid() {
        let a = Link::new("a", 10, cid(b"child-a"));
        let b = Link::new("b", 20, cid(b"child-b"));
        let ab = DagNode::Pb(PbNode::new(&b"d"[..], vec![a.clone(), b.clone()]));
        let ba = DagNode::Pb(PbNode::new(&b"d"[..], vec![b, a]));
        assert_ne!(
            ab.cid(HashAlg::Sha2_256).unwrap(),
            ba.cid(HashAlg::Sha2_256).unwrap()
        );
    }

    #[test]
    fn empty_pb_node_roundtrips() {
        let node = DagNode::Pb(PbNode::default());
        let block = node.to_block(HashAlg::Sha2_256).unwrap();
        assert_eq!(DagNode::decode(&block).unwrap(), node);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let node = pb_node();
        let mut bytes = node.encode().unwrap();
        bytes.push(0);
        assert!(matches!(
            decode_pb(&bytes),
            Err(DagError::Decode("trailing bytes after node"))
        ));
    }

    #[test]
    fn zero_length_cid_rejected() {
        // data len 0, one link, name len 0, size 0, cid len 0
        let mut bytes = Vec::new();
        write_uvarint(&mut bytes, 0);
        write_uvarint(&mut bytes, 1);
        write_uvarint(&mut bytes, 0);
        write_uvarint(&mut bytes, 0);
        write_uvarint(&mut bytes, 0);
        assert!(matches!(
            decode_pb(&bytes),
            Err(DagError::Decode("link without a CID target"))
        ));
    }

    #[test]
    fn truncated_node_rejected() {
        let node = pb_node();
        let bytes = node.encode().unwrap();
        assert!(decode_pb(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn cbor_codec_has_no_structural_decode() {
        let block = Block::new(b"cbor".to_vec(), HashAlg::Sha2_256, Codec::DagCbor).unwrap();
        assert!(matches!(
            DagNode::decode(&block),
            Err(DagError::UnsupportedCodec(Codec::DagCbor))
        ));
    }

    #[test]
    fn oversize_node_rejected_at_encode() {
        let node = DagNode::Raw(Bytes::from(vec![0u8; MAX_BLOCK_SIZE + 1]));
        assert!(node.encode().is_err());
    }

    #[test]
    fn link_list_roundtrip() {
        let links = vec![
            Link::new("x", 1, cid(b"x")),
            Link::new("", 0, cid(b"anonymous")),
        ];
        let encoded = encode_links(&links);
        assert_eq!(decode_links(&encoded).unwrap(), links);
    }

    #[test]
    fn empty_link_list_roundtrip() {
        assert!(decode_links(&encode_links(&[])).unwrap().is_empty());
    }
}
