//! The UnixFS payload schema embedded in pb-node data.
//!
//! Files larger than one chunk are represented as a root node whose
//! `block_sizes[i]` records the payload bytes under the i-th child, so an
//! offset lookup can binary-search instead of fetching leaves.

use bytes::Bytes;

use cairn_types::varint::{read_uvarint, write_uvarint};

use crate::error::{DagError, DagResult};

/// The kind of filesystem object a node encodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnixFsType {
    Raw,
    File,
    Directory,
    Metadata,
    Symlink,
}

impl UnixFsType {
    fn tag(self) -> u64 {
        match self {
            Self::Raw => 0,
            Self::File => 1,
            Self::Directory => 2,
            Self::Metadata => 3,
            Self::Symlink => 4,
        }
    }

    fn from_tag(tag: u64) -> DagResult<Self> {
        match tag {
            0 => Ok(Self::Raw),
            1 => Ok(Self::File),
            2 => Ok(Self::Directory),
            3 => Ok(Self::Metadata),
            4 => Ok(Self::Symlink),
            _ => Err(DagError::Decode("unknown unixfs type")),
        }
    }
}

/// The payload carried in a pb node's data field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnixFsData {
    pub kind: UnixFsType,
    /// Total file size; meaningful for multi-chunk files.
    pub file_size: Option<u64>,
    /// Payload bytes under each child link, in link order.
    pub block_sizes: Vec<u64>,
    /// Inline payload (leaves and small files).
    pub data: Option<Bytes>,
}

impl UnixFsData {
    /// A leaf carrying `data` inline.
    pub fn file_leaf(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            kind: UnixFsType::File,
            file_size: Some(data.len() as u64),
            block_sizes: Vec::new(),
            data: Some(data),
        }
    }

    /// An interior file node over children of the given payload sizes.
    pub fn file_interior(block_sizes: Vec<u64>) -> Self {
        let total: u64 = block_sizes.iter().sum();
        Self {
            kind: UnixFsType::File,
            file_size: Some(total),
            block_sizes,
            data: None,
        }
    }

    /// An empty directory payload.
    pub fn directory() -> Self {
        Self {
            kind: UnixFsType::Directory,
            file_size: None,
            block_sizes: Vec::new(),
            data: None,
        }
    }

    /// Total payload under this node: the declared file size, else the sum
    /// of child sizes, else the inline data length.
    pub fn total_size(&self) -> u64 {
        if let Some(size) = self.file_size {
            return size;
        }
        if !self.block_sizes.is_empty() {
            return self.block_sizes.iter().sum();
        }
        self.data.as_ref().map(|d| d.len() as u64).unwrap_or(0)
    }

    /// Canonical encoding. Optional integers use the value+1 convention so
    /// zero means absent.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_uvarint(&mut buf, self.kind.tag());
        write_uvarint(&mut buf, self.file_size.map(|s| s + 1).unwrap_or(0));
        write_uvarint(&mut buf, self.block_sizes.len() as u64);
        for size in &self.block_sizes {
            write_uvarint(&mut buf, *size);
        }
        match &self.data {
            Some(data) => {
                write_uvarint(&mut buf, data.len() as u64 + 1);
                buf.extend_from_slice(data);
            }
            None => write_uvarint(&mut buf, 0),
        }
        buf
    }

    /// Inverse of [`encode`]; rejects trailing bytes.
    ///
    /// [`encode`]: UnixFsData::encode
    pub fn decode(bytes: &[u8]) -> DagResult<Self> {
        let mut pos = 0usize;

        let (tag, n) = read_uvarint(&bytes[pos..])?;
        pos += n;
        let kind = UnixFsType::from_tag(tag)?;

        let (file_size_raw, n) = read_uvarint(&bytes[pos..])?;
        pos += n;
        let file_size = file_size_raw.checked_sub(1);

        let (count, n) = read_uvarint(&bytes[pos..])?;
        pos += n;
        let mut block_sizes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (size, n) = read_uvarint(&bytes[pos..])?;
            pos += n;
            block_sizes.push(size);
        }

        let (data_raw, n) = read_uvarint(&bytes[pos..])?;
        pos += n;
        let data = match data_raw.checked_sub(1) {
            None => None,
            Some(len) => {
                let len = len as usize;
                if bytes.len() < pos + len {
                    return Err(DagError::Decode("truncated unixfs data"));
                }
                let data = Bytes::copy_from_slice(&bytes[pos..pos + len]);
                pos += len;
                Some(data)
            }
        };

        if pos != bytes.len() {
            return Err(DagError::Decode("trailing bytes after unixfs payload"));
        }
        Ok(Self {
            kind,
            file_size,
            block_sizes,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_roundtrip() {
        let leaf = UnixFsData::file_leaf(&b"chunk bytes"[..]);
        let decoded = UnixFsData::decode(&leaf.encode()).unwrap();
        assert_eq!(decoded, leaf);
        assert_eq!(decoded.total_size(), 11);
    }

    #[test]
    fn interior_roundtrip() {
        let interior = UnixFsData::file_interior(vec![262_144, 262_144, 100]);
        let decoded = UnixFsData::decode(&interior.encode()).unwrap();
        assert_eq!(decoded, interior);
        assert_eq!(decoded.total_size(), 524_388);
    }

    #[test]
    fn directory_roundtrip() {
        let dir = UnixFsData::directory();
        let decoded = UnixFsData::decode(&dir.encode()).unwrap();
        assert_eq!(decoded.kind, UnixFsType::Directory);
        assert_eq!(decoded.total_size(), 0);
    }

    #[test]
    fn zero_length_inline_data_is_distinct_from_none() {
        let empty = UnixFsData {
            kind: UnixFsType::File,
            file_size: None,
            block_sizes: Vec::new(),
            data: Some(Bytes::new()),
        };
        let decoded = UnixFsData::decode(&empty.encode()).unwrap();
        assert_eq!(decoded.data, Some(Bytes::new()));

        let none = UnixFsData {
            data: None,
            ..empty.clone()
        };
        let decoded = UnixFsData::decode(&none.encode()).unwrap();
        assert_eq!(decoded.data, None);
    }

    #[test]
    fn zero_file_size_is_distinct_from_unset() {
        let zero = UnixFsData {
            kind: UnixFsType::File,
            file_size: Some(0),
            block_sizes: Vec::new(),
            data: None,
        };
        assert_eq!(UnixFsData::decode(&zero.encode()).unwrap().file_size, Some(0));
    }

    #[test]
    fn unknown_type_rejected() {
        let mut bytes = Vec::new();
        cairn_types::varint::write_uvarint(&mut bytes, 9);
        assert!(UnixFsData::decode(&bytes).is_err());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = UnixFsData::directory().encode();
        bytes.push(1);
        assert!(UnixFsData::decode(&bytes).is_err());
    }
}
