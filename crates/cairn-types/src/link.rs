use serde::{Deserialize, Serialize};

use crate::cid::Cid;

/// A named, size-annotated reference from one DAG node to another.
///
/// `size` is the cumulative byte size of the referenced subgraph, used for
/// offset-to-child lookups when reading files. Link order is part of a
/// node's identity: re-ordering links changes the node's CID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub size: u64,
    pub cid: Cid,
}

impl Link {
    pub fn new(name: impl Into<String>, size: u64, cid: Cid) -> Self {
        Self {
            name: name.into(),
            size,
            cid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multihash::{HashAlg, Multihash};
    use crate::Codec;

    #[test]
    fn construction() {
        let cid = Cid::new_v1(Codec::Raw, Multihash::digest(HashAlg::Sha2_256, b"child"));
        let link = Link::new("child-0", 42, cid);
        assert_eq!(link.name, "child-0");
        assert_eq!(link.size, 42);
        assert_eq!(link.cid, cid);
    }
}
