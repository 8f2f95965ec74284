use std::fmt;

use sha2::{Digest, Sha256};

use cairn_types::{Cid, PeerId};

/// A point in the 256-bit XOR key space.
///
/// Everything looked up in the DHT (peer ids, CIDs, raw value keys) is
/// first mapped here through SHA-256, so distances are uniform regardless of
/// the source key's structure.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DhtKey([u8; 32]);

/// XOR distance between two keys. Ordered as a big-endian 256-bit integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; 32]);

impl DhtKey {
    /// Hash arbitrary key bytes into the key space.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// The key-space position of a peer.
    pub fn for_peer(peer: &PeerId) -> Self {
        Self::from_bytes(peer.as_bytes())
    }

    /// The key-space position of a CID (hashed from its multihash).
    pub fn for_cid(cid: &Cid) -> Self {
        Self::from_bytes(&cid.hash().to_bytes())
    }

    /// Use a raw 32-byte value directly (tests).
    pub fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn distance(&self, other: &DhtKey) -> Distance {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Distance {
    /// Length of the common prefix with zero distance, i.e. the number of
    /// leading zero bits. 256 means the keys are identical.
    pub fn leading_zeros(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        256
    }

    /// Bucket index for this distance: 255 − leading-zeros. `None` when the
    /// distance is zero (a node does not bucket itself).
    pub fn bucket_index(&self) -> Option<usize> {
        let lz = self.leading_zeros();
        if lz == 256 {
            None
        } else {
            Some(255 - lz)
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for DhtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DhtKey({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance(lz={})", self.leading_zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        let k = DhtKey::from_bytes(b"self");
        assert!(k.distance(&k).is_zero());
        assert_eq!(k.distance(&k).bucket_index(), None);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = DhtKey::from_bytes(b"a");
        let b = DhtKey::from_bytes(b"b");
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn closer_keys_order_below() {
        let target = DhtKey::from_raw([0u8; 32]);
        let near = DhtKey::from_raw({
            let mut b = [0u8; 32];
            b[31] = 1;
            b
        });
        let far = DhtKey::from_raw({
            let mut b = [0u8; 32];
            b[0] = 0x80;
            b
        });
        assert!(target.distance(&near) < target.distance(&far));
    }

    #[test]
    fn bucket_index_from_first_differing_bit() {
        let zero = DhtKey::from_raw([0u8; 32]);
        let mut top = [0u8; 32];
        top[0] = 0x80;
        assert_eq!(zero.distance(&DhtKey::from_raw(top)).bucket_index(), Some(255));

        let mut bottom = [0u8; 32];
        bottom[31] = 0x01;
        assert_eq!(zero.distance(&DhtKey::from_raw(bottom)).bucket_index(), Some(0));
    }

    #[test]
    fn leading_zeros_counts_bits() {
        let zero = DhtKey::from_raw([0u8; 32]);
        let mut b = [0u8; 32];
        b[1] = 0x10; // 8 zero bits + 3 more
        assert_eq!(zero.distance(&DhtKey::from_raw(b)).leading_zeros(), 11);
    }
}
