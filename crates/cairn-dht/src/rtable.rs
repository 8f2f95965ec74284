use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use cairn_types::PeerId;

use crate::bucket::{KBucket, UpdateOutcome};
use crate::key::DhtKey;

const KEY_BITS: usize = 256;

/// XOR-metric routing table: one k-bucket per common-prefix length with the
/// local peer.
///
/// Each bucket has its own mutex; `nearest` takes them one at a time, so
/// concurrent updates never serialize behind a table-wide lock.
pub struct RoutingTable {
    local: DhtKey,
    local_peer: PeerId,
    buckets: Vec<Mutex<KBucket>>,
    staleness: Duration,
}

impl RoutingTable {
    pub fn new(local_peer: PeerId, k: usize, staleness: Duration) -> Self {
        let buckets = (0..KEY_BITS).map(|_| Mutex::new(KBucket::new(k))).collect();
        Self {
            local: DhtKey::for_peer(&local_peer),
            local_peer,
            buckets,
            staleness,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    /// Record contact with a peer. Returns what happened to the entry.
    pub fn update(&self, peer: PeerId) -> UpdateOutcome {
        self.update_at(peer, Instant::now())
    }

    /// As [`update`], with an explicit clock (tests).
    ///
    /// [`update`]: RoutingTable::update
    pub fn update_at(&self, peer: PeerId, now: Instant) -> UpdateOutcome {
        let Some(index) = self.local.distance(&DhtKey::for_peer(&peer)).bucket_index() else {
            // The local peer itself is never bucketed.
            return UpdateOutcome::Dropped;
        };
        let outcome = self.buckets[index]
            .lock()
            .expect("lock poisoned")
            .update(peer, now, self.staleness);
        if let UpdateOutcome::EvictedStale(old) = outcome {
            debug!(bucket = index, evicted = %old.short_hex(), "stale head evicted");
        }
        outcome
    }

    /// Remove a peer (on disconnect or permanent address failure).
    pub fn remove(&self, peer: &PeerId) {
        if let Some(index) = self.local.distance(&DhtKey::for_peer(peer)).bucket_index() {
            self.buckets[index].lock().expect("lock poisoned").remove(peer);
        }
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        match self.local.distance(&DhtKey::for_peer(peer)).bucket_index() {
            Some(index) => self.buckets[index]
                .lock()
                .expect("lock poisoned")
                .contains(peer),
            None => false,
        }
    }

    /// Total peers across all buckets.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.lock().expect("lock poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `n` peers ordered by ascending XOR distance to `key`.
    pub fn nearest(&self, key: &DhtKey, n: usize) -> Vec<PeerId> {
        let mut all: Vec<(crate::key::Distance, PeerId)> = Vec::new();
        for bucket in &self.buckets {
            let bucket = bucket.lock().expect("lock poisoned");
            for peer in bucket.peers() {
                all.push((key.distance(&DhtKey::for_peer(&peer)), peer));
            }
        }
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.truncate(n);
        all.into_iter().map(|(_, p)| p).collect()
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTable")
            .field("local", &self.local_peer)
            .field("peers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 32])
    }

    fn table() -> RoutingTable {
        RoutingTable::new(peer(0), 20, Duration::from_secs(3600))
    }

    #[test]
    fn update_and_contains() {
        let t = table();
        t.update(peer(1));
        assert!(t.contains(&peer(1)));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn self_is_never_bucketed() {
        let t = table();
        assert_eq!(t.update(peer(0)), UpdateOutcome::Dropped);
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn remove_peer() {
        let t = table();
        t.update(peer(1));
        t.remove(&peer(1));
        assert!(!t.contains(&peer(1)));
    }

    #[test]
    fn nearest_orders_by_distance() {
        let t = table();
        for i in 1..=10 {
            t.update(peer(i));
        }
        let key = DhtKey::for_peer(&peer(7));
        let nearest = t.nearest(&key, 3);
        assert_eq!(nearest.len(), 3);
        assert_eq!(nearest[0], peer(7));

        // Distances are non-decreasing.
        let d: Vec<_> = nearest
            .iter()
            .map(|p| key.distance(&DhtKey::for_peer(p)))
            .collect();
        assert!(d.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn nearest_caps_at_n() {
        let t = table();
        for i in 1..=30 {
            t.update(peer(i));
        }
        assert_eq!(t.nearest(&DhtKey::from_bytes(b"k"), 20).len(), 20);
    }

    #[test]
    fn nearest_on_empty_table() {
        let t = table();
        assert!(t.nearest(&DhtKey::from_bytes(b"k"), 5).is_empty());
    }
}
