use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use cairn_types::{Cid, PeerId};

/// Bounded store of provider records: CID → set of (peer, expiry).
///
/// Entries expire after the configured TTL; a background GC task sweeps them.
/// When the store exceeds its capacity, the CID whose *newest* entry is
/// oldest is evicted first.
pub struct ProviderStore {
    inner: Mutex<HashMap<Cid, HashMap<PeerId, Instant>>>,
    ttl: Duration,
    capacity: usize,
}

impl ProviderStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    /// Record that `peer` can provide `cid`.
    pub fn add(&self, cid: Cid, peer: PeerId) {
        self.add_at(cid, peer, Instant::now());
    }

    fn add_at(&self, cid: Cid, peer: PeerId, now: Instant) {
        let mut map = self.inner.lock().expect("lock poisoned");
        map.entry(cid).or_default().insert(peer, now + self.ttl);
        if map.len() > self.capacity {
            // Evict the CID whose newest entry is oldest.
            if let Some(victim) = map
                .iter()
                .map(|(c, peers)| {
                    let newest = peers.values().max().copied().unwrap_or(now);
                    (newest, *c)
                })
                .min()
                .map(|(_, c)| c)
            {
                map.remove(&victim);
                debug!(cid = %victim.short_hex(), "provider set evicted at capacity");
            }
        }
    }

    /// Non-expired providers for `cid`.
    pub fn get(&self, cid: &Cid) -> Vec<PeerId> {
        self.get_at(cid, Instant::now())
    }

    fn get_at(&self, cid: &Cid, now: Instant) -> Vec<PeerId> {
        let map = self.inner.lock().expect("lock poisoned");
        match map.get(cid) {
            Some(peers) => peers
                .iter()
                .filter(|(_, expiry)| **expiry > now)
                .map(|(p, _)| *p)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Drop expired entries and empty provider sets. Returns entries removed.
    pub fn gc(&self) -> usize {
        self.gc_at(Instant::now())
    }

    fn gc_at(&self, now: Instant) -> usize {
        let mut map = self.inner.lock().expect("lock poisoned");
        let mut removed = 0;
        map.retain(|_, peers| {
            let before = peers.len();
            peers.retain(|_, expiry| *expiry > now);
            removed += before - peers.len();
            !peers.is_empty()
        });
        removed
    }

    /// Number of CIDs currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic GC sweep; runs until the token is cancelled.
    pub fn spawn_gc(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.gc();
                        if removed > 0 {
                            trace!(removed, "provider gc sweep");
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::{Codec, HashAlg, Multihash};

    fn cid(n: u8) -> Cid {
        Cid::new_v1(Codec::Raw, Multihash::digest(HashAlg::Sha2_256, &[n]))
    }

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 32])
    }

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn add_and_get() {
        let store = ProviderStore::new(TTL, 16);
        store.add(cid(1), peer(1));
        store.add(cid(1), peer(2));
        let mut providers = store.get(&cid(1));
        providers.sort();
        assert_eq!(providers, vec![peer(1), peer(2)]);
    }

    #[test]
    fn get_unknown_cid_is_empty() {
        let store = ProviderStore::new(TTL, 16);
        assert!(store.get(&cid(9)).is_empty());
    }

    #[test]
    fn re_adding_refreshes_expiry() {
        let store = ProviderStore::new(TTL, 16);
        let t0 = Instant::now();
        store.add_at(cid(1), peer(1), t0);
        store.add_at(cid(1), peer(1), t0 + Duration::from_secs(30));
        // At t0 + 70s the first expiry has passed but the refresh has not.
        assert_eq!(store.get_at(&cid(1), t0 + Duration::from_secs(70)), vec![peer(1)]);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let store = ProviderStore::new(TTL, 16);
        let t0 = Instant::now();
        store.add_at(cid(1), peer(1), t0);
        assert_eq!(store.get_at(&cid(1), t0 + Duration::from_secs(30)), vec![peer(1)]);
        assert!(store.get_at(&cid(1), t0 + TTL + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn gc_drops_expired() {
        let store = ProviderStore::new(TTL, 16);
        let t0 = Instant::now();
        store.add_at(cid(1), peer(1), t0);
        store.add_at(cid(2), peer(2), t0 + Duration::from_secs(30));

        let removed = store.gc_at(t0 + TTL + Duration::from_secs(1));
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert!(!store.get_at(&cid(2), t0 + Duration::from_secs(40)).is_empty());
    }

    #[test]
    fn capacity_evicts_stalest_cid() {
        let store = ProviderStore::new(TTL, 2);
        let t0 = Instant::now();
        store.add_at(cid(1), peer(1), t0);
        store.add_at(cid(2), peer(2), t0 + Duration::from_secs(1));
        // Third CID pushes the store over capacity; cid(1) has the oldest
        // newest-entry and goes.
        store.add_at(cid(3), peer(3), t0 + Duration::from_secs(2));
        assert_eq!(store.len(), 2);
        assert!(store.get_at(&cid(1), t0 + Duration::from_secs(3)).is_empty());
        assert!(!store.get_at(&cid(3), t0 + Duration::from_secs(3)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gc_task_runs_and_stops() {
        let store = Arc::new(ProviderStore::new(Duration::from_millis(10), 16));
        store.add(cid(1), peer(1));
        let cancel = CancellationToken::new();
        let handle = store.spawn_gc(Duration::from_millis(20), cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
