use std::collections::VecDeque;
use std::time::{Duration, Instant};

use cairn_types::PeerId;

/// One bucket entry: a peer and when it was last heard from.
#[derive(Clone, Copy, Debug)]
pub struct BucketEntry {
    pub peer: PeerId,
    pub last_seen: Instant,
}

/// A fixed-capacity list of peers at one distance band, least-recently-seen
/// at the head.
#[derive(Debug)]
pub struct KBucket {
    entries: VecDeque<BucketEntry>,
    capacity: usize,
}

/// What [`KBucket::update`] did with the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The peer was already present and moved to the tail.
    Refreshed,
    /// The peer was appended.
    Added,
    /// A stale head was evicted to make room.
    EvictedStale(PeerId),
    /// The bucket is full of live peers; the newcomer was dropped.
    Dropped,
}

impl KBucket {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.entries.iter().any(|e| &e.peer == peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.entries.iter().map(|e| e.peer)
    }

    /// Record contact with `peer` at `now`.
    ///
    /// Known peers move to the tail. Unknown peers are appended if there is
    /// room; when the bucket is full, the head is evicted only if it has not
    /// been seen within `staleness`, otherwise the newcomer is dropped.
    pub fn update(&mut self, peer: PeerId, now: Instant, staleness: Duration) -> UpdateOutcome {
        if let Some(pos) = self.entries.iter().position(|e| e.peer == peer) {
            self.entries.remove(pos);
            self.entries.push_back(BucketEntry {
                peer,
                last_seen: now,
            });
            return UpdateOutcome::Refreshed;
        }

        if !self.is_full() {
            self.entries.push_back(BucketEntry {
                peer,
                last_seen: now,
            });
            return UpdateOutcome::Added;
        }

        let head = self.entries.front().copied().expect("full bucket has a head");
        if now.duration_since(head.last_seen) > staleness {
            self.entries.pop_front();
            self.entries.push_back(BucketEntry {
                peer,
                last_seen: now,
            });
            return UpdateOutcome::EvictedStale(head.peer);
        }

        UpdateOutcome::Dropped
    }

    /// Remove a peer if present.
    pub fn remove(&mut self, peer: &PeerId) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| &e.peer == peer) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }
}
