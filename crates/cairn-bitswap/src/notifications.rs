//! Block-arrival pub/sub.
//!
//! `get_block` callers subscribe on a CID and are woken when a block is
//! published under it. Delivery channels have capacity 1 and publishes never
//! block: an overloaded subscriber loses its slot (at-most-once). A short
//! grace-window cache lets a subscription registered just after publication
//! still fire, closing the check-then-subscribe race.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::trace;

use cairn_types::{Block, Cid};

/// How long a published block remains deliverable to late subscribers.
const GRACE_WINDOW: Duration = Duration::from_millis(100);

/// How many recently published blocks the grace cache keeps.
const RECENT_CAP: usize = 64;

pub struct Notifications {
    inner: Mutex<Inner>,
}

struct Inner {
    subscribers: HashMap<Cid, Vec<mpsc::Sender<Block>>>,
    recent: VecDeque<(Instant, Block)>,
    closed: bool,
}

impl Notifications {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                subscribers: HashMap::new(),
                recent: VecDeque::new(),
                closed: false,
            }),
        }
    }

    /// Deliver `block` to every subscriber of its CID, then cache it for the
    /// grace window. Subscriptions fire once; their channel is removed.
    pub fn publish(&self, block: Block) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.closed {
            return;
        }
        if let Some(senders) = inner.subscribers.remove(block.cid()) {
            trace!(cid = %block.cid().short_hex(), subs = senders.len(), "block published");
            for sender in senders {
                // Capacity-1 channel; a full or dropped receiver misses out.
                let _ = sender.try_send(block.clone());
            }
        }
        let now = Instant::now();
        inner.recent.push_back((now, block));
        while inner.recent.len() > RECENT_CAP {
            inner.recent.pop_front();
        }
        if let Some(cutoff) = now.checked_sub(GRACE_WINDOW) {
            while matches!(inner.recent.front(), Some((t, _)) if *t < cutoff) {
                inner.recent.pop_front();
            }
        }
    }

    /// Register for the next block published under `cid`.
    ///
    /// If one was published within the grace window the channel fires
    /// immediately. The receiver yields `None` once the session shuts down.
    pub fn subscribe(&self, cid: Cid) -> mpsc::Receiver<Block> {
        let (tx, rx) = mpsc::channel(1);
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.closed {
            // tx drops here; the receiver sees a closed channel.
            return rx;
        }
        let cutoff = Instant::now().checked_sub(GRACE_WINDOW);
        if let Some((_, block)) = inner
            .recent
            .iter()
            .rev()
            .find(|(t, b)| cutoff.map_or(true, |c| *t >= c) && *b.cid() == cid)
        {
            let _ = tx.try_send(block.clone());
            return rx;
        }
        inner.subscribers.entry(cid).or_default().push(tx);
        rx
    }

    /// Drop subscriptions under `cid` whose receiver has gone away.
    ///
    /// Called when a waiting `get_block` is cancelled, so abandoned slots do
    /// not linger until the next publish.
    pub fn release(&self, cid: &Cid) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if let Some(senders) = inner.subscribers.get_mut(cid) {
            senders.retain(|s| !s.is_closed());
            if senders.is_empty() {
                inner.subscribers.remove(cid);
            }
        }
    }

    /// Drop every subscription; their receivers observe a closed channel.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.closed = true;
        inner.subscribers.clear();
        inner.recent.clear();
    }

    /// Subscribers currently waiting (all CIDs).
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("lock poisoned")
            .subscribers
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::{Codec, HashAlg};

    fn block(data: &[u8]) -> Block {
        Block::new(data.to_vec(), HashAlg::Sha2_256, Codec::Raw).unwrap()
    }

    #[tokio::test]
    async fn subscribe_then_publish_delivers() {
        let notif = Notifications::new();
        let b = block(b"hello");
        let mut rx = notif.subscribe(*b.cid());
        notif.publish(b.clone());
        assert_eq!(rx.recv().await.unwrap(), b);
    }

    #[tokio::test]
    async fn fan_out_to_all_subscribers() {
        let notif = Notifications::new();
        let b = block(b"shared");
        let mut rx1 = notif.subscribe(*b.cid());
        let mut rx2 = notif.subscribe(*b.cid());
        notif.publish(b.clone());
        assert_eq!(rx1.recv().await.unwrap(), b);
        assert_eq!(rx2.recv().await.unwrap(), b);
    }

    #[tokio::test]
    async fn late_subscription_within_grace_window_fires() {
        let notif = Notifications::new();
        let b = block(b"early");
        notif.publish(b.clone());
        let mut rx = notif.subscribe(*b.cid());
        assert_eq!(rx.recv().await.unwrap(), b);
    }

    #[tokio::test]
    async fn unrelated_cid_does_not_fire() {
        let notif = Notifications::new();
        let wanted = block(b"wanted");
        let other = block(b"other");
        let mut rx = notif.subscribe(*wanted.cid());
        notif.publish(other);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivery_is_at_most_once() {
        let notif = Notifications::new();
        let b = block(b"once");
        let mut rx = notif.subscribe(*b.cid());
        notif.publish(b.clone());
        notif.publish(b.clone());
        assert_eq!(rx.recv().await.unwrap(), b);
        // The subscription was consumed by the first publish.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn release_drops_abandoned_subscriptions() {
        let notif = Notifications::new();
        let b = block(b"abandoned");
        let rx = notif.subscribe(*b.cid());
        assert_eq!(notif.subscriber_count(), 1);

        drop(rx);
        notif.release(b.cid());
        assert_eq!(notif.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn release_keeps_live_subscriptions() {
        let notif = Notifications::new();
        let b = block(b"live");
        let _rx = notif.subscribe(*b.cid());
        notif.release(b.cid());
        assert_eq!(notif.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_subscribers() {
        let notif = Notifications::new();
        let b = block(b"never");
        let mut rx = notif.subscribe(*b.cid());
        notif.shutdown();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn subscribe_after_shutdown_is_closed() {
        let notif = Notifications::new();
        notif.shutdown();
        let mut rx = notif.subscribe(*block(b"x").cid());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_ignored() {
        let notif = Notifications::new();
        notif.shutdown();
        notif.publish(block(b"dropped"));
        assert_eq!(notif.subscriber_count(), 0);
    }
}
