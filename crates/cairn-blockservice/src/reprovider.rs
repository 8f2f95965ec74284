//! Periodic re-announcement of everything we hold.
//!
//! Provider records expire, so a node that keeps its blocks must keep
//! telling the routing layer about them. The reprovider sweeps the
//! blockstore on an interval and re-provides every key; individual failures
//! are logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cairn_net::ContentRouting;
use cairn_store::Blockstore;

pub struct Reprovider {
    routing: Arc<dyn ContentRouting>,
    store: Arc<dyn Blockstore>,
}

impl Reprovider {
    pub fn new(routing: Arc<dyn ContentRouting>, store: Arc<dyn Blockstore>) -> Self {
        Self { routing, store }
    }

    /// One sweep over the blockstore. Returns how many keys were announced.
    pub async fn reprovide(&self) -> usize {
        let keys = match self.store.all_keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!(%err, "could not list blockstore keys");
                return 0;
            }
        };
        let mut provided = 0usize;
        for cid in keys {
            match self.routing.provide(cid).await {
                Ok(()) => provided += 1,
                Err(err) => warn!(cid = %cid.short_hex(), %err, "reprovide failed"),
            }
        }
        debug!(provided, "reprovide sweep finished");
        provided
    }

    /// Sweep immediately, then on every tick until `ctx` cancels.
    pub fn spawn(self: Arc<Self>, tick: Duration, ctx: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                self.reprovide().await;
                tokio::select! {
                    _ = ctx.cancelled() => return,
                    _ = tokio::time::sleep(tick) => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cairn_net::NetResult;
    use cairn_store::MemoryBlockstore;
    use cairn_types::{Block, Cid, Codec, HashAlg, PeerId};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct RecordingRouting {
        provided: Mutex<HashSet<Cid>>,
    }

    #[async_trait]
    impl ContentRouting for RecordingRouting {
        async fn provide(&self, key: Cid) -> NetResult<()> {
            self.provided.lock().expect("lock poisoned").insert(key);
            Ok(())
        }

        async fn find_providers(&self, _key: Cid, _limit: usize) -> mpsc::Receiver<PeerId> {
            let (_tx, rx) = mpsc::channel(1);
            rx
        }
    }

    fn block(data: &[u8]) -> Block {
        Block::new(data.to_vec(), HashAlg::Sha2_256, Codec::Raw).unwrap()
    }

    #[tokio::test]
    async fn sweep_announces_every_key() {
        let store = Arc::new(MemoryBlockstore::new());
        let mut cids = HashSet::new();
        for i in 0u8..5 {
            let b = block(&[i; 4]);
            cids.insert(*b.cid());
            store.put(b).unwrap();
        }
        let routing = Arc::new(RecordingRouting {
            provided: Mutex::new(HashSet::new()),
        });
        let reprovider = Reprovider::new(
            Arc::clone(&routing) as Arc<dyn ContentRouting>,
            store as Arc<dyn Blockstore>,
        );

        assert_eq!(reprovider.reprovide().await, 5);
        assert_eq!(*routing.provided.lock().expect("lock poisoned"), cids);
    }

    #[tokio::test]
    async fn empty_store_sweeps_nothing() {
        let routing = Arc::new(RecordingRouting {
            provided: Mutex::new(HashSet::new()),
        });
        let reprovider = Reprovider::new(
            routing as Arc<dyn ContentRouting>,
            Arc::new(MemoryBlockstore::new()) as Arc<dyn Blockstore>,
        );
        assert_eq!(reprovider.reprovide().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_task_sweeps_and_stops() {
        let store = Arc::new(MemoryBlockstore::new());
        store.put(block(b"steady")).unwrap();
        let routing = Arc::new(RecordingRouting {
            provided: Mutex::new(HashSet::new()),
        });
        let reprovider = Arc::new(Reprovider::new(
            Arc::clone(&routing) as Arc<dyn ContentRouting>,
            store as Arc<dyn Blockstore>,
        ));

        let ctx = CancellationToken::new();
        let handle = reprovider.spawn(Duration::from_secs(60), ctx.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(routing.provided.lock().expect("lock poisoned").len(), 1);

        ctx.cancel();
        handle.await.unwrap();
    }
}
