//! The block service: a blockstore and an optional exchange behind one
//! facade.
//!
//! Reads are local-first; misses go to the exchange when one is attached.
//! Writes land in the blockstore and are announced through the exchange so
//! peers that want the block are served and the DHT learns we provide it.
//! An offline service simply reports `NotFound` on a miss.

pub mod error;
pub mod reprovider;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use cairn_bitswap::Bitswap;
use cairn_store::Blockstore;
use cairn_types::{Block, Cid};

pub use error::{BlockServiceError, BlockServiceResult};
pub use reprovider::Reprovider;

pub struct BlockService {
    store: Arc<dyn Blockstore>,
    exchange: Option<Arc<Bitswap>>,
}

impl BlockService {
    /// A service backed by `store` and fetching misses through `exchange`.
    pub fn new(store: Arc<dyn Blockstore>, exchange: Arc<Bitswap>) -> Arc<Self> {
        Arc::new(Self {
            store,
            exchange: Some(exchange),
        })
    }

    /// A purely local service: misses are `NotFound`.
    pub fn new_offline(store: Arc<dyn Blockstore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            exchange: None,
        })
    }

    pub fn is_online(&self) -> bool {
        self.exchange.is_some()
    }

    pub fn blockstore(&self) -> &Arc<dyn Blockstore> {
        &self.store
    }

    /// Store a block and announce it. Returns its CID.
    pub async fn add_block(&self, block: Block) -> BlockServiceResult<Cid> {
        let cid = *block.cid();
        match &self.exchange {
            // has_block both stores and announces.
            Some(exchange) => exchange.has_block(block).await?,
            None => self.store.put(block)?,
        }
        trace!(cid = %cid.short_hex(), "block added");
        Ok(cid)
    }

    /// Store a batch atomically, then announce each block.
    pub async fn add_blocks(&self, blocks: Vec<Block>) -> BlockServiceResult<Vec<Cid>> {
        let cids: Vec<Cid> = blocks.iter().map(|b| *b.cid()).collect();
        self.store.put_many(blocks.clone())?;
        if let Some(exchange) = &self.exchange {
            for block in blocks {
                exchange.has_block(block).await?;
            }
        }
        Ok(cids)
    }

    /// Fetch a block: local first, then the exchange.
    pub async fn get_block(&self, ctx: &CancellationToken, cid: &Cid) -> BlockServiceResult<Block> {
        match self.store.get(cid) {
            Ok(block) => return Ok(block),
            Err(cairn_store::StoreError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
        match &self.exchange {
            Some(exchange) => {
                debug!(cid = %cid.short_hex(), "local miss, asking exchange");
                Ok(exchange.get_block(ctx, *cid).await?)
            }
            None => Err(BlockServiceError::NotFound(*cid)),
        }
    }

    /// Fetch many blocks: locals are yielded immediately, misses are
    /// forwarded to the exchange. The stream closes when every block has
    /// been yielded or `ctx` cancels.
    pub async fn get_blocks(
        &self,
        ctx: &CancellationToken,
        cids: Vec<Cid>,
    ) -> mpsc::Receiver<Block> {
        let (tx, rx) = mpsc::channel(cids.len().max(1));

        let mut misses = Vec::new();
        for cid in &cids {
            match self.store.get(cid) {
                Ok(block) => {
                    let _ = tx.send(block).await;
                }
                Err(_) => misses.push(*cid),
            }
        }
        if misses.is_empty() {
            return rx;
        }

        match &self.exchange {
            Some(exchange) => {
                let mut fetched = exchange.get_blocks(ctx, misses).await;
                tokio::spawn(async move {
                    while let Some(block) = fetched.recv().await {
                        if tx.send(block).await.is_err() {
                            return;
                        }
                    }
                });
            }
            None => {
                debug!(misses = misses.len(), "offline service dropping misses");
            }
        }
        rx
    }

    /// Whether the block is available locally.
    pub fn has_local(&self, cid: &Cid) -> BlockServiceResult<bool> {
        Ok(self.store.has(cid)?)
    }

    pub fn delete_block(&self, cid: &Cid) -> BlockServiceResult<()> {
        Ok(self.store.delete(cid)?)
    }
}
