//! The DAG service: nodes in, nodes out, with a link cache on the side.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use cairn_blockservice::BlockService;
use cairn_types::{Cid, Codec, HashAlg, Link};

use crate::error::{DagError, DagResult};
use crate::node::{decode_links, encode_links, DagNode};

/// Auxiliary map `CID → serialized(links)` letting `get_links` skip full
/// block retrieval.
///
/// Invariant: an entry always equals the links of the node stored under that
/// CID, which is safe because blocks are immutable.
pub trait LinkCache: Send + Sync {
    fn get(&self, cid: &Cid) -> Option<Vec<u8>>;
    fn put(&self, cid: Cid, serialized: Vec<u8>);
    fn remove(&self, cid: &Cid);
}

/// In-memory link cache.
#[derive(Default)]
pub struct MemoryLinkCache {
    entries: RwLock<HashMap<Cid, Vec<u8>>>,
}

impl MemoryLinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LinkCache for MemoryLinkCache {
    fn get(&self, cid: &Cid) -> Option<Vec<u8>> {
        self.entries.read().expect("lock poisoned").get(cid).cloned()
    }

    fn put(&self, cid: Cid, serialized: Vec<u8>) {
        self.entries
            .write()
            .expect("lock poisoned")
            .insert(cid, serialized);
    }

    fn remove(&self, cid: &Cid) {
        self.entries.write().expect("lock poisoned").remove(cid);
    }
}

/// Nodes with typed links over a [`BlockService`], plus batch operations and
/// link-list reads that avoid full fetches.
pub struct DagService {
    blocks: Arc<BlockService>,
    links: Arc<dyn LinkCache>,
    hash_alg: HashAlg,
}

impl DagService {
    pub fn new(blocks: Arc<BlockService>, links: Arc<dyn LinkCache>) -> Arc<Self> {
        Arc::new(Self {
            blocks,
            links,
            hash_alg: HashAlg::Sha2_256,
        })
    }

    pub fn block_service(&self) -> &Arc<BlockService> {
        &self.blocks
    }

    pub fn hash_alg(&self) -> HashAlg {
        self.hash_alg
    }

    /// Encode, store and announce a node. Idempotent; returns the CID.
    pub async fn add(&self, node: &DagNode) -> DagResult<Cid> {
        let block = node.to_block(self.hash_alg)?;
        let cid = self.blocks.add_block(block).await.map_err(DagError::from_fetch)?;
        trace!(cid = %cid.short_hex(), "node added");
        Ok(cid)
    }

    /// Store a batch of nodes through the blockstore's batch path.
    pub async fn add_many(&self, nodes: &[DagNode]) -> DagResult<Vec<Cid>> {
        let mut blocks = Vec::with_capacity(nodes.len());
        for node in nodes {
            blocks.push(node.to_block(self.hash_alg)?);
        }
        self.blocks
            .add_blocks(blocks)
            .await
            .map_err(DagError::from_fetch)
    }

    /// Resolve a CID to its node, local first, then the exchange.
    pub async fn get(&self, ctx: &CancellationToken, cid: &Cid) -> DagResult<DagNode> {
        let block = self
            .blocks
            .get_block(ctx, cid)
            .await
            .map_err(DagError::from_fetch)?;
        DagNode::decode(&block)
    }

    /// Resolve many CIDs; the channel yields exactly `cids.len()` items
    /// (node or error) unless `ctx` cancels first. Unordered.
    pub async fn get_many(
        &self,
        ctx: &CancellationToken,
        cids: Vec<Cid>,
    ) -> mpsc::Receiver<DagResult<(Cid, DagNode)>> {
        let (tx, rx) = mpsc::channel(cids.len().max(1));
        let mut fetched = self.blocks.get_blocks(ctx, cids.clone()).await;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut remaining: Vec<Cid> = cids;
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => return,
                    block = fetched.recv() => match block {
                        Some(block) => {
                            let cid = *block.cid();
                            remaining.retain(|c| c != &cid);
                            let item = DagNode::decode(&block).map(|n| (cid, n));
                            if tx.send(item).await.is_err() {
                                return;
                            }
                        }
                        None => break,
                    }
                }
            }
            // The stream closed short: the misses are reported as not-found.
            for cid in remaining {
                if tx.send(Err(DagError::NotFound(cid))).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    /// The links of the node under `cid`, without fetching the whole block
    /// when the cache can answer. Raw CIDs return empty without any fetch.
    pub async fn get_links(&self, ctx: &CancellationToken, cid: &Cid) -> DagResult<Vec<Link>> {
        if cid.codec() == Codec::Raw {
            return Ok(Vec::new());
        }
        if let Some(serialized) = self.links.get(cid) {
            trace!(cid = %cid.short_hex(), "link cache hit");
            return decode_links(&serialized);
        }
        let node = self.get(ctx, cid).await?;
        let links = node.links().to_vec();
        self.links.put(*cid, encode_links(&links));
        Ok(links)
    }

    /// Remove a node and its cached links.
    pub fn remove(&self, cid: &Cid) -> DagResult<()> {
        self.links.remove(cid);
        self.blocks.delete_block(cid).map_err(DagError::from_fetch)
    }

    /// Ensure the block is local, fetching it if need be.
    pub async fn fetch(&self, ctx: &CancellationToken, cid: &Cid) -> DagResult<()> {
        if self.blocks.has_local(cid).map_err(DagError::from_fetch)? {
            return Ok(());
        }
        debug!(cid = %cid.short_hex(), "fetching");
        self.blocks
            .get_block(ctx, cid)
            .await
            .map_err(DagError::from_fetch)?;
        Ok(())
    }
}
