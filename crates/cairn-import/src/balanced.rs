//! The balanced DAG builder.
//!
//! Leaves hold chunk bytes inline; interior nodes reference up to the
//! fan-out in children and record each child's payload size, so a reader can
//! map a byte offset to the right subtree in logarithmic time. When a level
//! fills, siblings roll up into parents at the next level until one root
//! remains.

use std::io::Read;

use bytes::Bytes;
use tracing::debug;

use cairn_dag::{DagNode, DagService, PbNode, UnixFsData};
use cairn_types::{Cid, Link, MAX_BLOCK_SIZE};

use crate::chunk::{Chunker, SizeChunker, DEFAULT_CHUNK_SIZE};
use crate::error::{ImportError, ImportResult};

/// Default fan-out of interior nodes.
pub const DEFAULT_FANOUT: usize = 174;

/// Headroom for the unixfs and node envelopes around a chunk.
const LEAF_OVERHEAD: usize = 64;

/// Import parameters.
#[derive(Clone, Copy, Debug)]
pub struct ImportConfig {
    pub chunk_size: usize,
    pub fanout: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fanout: DEFAULT_FANOUT,
        }
    }
}

/// What an import produced.
#[derive(Clone, Copy, Debug)]
pub struct ImportOutcome {
    pub root: Cid,
    /// Total nodes stored, leaves and interiors.
    pub blocks: usize,
    /// Payload bytes imported.
    pub bytes: u64,
}

/// Split `reader` into chunks and assemble a balanced file DAG.
///
/// Invariant: concatenating the leaves' payloads in link order reproduces
/// the input stream exactly.
pub async fn import<R: Read>(
    dag: &DagService,
    reader: R,
    cfg: ImportConfig,
) -> ImportResult<ImportOutcome> {
    if cfg.chunk_size + LEAF_OVERHEAD > MAX_BLOCK_SIZE {
        return Err(ImportError::ChunkTooLarge(cfg.chunk_size));
    }
    let fanout = cfg.fanout.max(2);
    let mut chunker = SizeChunker::new(reader, cfg.chunk_size);

    // Level zero: one leaf per chunk.
    let mut level: Vec<(Cid, u64)> = Vec::new();
    let mut blocks = 0usize;
    let mut total = 0u64;
    while let Some(chunk) = chunker.next_chunk()? {
        total += chunk.len() as u64;
        let leaf = leaf_node(chunk);
        let cid = dag.add(&leaf).await?;
        level.push((cid, leaf_payload(&leaf)?));
        blocks += 1;
    }
    if level.is_empty() {
        // An empty stream still has a root: an empty leaf.
        let leaf = leaf_node(Bytes::new());
        let cid = dag.add(&leaf).await?;
        return Ok(ImportOutcome {
            root: cid,
            blocks: 1,
            bytes: 0,
        });
    }

    // Roll levels up until a single root remains.
    while level.len() > 1 {
        let mut next: Vec<(Cid, u64)> = Vec::with_capacity(level.len().div_ceil(fanout));
        for group in level.chunks(fanout) {
            let links: Vec<Link> = group
                .iter()
                .map(|(cid, size)| Link::new("", *size, *cid))
                .collect();
            let sizes: Vec<u64> = group.iter().map(|(_, size)| *size).collect();
            let subtotal: u64 = sizes.iter().sum();
            let node = DagNode::Pb(PbNode::new(
                UnixFsData::file_interior(sizes).encode(),
                links,
            ));
            let cid = dag.add(&node).await?;
            next.push((cid, subtotal));
            blocks += 1;
        }
        level = next;
    }

    let root = level[0].0;
    debug!(root = %root.short_hex(), blocks, bytes = total, "import complete");
    Ok(ImportOutcome {
        root,
        blocks,
        bytes: total,
    })
}

fn leaf_node(chunk: Bytes) -> DagNode {
    DagNode::Pb(PbNode::new(
        UnixFsData::file_leaf(chunk).encode(),
        Vec::new(),
    ))
}

fn leaf_payload(leaf: &DagNode) -> ImportResult<u64> {
    let unixfs = UnixFsData::decode(leaf.data())?;
    Ok(unixfs.total_size())
}

/// Map a byte offset to the child holding it: `(child index, offset within
/// that child)`. Runs a binary search over the cumulative block sizes.
pub fn child_for_offset(block_sizes: &[u64], offset: u64) -> Option<(usize, u64)> {
    let mut cumulative = Vec::with_capacity(block_sizes.len());
    let mut sum = 0u64;
    for size in block_sizes {
        sum += size;
        cumulative.push(sum);
    }
    if offset >= sum {
        return None;
    }
    let index = cumulative.partition_point(|&end| end <= offset);
    let start = if index == 0 { 0 } else { cumulative[index - 1] };
    Some((index, offset - start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cairn_blockservice::BlockService;
    use cairn_dag::{LinkCache, MemoryLinkCache};
    use cairn_store::{Blockstore, MemoryBlockstore};
    use tokio_util::sync::CancellationToken;

    fn service() -> (Arc<DagService>, Arc<MemoryBlockstore>) {
        let store = Arc::new(MemoryBlockstore::new());
        let blocks = BlockService::new_offline(Arc::clone(&store) as Arc<dyn Blockstore>);
        let dag = DagService::new(blocks, Arc::new(MemoryLinkCache::new()) as Arc<dyn LinkCache>);
        (dag, store)
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn small_cfg(chunk_size: usize, fanout: usize) -> ImportConfig {
        ImportConfig { chunk_size, fanout }
    }

    #[tokio::test]
    async fn single_chunk_file_is_one_leaf() {
        let (dag, store) = service();
        let data = patterned(100);
        let outcome = import(&dag, &data[..], small_cfg(256, 4)).await.unwrap();
        assert_eq!(outcome.blocks, 1);
        assert_eq!(outcome.bytes, 100);
        assert_eq!(store.len(), 1);

        let root = dag
            .get(&CancellationToken::new(), &outcome.root)
            .await
            .unwrap();
        assert!(root.links().is_empty());
    }

    #[tokio::test]
    async fn chunk_boundary_produces_one_leaf_and_one_more_past_it() {
        let (dag, _) = service();
        // Exactly one chunk: a single leaf, no interior.
        let outcome = import(&dag, &patterned(256)[..], small_cfg(256, 4))
            .await
            .unwrap();
        assert_eq!(outcome.blocks, 1);

        // One byte past the boundary: two leaves plus a root.
        let (dag2, _) = service();
        let outcome = import(&dag2, &patterned(257)[..], small_cfg(256, 4))
            .await
            .unwrap();
        assert_eq!(outcome.blocks, 3);
    }

    #[tokio::test]
    async fn fanout_boundary_single_vs_two_levels() {
        // fanout leaves exactly: one interior level (the root).
        let fanout = 4;
        let (dag, _) = service();
        let outcome = import(&dag, &patterned(16 * fanout)[..], small_cfg(16, fanout))
            .await
            .unwrap();
        assert_eq!(outcome.blocks, fanout + 1);
        let root = dag
            .get(&CancellationToken::new(), &outcome.root)
            .await
            .unwrap();
        assert_eq!(root.links().len(), fanout);

        // One leaf more: two interior levels.
        let (dag2, _) = service();
        let outcome = import(
            &dag2,
            &patterned(16 * (fanout + 1))[..],
            small_cfg(16, fanout),
        )
        .await
        .unwrap();
        // 5 leaves, 2 interiors over them, 1 root.
        assert_eq!(outcome.blocks, fanout + 1 + 3);
        let root = dag2
            .get(&CancellationToken::new(), &outcome.root)
            .await
            .unwrap();
        assert_eq!(root.links().len(), 2);
    }

    #[tokio::test]
    async fn root_block_sizes_cover_the_payload() {
        let (dag, _) = service();
        let outcome = import(&dag, &patterned(1000)[..], small_cfg(256, 2))
            .await
            .unwrap();
        let root = dag
            .get(&CancellationToken::new(), &outcome.root)
            .await
            .unwrap();
        let unixfs = UnixFsData::decode(root.data()).unwrap();
        assert_eq!(unixfs.total_size(), 1000);
        let link_total: u64 = root.links().iter().map(|l| l.size).sum();
        assert_eq!(link_total, 1000);
    }

    #[tokio::test]
    async fn empty_input_yields_an_empty_root() {
        let (dag, _) = service();
        let outcome = import(&dag, &b""[..], ImportConfig::default()).await.unwrap();
        assert_eq!(outcome.bytes, 0);
        assert_eq!(outcome.blocks, 1);
        let root = dag
            .get(&CancellationToken::new(), &outcome.root)
            .await
            .unwrap();
        let unixfs = UnixFsData::decode(root.data()).unwrap();
        assert_eq!(unixfs.total_size(), 0);
    }

    #[tokio::test]
    async fn import_is_deterministic() {
        let (dag1, _) = service();
        let (dag2, _) = service();
        let data = patterned(5000);
        let a = import(&dag1, &data[..], small_cfg(512, 8)).await.unwrap();
        let b = import(&dag2, &data[..], small_cfg(512, 8)).await.unwrap();
        assert_eq!(a.root, b.root);
    }

    #[tokio::test]
    async fn oversize_chunk_config_rejected() {
        let (dag, _) = service();
        let err = import(&dag, &b"x"[..], small_cfg(MAX_BLOCK_SIZE, 4))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::ChunkTooLarge(_)));
    }

    #[test]
    fn offset_lookup_finds_the_right_child() {
        let sizes = vec![100, 200, 50];
        assert_eq!(child_for_offset(&sizes, 0), Some((0, 0)));
        assert_eq!(child_for_offset(&sizes, 99), Some((0, 99)));
        assert_eq!(child_for_offset(&sizes, 100), Some((1, 0)));
        assert_eq!(child_for_offset(&sizes, 299), Some((1, 199)));
        assert_eq!(child_for_offset(&sizes, 300), Some((2, 0)));
        assert_eq!(child_for_offset(&sizes, 349), Some((2, 49)));
        assert_eq!(child_for_offset(&sizes, 350), None);
    }

    #[test]
    fn offset_lookup_on_empty_sizes() {
        assert_eq!(child_for_offset(&[], 0), None);
    }
}
