//! Graph enumeration.
//!
//! [`enumerate_children`] is the sequential depth-first walk with a visit
//! gate. [`walk_parallel`] keeps the same left-first visit order for its
//! output stream while fanning the link fetches out over a worker pool: a
//! dispatcher feeds workers from the top of a stack of pending CIDs, and
//! newly discovered children are pushed so the next free worker takes the
//! leftmost unseen descendant.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use cairn_types::Cid;

use crate::error::{DagError, DagResult};
use crate::service::DagService;

/// Parameters for the parallel walk.
#[derive(Clone, Copy, Debug)]
pub struct WalkConfig {
    /// Concurrent link-list fetches.
    pub workers: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self { workers: 8 }
    }
}

/// Depth-first traversal from `root`.
///
/// `visit` is called once per unseen CID (the root included) and returns
/// whether to descend through that node's links. The first fetch error
/// aborts the walk and is returned as-is, so a missing intermediate
/// surfaces a `NotFound` naming exactly that CID.
pub async fn enumerate_children<F>(
    ctx: &CancellationToken,
    service: &DagService,
    root: Cid,
    visit: &mut F,
) -> DagResult<()>
where
    F: FnMut(&Cid) -> bool,
{
    let mut seen: HashSet<Cid> = HashSet::new();
    let mut stack = vec![root];

    while let Some(cid) = stack.pop() {
        if ctx.is_cancelled() {
            return Err(DagError::Cancelled);
        }
        if !seen.insert(cid) {
            continue;
        }
        if !visit(&cid) {
            continue;
        }
        let links = service.get_links(ctx, &cid).await?;
        // Reversed push keeps the leftmost child on top of the stack.
        for link in links.iter().rev() {
            if !seen.contains(&link.cid) {
                stack.push(link.cid);
            }
        }
    }
    Ok(())
}

enum WorkerReport {
    Links(Cid, Vec<Cid>),
    Failed(DagError),
}

/// Parallel enumeration streaming visited CIDs in left-first DFS order.
///
/// The returned channel yields each visited CID once; an error item ends
/// the stream. Cancellation is observed at every channel operation.
pub fn walk_parallel(
    service: Arc<DagService>,
    root: Cid,
    ctx: CancellationToken,
    cfg: WalkConfig,
) -> mpsc::Receiver<DagResult<Cid>> {
    let (out_tx, out_rx) = mpsc::channel(64);
    tokio::spawn(dispatcher(service, root, ctx, cfg, out_tx));
    out_rx
}

async fn dispatcher(
    service: Arc<DagService>,
    root: Cid,
    ctx: CancellationToken,
    cfg: WalkConfig,
    out: mpsc::Sender<DagResult<Cid>>,
) {
    let workers = cfg.workers.max(1);
    let (work_tx, work_rx) = async_channel(workers);
    let (report_tx, mut report_rx) = mpsc::channel::<WorkerReport>(workers);

    for _ in 0..workers {
        let service = Arc::clone(&service);
        let ctx = ctx.clone();
        let work_rx = work_rx.clone();
        let report_tx = report_tx.clone();
        tokio::spawn(async move {
            while let Some(cid) = work_rx.recv().await {
                let report = match service.get_links(&ctx, &cid).await {
                    Ok(links) => {
                        WorkerReport::Links(cid, links.into_iter().map(|l| l.cid).collect())
                    }
                    Err(err) => WorkerReport::Failed(err),
                };
                if report_tx.send(report).await.is_err() {
                    return;
                }
            }
        });
    }
    drop(report_tx);

    let mut seen: HashSet<Cid> = HashSet::new();
    let mut stack: Vec<Cid> = vec![root];
    let mut in_flight = 0usize;

    loop {
        // Feed workers from the top of the stack: the leftmost unseen
        // descendant goes out first, and is announced downstream in that
        // same order.
        while in_flight < workers {
            let Some(cid) = stack.pop() else { break };
            if !seen.insert(cid) {
                continue;
            }
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                sent = out.send(Ok(cid)) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                sent = work_tx.send(cid) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
            in_flight += 1;
        }

        if in_flight == 0 {
            trace!(visited = seen.len(), "walk complete");
            return;
        }

        tokio::select! {
            biased;
            _ = ctx.cancelled() => return,
            report = report_rx.recv() => match report {
                Some(WorkerReport::Links(_, children)) => {
                    in_flight -= 1;
                    for child in children.iter().rev() {
                        if !seen.contains(child) {
                            stack.push(*child);
                        }
                    }
                }
                Some(WorkerReport::Failed(err)) => {
                    debug!(%err, "walk aborted by worker error");
                    let _ = out.send(Err(err)).await;
                    return;
                }
                None => return,
            }
        }
    }
}

// A small multi-consumer queue over tokio primitives: workers share one
// receiver behind a mutex.
fn async_channel(capacity: usize) -> (mpsc::Sender<Cid>, SharedReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        tx,
        SharedReceiver {
            inner: Arc::new(tokio::sync::Mutex::new(rx)),
        },
    )
}

#[derive(Clone)]
struct SharedReceiver {
    inner: Arc<tokio::sync::Mutex<mpsc::Receiver<Cid>>>,
}

impl SharedReceiver {
    async fn recv(&self) -> Option<Cid> {
        self.inner.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{DagNode, PbNode};
    use crate::service::{LinkCache, MemoryLinkCache};
    use bytes::Bytes;
    use cairn_blockservice::BlockService;
    use cairn_store::{Blockstore, MemoryBlockstore};
    use cairn_types::{HashAlg, Link};

    fn service() -> Arc<DagService> {
        let store = Arc::new(MemoryBlockstore::new());
        let blocks = BlockService::new_offline(store as Arc<dyn Blockstore>);
        DagService::new(blocks, Arc::new(MemoryLinkCache::new()) as Arc<dyn LinkCache>)
    }

    fn leaf(data: &[u8]) -> DagNode {
        DagNode::Raw(Bytes::copy_from_slice(data))
    }

    /// Build a two-level tree:
    ///         root
    ///        /    \
    ///      i0      i1
    ///     /  \    /  \
    ///    l0  l1  l2  l3
    async fn build_tree(service: &DagService) -> (Cid, Vec<Cid>, Vec<Cid>) {
        let mut leaf_cids = Vec::new();
        for i in 0u8..4 {
            leaf_cids.push(service.add(&leaf(&[i; 4])).await.unwrap());
        }
        let mut interior_cids = Vec::new();
        for pair in leaf_cids.chunks(2) {
            let links = pair
                .iter()
                .enumerate()
                .map(|(i, cid)| Link::new(format!("l{i}"), 4, *cid))
                .collect();
            let node = DagNode::Pb(PbNode::new(Bytes::new(), links));
            interior_cids.push(service.add(&node).await.unwrap());
        }
        let root_links = interior_cids
            .iter()
            .enumerate()
            .map(|(i, cid)| Link::new(format!("i{i}"), 8, *cid))
            .collect();
        let root = service
            .add(&DagNode::Pb(PbNode::new(Bytes::new(), root_links)))
            .await
            .unwrap();
        (root, interior_cids, leaf_cids)
    }

    #[tokio::test]
    async fn sequential_walk_visits_all_in_dfs_order() {
        let service = service();
        let (root, interiors, leaves) = build_tree(&service).await;

        let mut visited = Vec::new();
        enumerate_children(&CancellationToken::new(), &service, root, &mut |cid| {
            visited.push(*cid);
            true
        })
        .await
        .unwrap();

        let expected = vec![
            root,
            interiors[0],
            leaves[0],
            leaves[1],
            interiors[1],
            leaves[2],
            leaves[3],
        ];
        assert_eq!(visited, expected);
    }

    #[tokio::test]
    async fn visit_gate_prunes_subtrees() {
        let service = service();
        let (root, interiors, _) = build_tree(&service).await;

        let skip = interiors[0];
        let mut visited = Vec::new();
        enumerate_children(&CancellationToken::new(), &service, root, &mut |cid| {
            visited.push(*cid);
            *cid != skip
        })
        .await
        .unwrap();

        // The pruned interior is visited but its leaves are not.
        assert_eq!(visited.len(), 5);
        assert!(visited.contains(&skip));
    }

    #[tokio::test]
    async fn missing_intermediate_surfaces_its_cid() {
        let service = service();
        let (root, interiors, _) = build_tree(&service).await;
        service.remove(&interiors[1]).unwrap();

        let err = enumerate_children(&CancellationToken::new(), &service, root, &mut |_| true)
            .await
            .unwrap_err();
        assert!(matches!(err, DagError::NotFound(cid) if cid == interiors[1]));
    }

    #[tokio::test]
    async fn parallel_walk_streams_in_dfs_order() {
        let service = service();
        let (root, interiors, leaves) = build_tree(&service).await;

        let mut rx = walk_parallel(
            Arc::clone(&service),
            root,
            CancellationToken::new(),
            WalkConfig::default(),
        );
        let mut visited = Vec::new();
        while let Some(item) = rx.recv().await {
            visited.push(item.unwrap());
        }

        // Everything is visited exactly once, root first. With parallel
        // fetching the fine-grained order interleaves, but the leftmost
        // interior is always announced before the rightmost.
        assert_eq!(visited.len(), 7);
        assert_eq!(visited[0], root);
        let pos = |cid: &Cid| visited.iter().position(|c| c == cid).unwrap();
        assert!(pos(&interiors[0]) < pos(&interiors[1]));
        for leaf in &leaves {
            assert!(visited.contains(leaf));
        }
    }

    #[tokio::test]
    async fn parallel_walk_single_worker_matches_sequential_order() {
        let service = service();
        let (root, interiors, leaves) = build_tree(&service).await;

        let mut rx = walk_parallel(
            Arc::clone(&service),
            root,
            CancellationToken::new(),
            WalkConfig { workers: 1 },
        );
        let mut visited = Vec::new();
        while let Some(item) = rx.recv().await {
            visited.push(item.unwrap());
        }
        let expected = vec![
            root,
            interiors[0],
            leaves[0],
            leaves[1],
            interiors[1],
            leaves[2],
            leaves[3],
        ];
        assert_eq!(visited, expected);
    }

    #[tokio::test]
    async fn parallel_walk_surfaces_first_error() {
        let service = service();
        let (root, interiors, _) = build_tree(&service).await;
        service.remove(&interiors[0]).unwrap();

        let mut rx = walk_parallel(
            Arc::clone(&service),
            root,
            CancellationToken::new(),
            WalkConfig::default(),
        );
        let mut saw_error = false;
        while let Some(item) = rx.recv().await {
            if let Err(DagError::NotFound(cid)) = item {
                assert_eq!(cid, interiors[0]);
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn parallel_walk_observes_cancellation() {
        let service = service();
        let (root, _, _) = build_tree(&service).await;

        let ctx = CancellationToken::new();
        ctx.cancel();
        let mut rx = walk_parallel(Arc::clone(&service), root, ctx, WalkConfig::default());
        // The stream ends without yielding the full tree.
        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert!(count < 7);
    }

    #[tokio::test]
    async fn shared_subtree_visited_once() {
        let service = service();
        let shared = service.add(&leaf(b"shared")).await.unwrap();
        let l = service
            .add(&DagNode::Pb(PbNode::new(
                Bytes::new(),
                vec![Link::new("s", 6, shared)],
            )))
            .await
            .unwrap();
        let r = service
            .add(&DagNode::Pb(PbNode::new(
                Bytes::from_static(b"r"),
                vec![Link::new("s", 6, shared)],
            )))
            .await
            .unwrap();
        let root = service
            .add(&DagNode::Pb(PbNode::new(
                Bytes::new(),
                vec![Link::new("l", 1, l), Link::new("r", 1, r)],
            )))
            .await
            .unwrap();

        let mut visited = Vec::new();
        enumerate_children(&CancellationToken::new(), &service, root, &mut |cid| {
            visited.push(*cid);
            true
        })
        .await
        .unwrap();
        assert_eq!(visited.iter().filter(|c| **c == shared).count(), 1);
        assert_eq!(visited.len(), 4);
    }
}
