//! The decision engine: per-partner task queues and the send policy.
//!
//! Wants that pass the strategy check become tasks on the wanting partner's
//! queue. A worker drains the queues through [`Engine::next_envelope`], which
//! picks the partner whose top task has the highest priority, breaking ties
//! toward the least-recently-served partner. Blocks are pulled from the
//! blockstore lazily at dispatch time; vanished blocks drop their task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use cairn_store::Blockstore;
use cairn_types::{Block, Cid, PeerId};

use crate::ledger::LedgerMap;
use crate::message::BitswapMessage;
use crate::strategy::Strategy;

/// A block ready to send to a peer, with the sender's remaining queue depth.
#[derive(Debug)]
pub struct Envelope {
    pub peer: PeerId,
    pub block: Block,
    pub queue_depth: usize,
}

#[derive(Clone, Copy, Debug)]
struct Task {
    cid: Cid,
    priority: i32,
    seq: u64,
}

#[derive(Default)]
struct PeerQueue {
    tasks: Vec<Task>,
    /// Serving order stamp; lower = served longer ago.
    last_served: u64,
}

impl PeerQueue {
    /// The best task: highest priority, then oldest.
    fn top(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .max_by(|a, b| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))
    }

    fn pop(&mut self, cid: &Cid) -> Option<Task> {
        let pos = self.tasks.iter().position(|t| &t.cid == cid)?;
        Some(self.tasks.remove(pos))
    }
}

struct State {
    queues: HashMap<PeerId, PeerQueue>,
    next_task_seq: u64,
    next_served_seq: u64,
}

/// Per-peer task queues plus the policy for feeding them.
pub struct Engine {
    state: Mutex<State>,
    work: Notify,
    store: Arc<dyn Blockstore>,
    ledgers: Arc<LedgerMap>,
    strategy: Strategy,
}

impl Engine {
    pub fn new(store: Arc<dyn Blockstore>, ledgers: Arc<LedgerMap>, strategy: Strategy) -> Self {
        Self {
            state: Mutex::new(State {
                queues: HashMap::new(),
                next_task_seq: 0,
                next_served_seq: 1,
            }),
            work: Notify::new(),
            store,
            ledgers,
            strategy,
        }
    }

    /// Account an inbound message and queue tasks for its wants.
    pub fn message_received(&self, peer: PeerId, msg: &BitswapMessage) {
        self.ledgers.with_ledger(peer, |l| {
            l.received_bytes(msg.block_bytes());
            if msg.full {
                // A full wantlist replaces our view of the partner's wants.
                l.clear_wants();
            }
        });

        let mut queued = false;
        for (cid, priority, cancel) in msg.wants() {
            if cancel {
                self.ledgers.with_ledger(peer, |l| l.cancel_want(&cid));
                self.drop_task(peer, &cid);
                continue;
            }
            self.ledgers.with_ledger(peer, |l| l.wants(cid, priority));
            if self.offer(peer, cid, priority) {
                queued = true;
            }
        }
        if queued {
            self.work.notify_one();
        }
    }

    /// Account an outbound message; sent blocks clear the partner's wants.
    pub fn message_sent(&self, peer: PeerId, msg: &BitswapMessage, sent_cids: &[Cid]) {
        self.ledgers.with_ledger(peer, |l| {
            l.sent_bytes(msg.block_bytes());
            for cid in sent_cids {
                l.cancel_want(cid);
            }
        });
    }

    /// A block became available locally; queue sends for partners wanting it.
    pub fn block_available(&self, cid: &Cid) {
        let mut queued = false;
        for peer in self.ledgers.peers() {
            let priority = self.ledgers.with_ledger(peer, |l| l.wants_block(cid));
            if let Some(priority) = priority {
                if self.offer(peer, *cid, priority) {
                    queued = true;
                }
            }
        }
        if queued {
            self.work.notify_one();
        }
    }

    /// Apply the send policy and queue the task if it passes. The block's
    /// presence is checked here but only pulled at dispatch.
    fn offer(&self, peer: PeerId, cid: Cid, priority: i32) -> bool {
        if !self.store.has(&cid).unwrap_or(false) {
            return false;
        }
        let ratio = self.ledgers.with_ledger(peer, |l| l.debt_ratio());
        if !self.strategy.should_send(ratio) {
            trace!(peer = %peer.short_hex(), ratio, "strategy withheld send");
            return false;
        }
        let mut state = self.state.lock().expect("lock poisoned");
        let seq = state.next_task_seq;
        state.next_task_seq += 1;
        let queue = state.queues.entry(peer).or_default();
        if queue.tasks.iter().any(|t| t.cid == cid) {
            return false;
        }
        queue.tasks.push(Task {
            cid,
            priority,
            seq,
        });
        true
    }

    fn drop_task(&self, peer: PeerId, cid: &Cid) {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(queue) = state.queues.get_mut(&peer) {
            queue.tasks.retain(|t| &t.cid != cid);
        }
    }

    pub fn peer_connected(&self, peer: PeerId) {
        self.state
            .lock()
            .expect("lock poisoned")
            .queues
            .entry(peer)
            .or_default();
    }

    pub fn peer_disconnected(&self, peer: PeerId) {
        self.state.lock().expect("lock poisoned").queues.remove(&peer);
    }

    /// Pending tasks for one peer (tests and introspection).
    pub fn queue_depth(&self, peer: &PeerId) -> usize {
        self.state
            .lock()
            .expect("lock poisoned")
            .queues
            .get(peer)
            .map(|q| q.tasks.len())
            .unwrap_or(0)
    }

    /// Wait for the next block to send.
    ///
    /// Returns `None` when `cancel` fires. Tasks whose block has vanished
    /// from the store are dropped silently.
    pub async fn next_envelope(&self, cancel: &CancellationToken) -> Option<Envelope> {
        loop {
            while let Some((peer, task, depth)) = self.dequeue() {
                match self.store.get(&task.cid) {
                    Ok(block) => {
                        return Some(Envelope {
                            peer,
                            block,
                            queue_depth: depth,
                        });
                    }
                    Err(_) => {
                        debug!(cid = %task.cid.short_hex(), "block vanished, task dropped");
                        continue;
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.work.notified() => {}
            }
        }
    }

    /// Pick the peer whose top task has the highest priority; ties go to the
    /// partner served longest ago.
    fn dequeue(&self) -> Option<(PeerId, Task, usize)> {
        let mut state = self.state.lock().expect("lock poisoned");
        let mut best: Option<(PeerId, Task, u64)> = None;
        for (peer, queue) in state.queues.iter() {
            let Some(top) = queue.top() else { continue };
            // Highest priority wins; ties go to the peer served longest ago,
            // then to the older task so selection is deterministic.
            let better = match &best {
                None => true,
                Some((_, current, served)) => top
                    .priority
                    .cmp(&current.priority)
                    .then(served.cmp(&queue.last_served))
                    .then(current.seq.cmp(&top.seq))
                    .is_gt(),
            };
            if better {
                best = Some((*peer, *top, queue.last_served));
            }
        }
        let (peer, task, _) = best?;
        let served_seq = state.next_served_seq;
        state.next_served_seq += 1;
        let queue = state.queues.get_mut(&peer).expect("queue exists");
        queue.pop(&task.cid);
        queue.last_served = served_seq;
        Some((peer, task, queue.tasks.len()))
    }
}
