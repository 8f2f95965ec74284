//! Background batch fetcher for wide, shallow reads (sharded directories).
//!
//! A single consumer walks a tree left to right and asks for the children of
//! one parent at a time. The fetcher folds many such child sets into single
//! `get_many` calls bounded by the batch size, and opportunistically queues
//! the children of what it just fetched so the next request is usually
//! already done (a hit) or at least in flight (a near miss). A requested job
//! still sitting on the todo stack is promoted to the front of the next
//! batch (a miss).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use cairn_types::Cid;

use crate::error::{DagError, DagResult};
use crate::node::DagNode;
use crate::service::DagService;

/// Tunables for the batch fetcher.
#[derive(Clone, Copy, Debug)]
pub struct FetcherConfig {
    /// Maximum CIDs folded into one `get_many` call. Must be at least as
    /// large as one node's fan-out; somewhat larger works best since jobs
    /// are packed whole.
    pub batch_size: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self { batch_size: 320 }
    }
}

/// Counters kept for tests and tuning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetcherStats {
    /// Requested job was already done.
    pub hits: u64,
    /// Requested job was in the running batch.
    pub near_misses: u64,
    /// Requested job was still on the todo stack.
    pub misses: u64,
    /// Batches dispatched.
    pub batches: u64,
    /// CIDs fetched across all batches.
    pub cids: u64,
}

type JobResult = DagResult<HashMap<Cid, DagNode>>;

struct Request {
    parent: Cid,
    reply: oneshot::Sender<JobResult>,
}

enum JobState {
    Todo,
    Running,
    Done(JobResult),
}

struct Job {
    cids: Vec<Cid>,
    state: JobState,
}

struct BatchDone {
    /// Parents fetched in this batch.
    parents: Vec<Cid>,
    /// Every node fetched, keyed by CID. Missing entries are failures.
    nodes: HashMap<Cid, DagNode>,
    cid_count: usize,
}

/// Handle to a running fetcher actor.
pub struct Fetcher {
    requests: mpsc::Sender<Request>,
    stats: Arc<Mutex<FetcherStats>>,
}

impl Fetcher {
    /// Start the fetcher; it runs until `ctx` cancels.
    pub fn start(service: Arc<DagService>, cfg: FetcherConfig, ctx: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(8);
        let stats = Arc::new(Mutex::new(FetcherStats::default()));
        tokio::spawn(main_loop(service, cfg, ctx, rx, Arc::clone(&stats)));
        Self {
            requests: tx,
            stats,
        }
    }

    /// The children of `parent`, fetched as part of a batch.
    ///
    /// Returns a map from child CID to node. A parent with no links yields
    /// an empty map.
    pub async fn get_children(&self, parent: Cid) -> JobResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Request {
                parent,
                reply: reply_tx,
            })
            .await
            .map_err(|_| DagError::Cancelled)?;
        reply_rx.await.map_err(|_| DagError::Cancelled)?
    }

    pub fn stats(&self) -> FetcherStats {
        *self.stats.lock().expect("lock poisoned")
    }
}

struct Actor {
    service: Arc<DagService>,
    cfg: FetcherConfig,
    ctx: CancellationToken,
    jobs: HashMap<Cid, Job>,
    /// Pending parents; top of the stack (the end) is fetched next.
    todo: Vec<Cid>,
    /// A requested job forced to the front of the next batch.
    todo_first: Option<Cid>,
    /// Parked replies, keyed by parent.
    waiting: HashMap<Cid, Vec<oneshot::Sender<JobResult>>>,
    running: bool,
    done_tx: mpsc::Sender<BatchDone>,
    stats: Arc<Mutex<FetcherStats>>,
}

async fn main_loop(
    service: Arc<DagService>,
    cfg: FetcherConfig,
    ctx: CancellationToken,
    mut requests: mpsc::Receiver<Request>,
    stats: Arc<Mutex<FetcherStats>>,
) {
    let (done_tx, mut done_rx) = mpsc::channel(1);
    let mut actor = Actor {
        service,
        cfg,
        ctx: ctx.clone(),
        jobs: HashMap::new(),
        todo: Vec::new(),
        todo_first: None,
        waiting: HashMap::new(),
        running: false,
        done_tx,
        stats,
    };

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                debug!("fetcher stopping");
                return;
            }
            Some(done) = done_rx.recv() => actor.handle_batch_done(done),
            request = requests.recv() => match request {
                Some(request) => actor.handle_request(request).await,
                None => return,
            },
        }
    }
}

impl Actor {
    async fn handle_request(&mut self, request: Request) {
        let parent = request.parent;

        if !self.jobs.contains_key(&parent) {
            // New job: discover the child set now, fetch it with the batch.
            let links = match self.service.get_links(&self.ctx, &parent).await {
                Ok(links) => links,
                Err(err) => {
                    let _ = request.reply.send(Err(err));
                    return;
                }
            };
            if links.is_empty() {
                let _ = request.reply.send(Ok(HashMap::new()));
                return;
            }
            let cids: Vec<Cid> = links.into_iter().map(|l| l.cid).collect();
            self.jobs.insert(
                parent,
                Job {
                    cids,
                    state: JobState::Todo,
                },
            );
            self.todo_first = Some(parent);
            self.waiting.entry(parent).or_default().push(request.reply);
            if !self.running {
                self.launch();
            }
            return;
        }

        let is_done = matches!(
            self.jobs.get(&parent).expect("job exists").state,
            JobState::Done(_)
        );
        let is_running = matches!(
            self.jobs.get(&parent).expect("job exists").state,
            JobState::Running
        );

        if is_done {
            self.bump(|s| s.hits += 1);
            let job = self.jobs.remove(&parent).expect("job exists");
            let JobState::Done(result) = job.state else {
                unreachable!()
            };
            let _ = request.reply.send(result);
        } else if is_running {
            self.bump(|s| s.near_misses += 1);
            self.waiting.entry(parent).or_default().push(request.reply);
        } else {
            self.bump(|s| s.misses += 1);
            self.todo.retain(|c| c != &parent);
            self.todo_first = Some(parent);
            self.waiting.entry(parent).or_default().push(request.reply);
            if !self.running {
                self.launch();
            }
        }
    }

    /// Pack whole jobs into a batch, promoted job first, and dispatch it.
    fn launch(&mut self) {
        let mut parents = Vec::new();
        let mut batch_cids = Vec::new();

        if let Some(first) = self.todo_first.take() {
            if let Some(job) = self.jobs.get_mut(&first) {
                if matches!(job.state, JobState::Todo) {
                    job.state = JobState::Running;
                    batch_cids.extend(job.cids.iter().copied());
                    parents.push(first);
                }
            }
        }
        while let Some(&parent) = self.todo.last() {
            let Some(job) = self.jobs.get_mut(&parent) else {
                self.todo.pop();
                continue;
            };
            if !batch_cids.is_empty() && batch_cids.len() + job.cids.len() > self.cfg.batch_size {
                break;
            }
            self.todo.pop();
            job.state = JobState::Running;
            batch_cids.extend(job.cids.iter().copied());
            parents.push(parent);
        }

        if parents.is_empty() {
            return;
        }
        self.running = true;
        trace!(jobs = parents.len(), cids = batch_cids.len(), "batch launched");

        let service = Arc::clone(&self.service);
        let ctx = self.ctx.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let cid_count = batch_cids.len();
            let mut nodes = HashMap::new();
            let mut rx = service.get_many(&ctx, batch_cids).await;
            while let Some(item) = rx.recv().await {
                if let Ok((cid, node)) = item {
                    nodes.insert(cid, node);
                }
            }
            let _ = done_tx
                .send(BatchDone {
                    parents,
                    nodes,
                    cid_count,
                })
                .await;
        });
    }

    fn handle_batch_done(&mut self, done: BatchDone) {
        self.running = false;
        self.bump(|s| {
            s.batches += 1;
            s.cids += done.cid_count as u64;
        });

        for parent in &done.parents {
            let Some(job) = self.jobs.get(parent) else {
                continue;
            };
            let job_cids = job.cids.clone();

            let result: JobResult = match job_cids.iter().find(|c| !done.nodes.contains_key(c)) {
                Some(missing) => Err(DagError::NotFound(*missing)),
                None => Ok(job_cids
                    .iter()
                    .map(|c| (*c, done.nodes[c].clone()))
                    .collect()),
            };

            // Predictive prefetch: queue the children of what we fetched,
            // left to right, so the consumer's next requests are ready.
            if result.is_ok() {
                for cid in job_cids.iter().rev() {
                    if let Some(node) = done.nodes.get(cid) {
                        if !node.links().is_empty() && !self.jobs.contains_key(cid) {
                            self.jobs.insert(
                                *cid,
                                Job {
                                    cids: node.links().iter().map(|l| l.cid).collect(),
                                    state: JobState::Todo,
                                },
                            );
                            self.todo.push(*cid);
                        }
                    }
                }
            }

            // Wake anything parked on this parent, or park the result.
            if let Some(waiters) = self.waiting.remove(parent) {
                self.jobs.remove(parent);
                for waiter in waiters {
                    let _ = waiter.send(clone_result(&result));
                }
            } else {
                let job = self.jobs.get_mut(parent).expect("job exists");
                job.state = JobState::Done(result);
            }
        }

        if self.todo_first.is_some() || !self.todo.is_empty() {
            self.launch();
        }
    }

    fn bump(&self, f: impl FnOnce(&mut FetcherStats)) {
        f(&mut self.stats.lock().expect("lock poisoned"));
    }
}

fn clone_result(result: &JobResult) -> JobResult {
    match result {
        Ok(map) => Ok(map.clone()),
        Err(DagError::NotFound(cid)) => Err(DagError::NotFound(*cid)),
        Err(DagError::Cancelled) => Err(DagError::Cancelled),
        Err(_) => Err(DagError::Decode("batch failed")),
    }
}
