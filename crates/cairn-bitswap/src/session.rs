//! The bitswap session: one long-lived actor coordinating wants, provider
//! searches and block deliveries.
//!
//! The main loop owns the want-batching state: a new local want starts a
//! short batching window (or flushes immediately past the threshold), and a
//! rebroadcast tick resends the full wantlist to providers of the first want
//! while anything is still outstanding. Incoming messages are processed on
//! the network's receive path; outgoing blocks are drained from the decision
//! engine by a dedicated worker.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use cairn_net::{
    ConnEvent, ContentRouting, MessageHandler, NetError, NetResult, NetworkAdapter, ProtocolId,
};
use cairn_store::Blockstore;
use cairn_types::{Block, Cid, Multihash, PeerId};

use crate::config::BitswapConfig;
use crate::engine::Engine;
use crate::error::{BitswapError, BitswapResult};
use crate::ledger::{LedgerMap, LedgerStats};
use crate::message::{block_from_payload, BitswapMessage};
use crate::notifications::Notifications;
use crate::wantlist::{Entry, Wantlist};
use crate::BITSWAP_PROTOCOL;

/// Buffered block requests between `get_block` callers and the main loop.
const REQUEST_BUFFER: usize = 32;

enum Command {
    BlockRequest(Cid),
}

/// The block-exchange session.
///
/// Construction registers the inbound handler and spawns the main loop, the
/// engine worker and the connection watcher; all run until [`Bitswap::shutdown`].
pub struct Bitswap {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

struct Shared {
    store: Arc<dyn Blockstore>,
    network: Arc<dyn NetworkAdapter>,
    routing: Arc<dyn ContentRouting>,
    wantlist: Wantlist,
    ledgers: Arc<LedgerMap>,
    engine: Engine,
    notifications: Notifications,
    cfg: BitswapConfig,
    cancel: CancellationToken,
}

impl Bitswap {
    /// Start a session. Must be called within a tokio runtime.
    pub fn new(
        store: Arc<dyn Blockstore>,
        network: Arc<dyn NetworkAdapter>,
        routing: Arc<dyn ContentRouting>,
        cfg: BitswapConfig,
    ) -> Arc<Self> {
        let ledgers = Arc::new(LedgerMap::new());
        let engine = Engine::new(Arc::clone(&store), Arc::clone(&ledgers), cfg.strategy);
        let shared = Arc::new(Shared {
            store,
            network: Arc::clone(&network),
            routing,
            wantlist: Wantlist::new(),
            ledgers,
            engine,
            notifications: Notifications::new(),
            cfg,
            cancel: CancellationToken::new(),
        });

        network.set_receiver(
            ProtocolId::new(BITSWAP_PROTOCOL),
            Arc::new(InboundHandler {
                shared: Arc::clone(&shared),
            }),
        );

        let (commands_tx, commands_rx) = mpsc::channel(REQUEST_BUFFER);
        tokio::spawn(main_loop(Arc::clone(&shared), commands_rx));
        tokio::spawn(engine_worker(Arc::clone(&shared)));
        tokio::spawn(conn_watcher(Arc::clone(&shared)));

        Arc::new(Self {
            shared,
            commands: commands_tx,
        })
    }

    /// Fetch one block, waiting until a peer supplies it or `ctx` cancels.
    pub async fn get_block(&self, ctx: &CancellationToken, cid: Cid) -> BitswapResult<Block> {
        // Subscribe before wanting so a fast arrival cannot slip between.
        let mut arrival = self.shared.notifications.subscribe(cid);
        self.shared.wantlist.add(cid, 1);

        let enqueue = self.commands.send(Command::BlockRequest(cid));
        let result = tokio::select! {
            _ = ctx.cancelled() => Err(BitswapError::Cancelled),
            sent = enqueue => match sent {
                Ok(()) => {
                    tokio::select! {
                        _ = ctx.cancelled() => Err(BitswapError::Cancelled),
                        block = arrival.recv() => match block {
                            Some(block) => Ok(block),
                            None => Err(BitswapError::Closed),
                        }
                    }
                }
                Err(_) => Err(BitswapError::Closed),
            }
        };

        self.shared.wantlist.remove(&cid);
        drop(arrival);
        self.shared.notifications.release(&cid);
        result
    }

    /// Fetch many blocks; the stream yields them in arrival order and closes
    /// when all have arrived, the session stops, or `ctx` cancels.
    pub async fn get_blocks(
        &self,
        ctx: &CancellationToken,
        cids: Vec<Cid>,
    ) -> mpsc::Receiver<Block> {
        let (out_tx, out_rx) = mpsc::channel(cids.len().max(1));
        let shared = Arc::clone(&self.shared);
        let commands = self.commands.clone();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let total = cids.len();
            let mut arrivals = Vec::with_capacity(total);
            for (i, cid) in cids.iter().enumerate() {
                arrivals.push((*cid, shared.notifications.subscribe(*cid)));
                // Earlier entries rank higher, as with a file read left to right.
                shared.wantlist.add(*cid, (total - i) as i32);
            }
            for cid in &cids {
                if commands.send(Command::BlockRequest(*cid)).await.is_err() {
                    break;
                }
            }

            let mut pending: futures::stream::FuturesUnordered<_> = arrivals
                .into_iter()
                .map(|(cid, mut rx)| async move { (cid, rx.recv().await) })
                .collect();

            use futures::StreamExt;
            let mut received = 0usize;
            while received < total {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    next = pending.next() => match next {
                        Some((cid, Some(block))) => {
                            shared.wantlist.remove(&cid);
                            received += 1;
                            if out_tx.send(block).await.is_err() {
                                break;
                            }
                        }
                        Some((_, None)) | None => break,
                    }
                }
            }
            // Clear anything still wanted by this call and drop the
            // subscriptions it held.
            drop(pending);
            for cid in &cids {
                shared.wantlist.remove(cid);
                shared.notifications.release(cid);
            }
        });

        out_rx
    }

    /// Announce a block that became available locally: store it, wake local
    /// waiters, tell the DHT, and queue sends to partners that want it.
    pub async fn has_block(&self, block: Block) -> BitswapResult<()> {
        self.shared.store.put(block.clone())?;
        self.shared.wantlist.remove(block.cid());
        self.shared.notifications.publish(block.clone());
        self.shared.engine.block_available(block.cid());
        if let Err(err) = self.shared.routing.provide(*block.cid()).await {
            debug!(cid = %block.cid().short_hex(), %err, "provider announce failed");
        }
        Ok(())
    }

    /// Snapshot of the local wantlist.
    pub fn wantlist_snapshot(&self) -> Vec<Entry> {
        self.shared.wantlist.entries()
    }

    /// Accounting snapshot for one partner.
    pub fn ledger(&self, peer: &PeerId) -> Option<LedgerStats> {
        self.shared.ledgers.stats(peer)
    }

    /// Stop the session; notifications shut down and waiters unblock.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}

impl Shared {
    /// Our full current wantlist as a message.
    fn wantlist_message(&self) -> BitswapMessage {
        let mut msg = BitswapMessage::new(true);
        for entry in self.wantlist.entries() {
            msg.add_want(&entry.cid, entry.priority);
        }
        msg
    }

    /// Process one inbound message and build the piggyback reply.
    async fn handle_incoming(self: &Arc<Self>, from: PeerId, msg: BitswapMessage) -> BitswapMessage {
        trace!(
            from = %from.short_hex(),
            wants = msg.wantlist.len(),
            blocks = msg.blocks.len() + msg.payload.len(),
            "bitswap message"
        );

        // Blocks first, so wants in the same message can be served from them.
        for raw in &msg.blocks {
            match self.resolve_legacy(raw) {
                Ok(block) => self.block_arrived(block).await,
                Err(err) => debug!(%err, "legacy block rejected"),
            }
        }
        for payload in &msg.payload {
            match block_from_payload(payload) {
                Ok(block) => self.block_arrived(block).await,
                Err(err) => debug!(%err, "payload block rejected"),
            }
        }

        // Ledger accounting plus want/cancel handling.
        self.engine.message_received(from, &msg);

        // Always tell the partner what we still seek.
        self.wantlist_message()
    }

    /// A verified block reached us: store, notify, unwant, announce.
    async fn block_arrived(self: &Arc<Self>, block: Block) {
        if let Err(err) = self.store.put(block.clone()) {
            warn!(cid = %block.cid().short_hex(), %err, "could not store arrived block");
            return;
        }
        let cid = *block.cid();
        self.wantlist.remove(&cid);
        self.notifications.publish(block);
        self.engine.block_available(&cid);

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = shared.routing.provide(cid).await {
                debug!(cid = %cid.short_hex(), %err, "provider announce failed");
            }
        });
    }

    /// Pair legacy payload bytes with the want they satisfy; unmatched bytes
    /// become raw sha2-256 blocks.
    fn resolve_legacy(&self, bytes: &[u8]) -> BitswapResult<Block> {
        for entry in self.wantlist.entries() {
            let alg = entry.cid.hash().alg();
            if &Multihash::digest(alg, bytes) == entry.cid.hash() {
                return Block::with_cid(entry.cid, bytes.to_vec()).map_err(BitswapError::Type);
            }
        }
        Block::new(
            bytes.to_vec(),
            cairn_types::HashAlg::Sha2_256,
            cairn_types::Codec::Raw,
        )
        .map_err(BitswapError::Type)
    }

    /// Send our wantlist to one peer and fold its response back in.
    async fn send_wantlist(self: &Arc<Self>, peer: PeerId) {
        let msg = self.wantlist_message();
        if msg.wantlist.is_empty() {
            return;
        }
        let encoded = match msg.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(%err, "wantlist encode failed");
                return;
            }
        };
        let protocol_id = ProtocolId::new(BITSWAP_PROTOCOL);
        let request = self.network.send_request(&peer, &protocol_id, encoded);
        match request.await {
            Ok(reply) => {
                self.engine.message_sent(peer, &msg, &[]);
                match BitswapMessage::decode(&reply) {
                    Ok(reply) => {
                        let _ = self.handle_incoming(peer, reply).await;
                    }
                    Err(err) => debug!(peer = %peer.short_hex(), %err, "bad wantlist reply"),
                }
            }
            // Transient: the rebroadcast tick retries.
            Err(err) => debug!(peer = %peer.short_hex(), %err, "wantlist send failed"),
        }
    }

    /// Locate providers for `cid` and send them the full wantlist.
    async fn broadcast_wantlist(self: &Arc<Self>, cid: Cid) {
        let mut providers = self
            .routing
            .find_providers(cid, self.cfg.providers_per_find)
            .await;
        let mut any = false;
        while let Some(peer) = providers.recv().await {
            any = true;
            self.send_wantlist(peer).await;
        }
        if !any {
            debug!(cid = %cid.short_hex(), "no providers found");
        }
    }
}

/// The inbound demultiplexer registered with the network adapter.
struct InboundHandler {
    shared: Arc<Shared>,
}

#[async_trait]
impl MessageHandler for InboundHandler {
    async fn handle_message(&self, from: PeerId, data: Bytes) -> NetResult<Option<Bytes>> {
        if self.shared.cancel.is_cancelled() {
            return Err(NetError::Cancelled);
        }
        let msg = BitswapMessage::decode(&data)
            .map_err(|_| NetError::BadHeader("undecodable bitswap message"))?;
        let reply = self.shared.handle_incoming(from, msg).await;
        let bytes = reply
            .encode()
            .map_err(|_| NetError::BadHeader("unencodable reply"))?;
        Ok(Some(Bytes::from(bytes)))
    }
}

/// Timer ticks and want batching.
async fn main_loop(shared: Arc<Shared>, mut commands: mpsc::Receiver<Command>) {
    let mut rebroadcast = tokio::time::interval(shared.cfg.rebroadcast_interval);
    rebroadcast.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    rebroadcast.tick().await; // the first tick fires immediately

    let mut unsent = 0usize;
    let mut search_cid: Option<Cid> = None;
    let mut flush_at: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                shared.notifications.shutdown();
                info!("bitswap session stopped");
                return;
            }

            _ = rebroadcast.tick() => {
                if shared.wantlist.is_empty() {
                    continue;
                }
                let cid = search_cid.take().or_else(|| shared.wantlist.first());
                if let Some(cid) = cid {
                    shared.broadcast_wantlist(cid).await;
                }
                unsent = 0;
                flush_at = None;
            }

            _ = sleep_until_opt(flush_at), if flush_at.is_some() => {
                if let Some(cid) = search_cid.take() {
                    shared.broadcast_wantlist(cid).await;
                }
                unsent = 0;
                flush_at = None;
                rebroadcast.reset();
            }

            cmd = commands.recv() => match cmd {
                Some(Command::BlockRequest(cid)) => {
                    if unsent == 0 {
                        // The first unsent want carries the provider search.
                        search_cid = Some(cid);
                    }
                    unsent += 1;
                    if unsent >= shared.cfg.batch_threshold {
                        if let Some(cid) = search_cid.take() {
                            shared.broadcast_wantlist(cid).await;
                        }
                        unsent = 0;
                        flush_at = None;
                        rebroadcast.reset();
                    } else {
                        flush_at = Some(
                            tokio::time::Instant::now() + shared.cfg.provider_search_batch_delay,
                        );
                    }
                }
                None => return,
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

/// Drain the decision engine, sending one block per envelope.
async fn engine_worker(shared: Arc<Shared>) {
    while let Some(envelope) = shared.engine.next_envelope(&shared.cancel).await {
        let mut msg = shared.wantlist_message();
        msg.add_block(&envelope.block);
        let encoded = match msg.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(%err, "block message encode failed");
                continue;
            }
        };
        let protocol_id = ProtocolId::new(BITSWAP_PROTOCOL);
        let send = shared
            .network
            .send_message(&envelope.peer, &protocol_id, encoded);
        match send.await {
            Ok(()) => {
                shared
                    .engine
                    .message_sent(envelope.peer, &msg, &[*envelope.block.cid()]);
                trace!(
                    peer = %envelope.peer.short_hex(),
                    cid = %envelope.block.cid().short_hex(),
                    depth = envelope.queue_depth,
                    "block sent"
                );
            }
            // Per-peer failure never terminates the session.
            Err(err) => {
                debug!(peer = %envelope.peer.short_hex(), %err, "block send failed");
            }
        }
    }
}

/// Track connects and disconnects for the engine's queue lifecycle.
async fn conn_watcher(shared: Arc<Shared>) {
    let mut events = shared.network.subscribe_events();
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            event = events.recv() => match event {
                Ok(ConnEvent::Connected(peer)) => shared.engine.peer_connected(peer),
                Ok(ConnEvent::Disconnected(peer)) => shared.engine.peer_disconnected(peer),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "conn event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}
