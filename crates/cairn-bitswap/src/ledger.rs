//! Per-partner accounting.
//!
//! A ledger tracks how many block bytes have moved in each direction with one
//! partner, plus the partner's outstanding wants. The map is sharded by peer
//! id so the session's receive path and the engine's dispatch path do not
//! contend on one lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use cairn_types::{Cid, PeerId};

const SHARDS: usize = 16;

/// Accounting state for one partner.
#[derive(Debug)]
pub struct Ledger {
    pub partner: PeerId,
    bytes_sent: u64,
    bytes_received: u64,
    /// The partner's outstanding wants and their priorities.
    wants: HashMap<Cid, i32>,
    last_exchange: Option<Instant>,
    exchange_count: u64,
}

impl Ledger {
    fn new(partner: PeerId) -> Self {
        Self {
            partner,
            bytes_sent: 0,
            bytes_received: 0,
            wants: HashMap::new(),
            last_exchange: None,
            exchange_count: 0,
        }
    }

    /// Record block bytes sent to the partner. Monotonic.
    pub fn sent_bytes(&mut self, n: u64) {
        self.bytes_sent += n;
        self.touch();
    }

    /// Record block bytes received from the partner. Monotonic.
    pub fn received_bytes(&mut self, n: u64) {
        self.bytes_received += n;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_exchange = Some(Instant::now());
        self.exchange_count += 1;
    }

    /// The partner declared it wants `cid`.
    pub fn wants(&mut self, cid: Cid, priority: i32) {
        self.wants.insert(cid, priority);
    }

    /// The partner cancelled a want.
    pub fn cancel_want(&mut self, cid: &Cid) {
        self.wants.remove(cid);
    }

    /// The partner sent a full wantlist; drop the old view.
    pub fn clear_wants(&mut self) {
        self.wants.clear();
    }

    /// Whether the partner has declared it wants `cid`.
    pub fn wants_block(&self, cid: &Cid) -> Option<i32> {
        self.wants.get(cid).copied()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// `sent / (received + 1)`: above 1 we are over-giving.
    pub fn debt_ratio(&self) -> f64 {
        self.bytes_sent as f64 / (self.bytes_received as f64 + 1.0)
    }
}

/// Read-only snapshot of one ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerStats {
    pub partner: PeerId,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub wants: usize,
    pub exchange_count: u64,
}

/// Sharded map of ledgers, created lazily on first exchange with a partner.
pub struct LedgerMap {
    shards: Vec<Mutex<HashMap<PeerId, Ledger>>>,
}

impl LedgerMap {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, peer: &PeerId) -> &Mutex<HashMap<PeerId, Ledger>> {
        let index = peer.as_bytes()[0] as usize % SHARDS;
        &self.shards[index]
    }

    /// Run `f` against the partner's ledger, creating it if absent.
    pub fn with_ledger<R>(&self, peer: PeerId, f: impl FnOnce(&mut Ledger) -> R) -> R {
        let mut shard = self.shard(&peer).lock().expect("lock poisoned");
        let ledger = shard.entry(peer).or_insert_with(|| Ledger::new(peer));
        f(ledger)
    }

    /// Snapshot one partner's counters, if a ledger exists.
    pub fn stats(&self, peer: &PeerId) -> Option<LedgerStats> {
        let shard = self.shard(peer).lock().expect("lock poisoned");
        shard.get(peer).map(|l| LedgerStats {
            partner: l.partner,
            bytes_sent: l.bytes_sent,
            bytes_received: l.bytes_received,
            wants: l.wants.len(),
            exchange_count: l.exchange_count,
        })
    }

    /// All partners with a ledger.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers = Vec::new();
        for shard in &self.shards {
            peers.extend(shard.lock().expect("lock poisoned").keys().copied());
        }
        peers
    }
}

impl Default for LedgerMap {
    fn default() -> Self {
        Self::new()
    }
}
