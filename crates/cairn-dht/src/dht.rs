//! The DHT facade: iterative lookups, record publishing, provider
//! announcements, and the notification hooks that keep the routing table in
//! sync with connection events.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cairn_crypto::SigningKey;
use cairn_net::{ConnEvent, ContentRouting, NetError, NetResult, NetworkAdapter, ProtocolId};
use cairn_types::{Cid, PeerId};

use crate::config::DhtConfig;
use crate::error::{DhtError, DhtResult};
use crate::handler::DhtHandler;
use crate::key::DhtKey;
use crate::message::{DhtMessage, MessageKind, PeerInfo};
use crate::providers::ProviderStore;
use crate::query::{run_query, QueryConfig, QueryOutcome, QueryStep};
use crate::record::{RecordStore, RecordValidator, SignedRecord};
use crate::rtable::RoutingTable;
use crate::DHT_PROTOCOL;

/// A Kademlia DHT node.
///
/// Construction registers the RPC handler with the network adapter and
/// spawns the connection-event watcher and the provider-store GC; both run
/// until [`Dht::shutdown`].
pub struct Dht {
    local: PeerId,
    network: Arc<dyn NetworkAdapter>,
    table: Arc<RoutingTable>,
    records: Arc<RecordStore>,
    providers: Arc<ProviderStore>,
    validator: Arc<RecordValidator>,
    signer: SigningKey,
    cfg: DhtConfig,
    cancel: CancellationToken,
}

impl Dht {
    /// Create a DHT node on `network`. Must be called within a tokio runtime.
    pub fn new(network: Arc<dyn NetworkAdapter>, signer: SigningKey, cfg: DhtConfig) -> Arc<Self> {
        let local = network.local_peer();
        let table = Arc::new(RoutingTable::new(local, cfg.k, cfg.bucket_staleness));
        let records = Arc::new(RecordStore::new());
        let providers = Arc::new(ProviderStore::new(cfg.provider_ttl, cfg.provider_capacity));
        let validator = Arc::new(RecordValidator::new());
        let cancel = CancellationToken::new();

        let handler = DhtHandler::new(
            Arc::clone(&table),
            Arc::clone(&records),
            Arc::clone(&providers),
            Arc::clone(&validator),
            cfg.k,
        );
        network.set_receiver(ProtocolId::new(DHT_PROTOCOL), Arc::new(handler));

        providers.spawn_gc(cfg.provider_gc_interval, cancel.clone());

        let dht = Arc::new(Self {
            local,
            network,
            table,
            records,
            providers,
            validator,
            signer,
            cfg,
            cancel,
        });
        dht.spawn_event_watcher();
        dht
    }

    /// Keep the routing table in sync with connection events.
    fn spawn_event_watcher(self: &Arc<Self>) {
        let dht = Arc::clone(self);
        let mut events = dht.network.subscribe_events();
        let cancel = dht.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events.recv() => match event {
                        Ok(ConnEvent::Connected(peer)) => {
                            dht.table.update(peer);
                        }
                        Ok(ConnEvent::Disconnected(peer)) => {
                            dht.table.remove(&peer);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "conn event stream lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });
    }

    /// Stop background tasks.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub fn provider_store(&self) -> &Arc<ProviderStore> {
        &self.providers
    }

    fn query_config(&self) -> QueryConfig {
        QueryConfig {
            k: self.cfg.k,
            alpha: self.cfg.alpha,
        }
    }

    /// One RPC with the configured deadline. A successful exchange counts as
    /// liveness for the remote.
    async fn rpc(&self, peer: PeerId, msg: DhtMessage) -> DhtResult<DhtMessage> {
        let data = Bytes::from(msg.encode()?);
        let protocol_id = ProtocolId::new(DHT_PROTOCOL);
        let request = self.network.send_request(&peer, &protocol_id, data);
        let resp = match tokio::time::timeout(self.cfg.rpc_timeout, request).await {
            Err(_) => return Err(DhtError::Timeout),
            Ok(Err(err)) => return Err(err.into()),
            Ok(Ok(bytes)) => DhtMessage::decode(&bytes)?,
        };
        self.table.update(peer);
        Ok(resp)
    }

    /// Seed peers with which to start a lookup toward `key`.
    fn seeds(&self, key: &DhtKey) -> DhtResult<Vec<PeerId>> {
        let seeds = self.table.nearest(key, self.cfg.k);
        if seeds.is_empty() {
            return Err(DhtError::LookupFailure);
        }
        Ok(seeds)
    }

    /// Iterative FIND_NODE toward a peer id; results carry the target when a
    /// responder advertised it.
    pub(crate) async fn lookup_peer(&self, target: PeerId) -> DhtResult<QueryOutcome<PeerId>> {
        let key = DhtKey::for_peer(&target);
        let seeds = self.seeds(&key)?;
        run_query(
            key,
            seeds,
            self.query_config(),
            self.cancel.child_token(),
            |peer| async move {
                let msg = DhtMessage::new(MessageKind::FindNode, target.as_bytes().to_vec());
                let resp = self.rpc(peer, msg).await?;
                let closer: Vec<PeerId> = resp.closer_peers.iter().map(|p| p.id).collect();
                let found = if peer == target || closer.contains(&target) {
                    vec![target]
                } else {
                    Vec::new()
                };
                Ok(QueryStep { closer, found })
            },
            |results: &[PeerId]| !results.is_empty(),
        )
        .await
    }

    /// Locate a peer in the network.
    pub async fn find_peer(&self, target: PeerId) -> DhtResult<PeerId> {
        if target == self.local || self.table.contains(&target) {
            return Ok(target);
        }
        let outcome = self.lookup_peer(target).await?;
        debug!(target = %target.short_hex(), queried = outcome.queried, "find_peer finished");
        outcome.results.into_iter().next().ok_or(DhtError::NotFound)
    }

    /// Sign and publish a value record to the k closest peers.
    ///
    /// The record is always stored locally; with an empty routing table the
    /// publish is local-only.
    pub async fn put_value(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> DhtResult<()> {
        let record = SignedRecord::make(key, value, &self.signer);
        self.validator.validate(&record)?;
        self.records.put(record.clone());

        let dht_key = DhtKey::from_bytes(&record.key);
        let seeds = match self.seeds(&dht_key) {
            Ok(seeds) => seeds,
            Err(_) => {
                debug!("put_value with empty table; stored locally only");
                return Ok(());
            }
        };

        let outcome = run_query::<(), _, _, _>(
            dht_key,
            seeds,
            self.query_config(),
            self.cancel.child_token(),
            |peer| {
                let record = record.clone();
                async move {
                    let msg = DhtMessage::new(MessageKind::PutValue, record.key.clone())
                        .with_record(record);
                    let resp = self.rpc(peer, msg).await?;
                    Ok(QueryStep {
                        closer: resp.closer_peers.iter().map(|p| p.id).collect(),
                        found: Vec::new(),
                    })
                }
            },
            |_| false,
        )
        .await?;
        info!(queried = outcome.queried, "record published");
        Ok(())
    }

    /// Fetch a value record, local store first, verifying before acceptance.
    pub async fn get_value(&self, key: &[u8]) -> DhtResult<Vec<u8>> {
        if let Some(record) = self.records.get(key) {
            return Ok(record.value);
        }

        let dht_key = DhtKey::from_bytes(key);
        let seeds = self.seeds(&dht_key)?;
        let key_owned = key.to_vec();
        let outcome = run_query(
            dht_key,
            seeds,
            self.query_config(),
            self.cancel.child_token(),
            |peer| {
                let key = key_owned.clone();
                async move {
                    let resp = self.rpc(peer, DhtMessage::new(MessageKind::GetValue, key)).await?;
                    let closer: Vec<PeerId> = resp.closer_peers.iter().map(|p| p.id).collect();
                    let mut found = Vec::new();
                    if let Some(record) = resp.record {
                        // Verification failures drop the record, not the peer.
                        if record.verify().is_ok() {
                            found.push(record);
                        }
                    }
                    Ok(QueryStep { closer, found })
                }
            },
            |results: &[SignedRecord]| !results.is_empty(),
        )
        .await?;

        match outcome.results.into_iter().next() {
            Some(record) => {
                self.records.put(record.clone());
                Ok(record.value)
            }
            None => Err(DhtError::NotFound),
        }
    }

    /// Announce that this node can provide `cid`.
    pub async fn provide_block(&self, cid: Cid) -> DhtResult<()> {
        self.providers.add(cid, self.local);

        let key = DhtKey::for_cid(&cid);
        let Ok(seeds) = self.seeds(&key) else {
            return Ok(());
        };

        // Walk toward the key to find the peers that should hold the record.
        let outcome = run_query::<(), _, _, _>(
            key,
            seeds.clone(),
            self.query_config(),
            self.cancel.child_token(),
            |peer| async move {
                let msg = DhtMessage::new(MessageKind::FindNode, cid.to_bytes());
                let resp = self.rpc(peer, msg).await?;
                Ok(QueryStep {
                    closer: resp.closer_peers.iter().map(|p| p.id).collect(),
                    found: Vec::new(),
                })
            },
            |_| false,
        )
        .await?;

        let targets = if outcome.closest.is_empty() {
            seeds
        } else {
            outcome.closest
        };
        let mut announce = DhtMessage::new(MessageKind::AddProvider, cid.to_bytes());
        announce.provider_peers = vec![PeerInfo::new(self.local)];
        let data = Bytes::from(announce.encode()?);
        let protocol_id = ProtocolId::new(DHT_PROTOCOL);
        for peer in targets {
            let send = self
                .network
                .send_message(&peer, &protocol_id, data.clone());
            if let Err(err) = send.await {
                debug!(peer = %peer.short_hex(), %err, "provider announce failed");
            }
        }
        Ok(())
    }

    /// Find up to `limit` providers for `cid`, streaming them as discovered.
    ///
    /// Local provider records are delivered first; the channel closes when
    /// enough providers are found or the query exhausts its shortlist.
    pub async fn find_providers_streaming(&self, cid: Cid, limit: usize) -> mpsc::Receiver<PeerId> {
        let (tx, rx) = mpsc::channel(limit.max(1));

        let mut found: Vec<PeerId> = Vec::new();
        for peer in self.providers.get(&cid) {
            if peer != self.local && !found.contains(&peer) {
                found.push(peer);
            }
        }
        for peer in found.iter().take(limit) {
            let _ = tx.send(*peer).await;
        }
        if found.len() >= limit {
            return rx;
        }

        let key = DhtKey::for_cid(&cid);
        let Ok(seeds) = self.seeds(&key) else {
            return rx;
        };

        let remaining = limit - found.len();
        let local = self.local;
        let dedup = std::sync::Mutex::new(found);
        let counter = std::sync::atomic::AtomicUsize::new(0);
        let query = run_query::<(), _, _, _>(
            key,
            seeds,
            self.query_config(),
            self.cancel.child_token(),
            |peer| {
                let tx = tx.clone();
                let dedup = &dedup;
                let counter = &counter;
                async move {
                    let msg = DhtMessage::new(MessageKind::GetProviders, cid.to_bytes());
                    let resp = self.rpc(peer, msg).await?;
                    let mut fresh = Vec::new();
                    {
                        let mut seen = dedup.lock().expect("lock poisoned");
                        for info in &resp.provider_peers {
                            if info.id != local && !seen.contains(&info.id) {
                                seen.push(info.id);
                                fresh.push(info.id);
                            }
                        }
                    }
                    for provider in fresh {
                        // The channel's capacity covers exactly `limit`
                        // sends; past the cap the query is done anyway.
                        if counter.load(std::sync::atomic::Ordering::SeqCst) >= remaining {
                            break;
                        }
                        if tx.send(provider).await.is_ok() {
                            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                    Ok(QueryStep {
                        closer: resp.closer_peers.iter().map(|p| p.id).collect(),
                        found: Vec::new(),
                    })
                }
            },
            |_| counter.load(std::sync::atomic::Ordering::SeqCst) >= remaining,
        )
        .await;
        if let Err(err) = query {
            debug!(%err, cid = %cid.short_hex(), "provider search ended early");
        }
        rx
    }

    /// Seed the routing table and announce ourselves with a self-lookup.
    pub async fn bootstrap(&self, peers: Vec<PeerId>) -> DhtResult<()> {
        for peer in peers {
            if peer != self.local {
                self.table.update(peer);
            }
        }
        if self.table.is_empty() {
            return Err(DhtError::LookupFailure);
        }
        // The self-lookup walks toward our own key, telling the peers we
        // meet about us and filling our closest buckets.
        let _ = self.lookup_peer(self.local).await;
        Ok(())
    }
}

#[async_trait]
impl ContentRouting for Dht {
    async fn provide(&self, key: Cid) -> NetResult<()> {
        self.provide_block(key)
            .await
            .map_err(|err| NetError::Routing(err.to_string()))
    }

    async fn find_providers(&self, key: Cid, limit: usize) -> mpsc::Receiver<PeerId> {
        self.find_providers_streaming(key, limit).await
    }
}
