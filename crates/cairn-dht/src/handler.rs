//! Inbound RPC handling.
//!
//! Every request also counts as a liveness signal for the sender, so the
//! routing table is updated before dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use cairn_net::{MessageHandler, NetError, NetResult};
use cairn_types::{Cid, PeerId};

use crate::error::{DhtError, DhtResult};
use crate::key::DhtKey;
use crate::message::{Connectedness, DhtMessage, MessageKind, PeerInfo};
use crate::providers::ProviderStore;
use crate::record::{RecordStore, RecordValidator};
use crate::rtable::RoutingTable;

/// Serves the six RPC kinds against the local table, record store and
/// provider store.
pub struct DhtHandler {
    table: Arc<RoutingTable>,
    records: Arc<RecordStore>,
    providers: Arc<ProviderStore>,
    validator: Arc<RecordValidator>,
    k: usize,
}

impl DhtHandler {
    pub fn new(
        table: Arc<RoutingTable>,
        records: Arc<RecordStore>,
        providers: Arc<ProviderStore>,
        validator: Arc<RecordValidator>,
        k: usize,
    ) -> Self {
        Self {
            table,
            records,
            providers,
            validator,
            k,
        }
    }

    fn closer_peers(&self, key: &[u8], exclude: &PeerId) -> Vec<PeerInfo> {
        self.table
            .nearest(&DhtKey::from_bytes(key), self.k)
            .into_iter()
            .filter(|p| p != exclude)
            .map(|p| PeerInfo {
                id: p,
                addrs: Vec::new(),
                connectedness: Connectedness::CanConnect,
            })
            .collect()
    }

    /// Process one inbound message; `Some` responses go back to the sender.
    pub fn handle(&self, from: PeerId, msg: DhtMessage) -> DhtResult<Option<DhtMessage>> {
        self.table.update(from);
        trace!(kind = ?msg.kind, from = %from.short_hex(), "dht rpc");

        match msg.kind {
            MessageKind::Ping => Ok(Some(DhtMessage::new(MessageKind::Ping, msg.key))),

            MessageKind::FindNode => {
                let mut resp = DhtMessage::new(MessageKind::FindNode, msg.key.clone());
                resp.closer_peers = self.closer_peers(&msg.key, &from);
                Ok(Some(resp))
            }

            MessageKind::GetValue => {
                let mut resp = DhtMessage::new(MessageKind::GetValue, msg.key.clone());
                resp.record = self.records.get(&msg.key);
                resp.closer_peers = self.closer_peers(&msg.key, &from);
                Ok(Some(resp))
            }

            MessageKind::PutValue => {
                let record = msg
                    .record
                    .ok_or(DhtError::InvalidRecord("put without record"))?;
                if record.key != msg.key {
                    return Err(DhtError::InvalidRecord("record key disagrees with message"));
                }
                self.validator.validate(&record)?;
                debug!(key = ?String::from_utf8_lossy(&record.key), "record stored");
                self.records.put(record.clone());
                let resp =
                    DhtMessage::new(MessageKind::PutValue, msg.key).with_record(record);
                Ok(Some(resp))
            }

            MessageKind::AddProvider => {
                // Only accept a claim the sender makes about itself.
                if !msg.provider_peers.iter().any(|p| p.id == from) {
                    return Err(DhtError::InvalidRecord(
                        "provider claim does not include sender",
                    ));
                }
                let cid = Cid::from_bytes(&msg.key)
                    .map_err(|e| DhtError::Codec(e.to_string()))?;
                self.providers.add(cid, from);
                Ok(None)
            }

            MessageKind::GetProviders => {
                let cid = Cid::from_bytes(&msg.key)
                    .map_err(|e| DhtError::Codec(e.to_string()))?;
                let mut resp = DhtMessage::new(MessageKind::GetProviders, msg.key.clone());
                resp.provider_peers = self
                    .providers
                    .get(&cid)
                    .into_iter()
                    .map(PeerInfo::new)
                    .collect();
                resp.closer_peers = self.closer_peers(&msg.key, &from);
                Ok(Some(resp))
            }
        }
    }
}

#[async_trait]
impl MessageHandler for DhtHandler {
    async fn handle_message(&self, from: PeerId, data: Bytes) -> NetResult<Option<Bytes>> {
        let msg = DhtMessage::decode(&data).map_err(|e| {
            debug!(%e, "undecodable dht message");
            NetError::BadHeader("undecodable dht message")
        })?;
        match self.handle(from, msg) {
            Ok(Some(resp)) => {
                let encoded = resp
                    .encode()
                    .map_err(|_| NetError::BadHeader("unencodable response"))?;
                Ok(Some(Bytes::from(encoded)))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                debug!(%err, from = %from.short_hex(), "dht rpc rejected");
                Err(NetError::BadHeader("rejected"))
            }
        }
    }
}
