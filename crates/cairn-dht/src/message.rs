use serde::{Deserialize, Serialize};

use cairn_types::PeerId;

use crate::error::{DhtError, DhtResult};
use crate::record::SignedRecord;

/// Upper bound on an encoded DHT message.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// The six RPC kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    PutValue,
    GetValue,
    AddProvider,
    GetProviders,
    FindNode,
    Ping,
}

/// How reachable a closer-peer entry is from the responder's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectedness {
    NotConnected,
    Connected,
    CanConnect,
}

/// A peer reference carried in responses, with enough addressing for the
/// receiver to dial without prior knowledge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addrs: Vec<String>,
    pub connectedness: Connectedness,
}

impl PeerInfo {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            addrs: Vec::new(),
            connectedness: Connectedness::NotConnected,
        }
    }

    pub fn connected(id: PeerId) -> Self {
        Self {
            id,
            addrs: Vec::new(),
            connectedness: Connectedness::Connected,
        }
    }
}

/// One DHT RPC message, request or response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DhtMessage {
    pub kind: MessageKind,
    /// Lookup key; often a CID's canonical bytes.
    pub key: Vec<u8>,
    /// Signed record for PUT_VALUE / GET_VALUE.
    pub record: Option<SignedRecord>,
    /// Peers closer to `key`, in responses.
    pub closer_peers: Vec<PeerInfo>,
    /// Provider claims for ADD_PROVIDER / GET_PROVIDERS.
    pub provider_peers: Vec<PeerInfo>,
    /// Cluster level, stored as value + 1 so 0 means unset.
    cluster_level_raw: i32,
}

impl DhtMessage {
    pub fn new(kind: MessageKind, key: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            key: key.into(),
            record: None,
            closer_peers: Vec::new(),
            provider_peers: Vec::new(),
            cluster_level_raw: 0,
        }
    }

    /// The cluster level, adjusting for the +1 wire convention. An unset or
    /// corrupt raw value reads as level 0.
    pub fn cluster_level(&self) -> i32 {
        let level = self.cluster_level_raw - 1;
        level.max(0)
    }

    /// Set the cluster level, storing value + 1 on the wire.
    pub fn set_cluster_level(&mut self, level: i32) {
        self.cluster_level_raw = level + 1;
    }

    pub fn with_record(mut self, record: SignedRecord) -> Self {
        self.record = Some(record);
        self
    }

    fn tag(&self) -> u8 {
        match self.kind {
            MessageKind::PutValue => 1,
            MessageKind::GetValue => 2,
            MessageKind::AddProvider => 3,
            MessageKind::GetProviders => 4,
            MessageKind::FindNode => 5,
            MessageKind::Ping => 6,
        }
    }

    /// Encode with framing: `[4 bytes BE length][1 byte tag][payload]`.
    pub fn encode(&self) -> DhtResult<Vec<u8>> {
        let payload = bincode::serialize(self).map_err(|e| DhtError::Codec(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(DhtError::Codec(format!(
                "message of {} bytes exceeds limit",
                payload.len()
            )));
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(4 + 1 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(self.tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a framed message.
    pub fn decode(data: &[u8]) -> DhtResult<Self> {
        if data.len() < 5 {
            return Err(DhtError::Codec("frame too short".into()));
        }
        let len = u32::from_be_bytes(data[0..4].try_into().expect("4 bytes")) as usize;
        if len < 1 || len - 1 > MAX_MESSAGE_SIZE {
            return Err(DhtError::Codec("bad frame length".into()));
        }
        if data.len() != 4 + len {
            return Err(DhtError::Codec(format!(
                "frame length mismatch: header says {}, have {}",
                4 + len,
                data.len()
            )));
        }
        let tag = data[4];
        let msg: DhtMessage = bincode::deserialize(&data[5..])
            .map_err(|e| DhtError::Codec(e.to_string()))?;
        if msg.tag() != tag {
            return Err(DhtError::Codec("tag does not match payload kind".into()));
        }
        Ok(msg)
    }
}
