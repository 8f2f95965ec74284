use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use cairn_types::PeerId;

use crate::error::NetResult;
use crate::mux::ProtocolId;

/// Connection lifecycle events, consumed by the routing table and the
/// decision engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnEvent {
    Connected(PeerId),
    Disconnected(PeerId),
}

impl ConnEvent {
    pub fn peer(&self) -> PeerId {
        match self {
            Self::Connected(p) | Self::Disconnected(p) => *p,
        }
    }
}

/// Inbound message handler for one protocol.
///
/// The returned bytes, if any, are the response for request/response
/// protocols; fire-and-forget callers drop them.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, from: PeerId, data: Bytes) -> NetResult<Option<Bytes>>;
}

/// The transport contract exposed to the exchange and DHT layers.
///
/// Sends to a given peer are serialized per peer, so a later message cannot
/// overtake an earlier one on the same protocol.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    /// This node's identity.
    fn local_peer(&self) -> PeerId;

    /// Establish a connection if none exists.
    async fn dial_peer(&self, peer: &PeerId) -> NetResult<()>;

    /// Fire-and-forget send. Returns once the message is handed to the
    /// transport.
    async fn send_message(
        &self,
        peer: &PeerId,
        protocol: &ProtocolId,
        data: Bytes,
    ) -> NetResult<()>;

    /// Send a request and await a single response.
    async fn send_request(
        &self,
        peer: &PeerId,
        protocol: &ProtocolId,
        data: Bytes,
    ) -> NetResult<Bytes>;

    /// Install the demultiplexer for one protocol. Replaces any previous
    /// handler for the same protocol.
    fn set_receiver(&self, protocol: ProtocolId, handler: Arc<dyn MessageHandler>);

    /// Subscribe to connection lifecycle events.
    fn subscribe_events(&self) -> broadcast::Receiver<ConnEvent>;

    /// Peers currently connected.
    fn connected_peers(&self) -> Vec<PeerId>;
}
