//! In-memory network for multi-node tests.
//!
//! A [`TestNetwork`] is a registry of virtual peers. Adapters created from it
//! implement [`NetworkAdapter`] by invoking the remote peer's registered
//! handler directly, so delivery is inline and sends to a given peer are
//! naturally serialized. Connection events can be driven by tests or happen
//! implicitly on dial.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::debug;

use cairn_types::PeerId;

use crate::adapter::{ConnEvent, MessageHandler, NetworkAdapter};
use crate::error::{NetError, NetResult};
use crate::mux::ProtocolId;

const EVENT_CAPACITY: usize = 64;

struct NodeState {
    handlers: RwLock<HashMap<ProtocolId, Arc<dyn MessageHandler>>>,
    events: broadcast::Sender<ConnEvent>,
    connected: Mutex<HashSet<PeerId>>,
}

impl NodeState {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            handlers: RwLock::new(HashMap::new()),
            events,
            connected: Mutex::new(HashSet::new()),
        }
    }
}

type Registry = Mutex<HashMap<PeerId, Arc<NodeState>>>;

/// Registry of virtual peers sharing one in-memory fabric.
#[derive(Clone)]
pub struct TestNetwork {
    registry: Arc<Registry>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create (or fetch) the adapter for `peer`.
    pub fn adapter(&self, peer: PeerId) -> Arc<TestAdapter> {
        let state = {
            let mut reg = self.registry.lock().expect("lock poisoned");
            Arc::clone(reg.entry(peer).or_insert_with(|| Arc::new(NodeState::new())))
        };
        Arc::new(TestAdapter {
            local: peer,
            state,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Mark two peers connected and emit events on both sides.
    pub fn connect(&self, a: PeerId, b: PeerId) {
        let (sa, sb) = {
            let reg = self.registry.lock().expect("lock poisoned");
            (reg.get(&a).cloned(), reg.get(&b).cloned())
        };
        if let (Some(sa), Some(sb)) = (sa, sb) {
            sa.connected.lock().expect("lock poisoned").insert(b);
            sb.connected.lock().expect("lock poisoned").insert(a);
            let _ = sa.events.send(ConnEvent::Connected(b));
            let _ = sb.events.send(ConnEvent::Connected(a));
        }
    }

    /// Sever a connection and emit events on both sides.
    pub fn disconnect(&self, a: PeerId, b: PeerId) {
        let (sa, sb) = {
            let reg = self.registry.lock().expect("lock poisoned");
            (reg.get(&a).cloned(), reg.get(&b).cloned())
        };
        if let (Some(sa), Some(sb)) = (sa, sb) {
            sa.connected.lock().expect("lock poisoned").remove(&b);
            sb.connected.lock().expect("lock poisoned").remove(&a);
            let _ = sa.events.send(ConnEvent::Disconnected(b));
            let _ = sb.events.send(ConnEvent::Disconnected(a));
        }
    }

    /// All registered peers.
    pub fn peers(&self) -> Vec<PeerId> {
        self.registry
            .lock()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect()
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One virtual peer's view of a [`TestNetwork`].
pub struct TestAdapter {
    local: PeerId,
    state: Arc<NodeState>,
    registry: Arc<Registry>,
}

impl TestAdapter {
    fn remote_state(&self, peer: &PeerId) -> NetResult<Arc<NodeState>> {
        self.registry
            .lock()
            .expect("lock poisoned")
            .get(peer)
            .cloned()
            .ok_or(NetError::PeerUnreachable(*peer))
    }

    fn remote_handler(
        &self,
        peer: &PeerId,
        protocol: &ProtocolId,
    ) -> NetResult<Arc<dyn MessageHandler>> {
        let remote = self.remote_state(peer)?;
        let handlers = remote.handlers.read().expect("lock poisoned");
        handlers
            .get(protocol)
            .cloned()
            .ok_or_else(|| NetError::UnknownProtocol(protocol.to_string()))
    }
}

#[async_trait]
impl NetworkAdapter for TestAdapter {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    async fn dial_peer(&self, peer: &PeerId) -> NetResult<()> {
        let remote = self.remote_state(peer)?;
        let newly = self
            .state
            .connected
            .lock()
            .expect("lock poisoned")
            .insert(*peer);
        if newly {
            remote
                .connected
                .lock()
                .expect("lock poisoned")
                .insert(self.local);
            let _ = self.state.events.send(ConnEvent::Connected(*peer));
            let _ = remote.events.send(ConnEvent::Connected(self.local));
            debug!(local = %self.local.short_hex(), peer = %peer.short_hex(), "dialed");
        }
        Ok(())
    }

    async fn send_message(
        &self,
        peer: &PeerId,
        protocol: &ProtocolId,
        data: Bytes,
    ) -> NetResult<()> {
        self.dial_peer(peer).await?;
        let handler = self.remote_handler(peer, protocol)?;
        // Inline delivery; the reply (if any) is dropped for one-way sends.
        let _ = handler.handle_message(self.local, data).await?;
        Ok(())
    }

    async fn send_request(
        &self,
        peer: &PeerId,
        protocol: &ProtocolId,
        data: Bytes,
    ) -> NetResult<Bytes> {
        self.dial_peer(peer).await?;
        let handler = self.remote_handler(peer, protocol)?;
        handler
            .handle_message(self.local, data)
            .await?
            .ok_or(NetError::NoResponse(*peer))
    }

    fn set_receiver(&self, protocol: ProtocolId, handler: Arc<dyn MessageHandler>) {
        self.state
            .handlers
            .write()
            .expect("lock poisoned")
            .insert(protocol, handler);
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ConnEvent> {
        self.state.events.subscribe()
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.state
            .connected
            .lock()
            .expect("lock poisoned")
            .iter()
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 32])
    }

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle_message(&self, _from: PeerId, data: Bytes) -> NetResult<Option<Bytes>> {
            Ok(Some(data))
        }
    }

    struct Sink {
        seen: Mutex<Vec<(PeerId, Bytes)>>,
    }

    #[async_trait]
    impl MessageHandler for Sink {
        async fn handle_message(&self, from: PeerId, data: Bytes) -> NetResult<Option<Bytes>> {
            self.seen.lock().expect("lock poisoned").push((from, data));
            Ok(None)
        }
    }

    #[tokio::test]
    async fn request_response_roundtrip() {
        let net = TestNetwork::new();
        let a = net.adapter(peer(1));
        let b = net.adapter(peer(2));
        b.set_receiver("echo".into(), Arc::new(Echo));

        let reply = a
            .send_request(&peer(2), &"echo".into(), Bytes::from_static(b"ping"))
            .await
            .unwrap();
        assert_eq!(reply, Bytes::from_static(b"ping"));
    }

    #[tokio::test]
    async fn one_way_send_reaches_handler() {
        let net = TestNetwork::new();
        let a = net.adapter(peer(1));
        let b = net.adapter(peer(2));
        let sink = Arc::new(Sink {
            seen: Mutex::new(Vec::new()),
        });
        b.set_receiver("msg".into(), sink.clone());

        a.send_message(&peer(2), &"msg".into(), Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let seen = sink.seen.lock().expect("lock poisoned");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, peer(1));
    }

    #[tokio::test]
    async fn unknown_protocol_is_closed() {
        let net = TestNetwork::new();
        let a = net.adapter(peer(1));
        let _b = net.adapter(peer(2));

        let err = a
            .send_message(&peer(2), &"nope".into(), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::UnknownProtocol(_)));
    }

    #[tokio::test]
    async fn unreachable_peer_errors() {
        let net = TestNetwork::new();
        let a = net.adapter(peer(1));
        let err = a.dial_peer(&peer(9)).await.unwrap_err();
        assert!(matches!(err, NetError::PeerUnreachable(_)));
    }

    #[tokio::test]
    async fn dial_emits_connected_events_both_sides() {
        let net = TestNetwork::new();
        let a = net.adapter(peer(1));
        let b = net.adapter(peer(2));
        let mut ev_a = a.subscribe_events();
        let mut ev_b = b.subscribe_events();

        a.dial_peer(&peer(2)).await.unwrap();
        assert_eq!(ev_a.recv().await.unwrap(), ConnEvent::Connected(peer(2)));
        assert_eq!(ev_b.recv().await.unwrap(), ConnEvent::Connected(peer(1)));
        assert_eq!(a.connected_peers(), vec![peer(2)]);
    }

    #[tokio::test]
    async fn disconnect_emits_events() {
        let net = TestNetwork::new();
        let a = net.adapter(peer(1));
        let b = net.adapter(peer(2));
        net.connect(peer(1), peer(2));
        let mut ev_b = b.subscribe_events();

        net.disconnect(peer(1), peer(2));
        assert_eq!(ev_b.recv().await.unwrap(), ConnEvent::Disconnected(peer(1)));
        assert!(a.connected_peers().is_empty());
    }

    #[tokio::test]
    async fn repeated_dial_is_idempotent() {
        let net = TestNetwork::new();
        let a = net.adapter(peer(1));
        let _b = net.adapter(peer(2));
        a.dial_peer(&peer(2)).await.unwrap();
        a.dial_peer(&peer(2)).await.unwrap();
        assert_eq!(a.connected_peers().len(), 1);
    }
}
