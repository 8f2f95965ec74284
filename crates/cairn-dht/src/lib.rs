//! Kademlia-style DHT: XOR-metric routing table, parallel iterative queries,
//! provider records and signed value records.
//!
//! The [`Dht`] facade ties the pieces together and implements the
//! `ContentRouting` seam consumed by the exchange layer. Peers found through
//! connection events flow into the [`RoutingTable`]; lookups run through the
//! [`query`] driver; records pass the [`RecordValidator`] before they are
//! stored or served.

pub mod bucket;
pub mod config;
pub mod dht;
pub mod error;
pub mod handler;
pub mod key;
pub mod message;
pub mod providers;
pub mod query;
pub mod record;
pub mod rtable;

pub use config::DhtConfig;
pub use dht::Dht;
pub use error::{DhtError, DhtResult};
pub use key::DhtKey;
pub use message::{Connectedness, DhtMessage, MessageKind, PeerInfo};
pub use providers::ProviderStore;
pub use record::{RecordStore, RecordValidator, SignedRecord};
pub use rtable::RoutingTable;

/// Protocol identifier the DHT registers with the network adapter.
pub const DHT_PROTOCOL: &str = "/cairn/dht/1.0.0";
