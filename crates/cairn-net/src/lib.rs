//! Network seam for cairn.
//!
//! Defines the contract the exchange and DHT layers program against (message
//! send/receive, protocol multiplexing, connection events) together with the
//! in-memory [`TestNetwork`] used by every multi-node test. Real transports
//! implement [`NetworkAdapter`]; nothing above this crate touches sockets.

pub mod adapter;
pub mod error;
pub mod mux;
pub mod routing;
pub mod testnet;

pub use adapter::{ConnEvent, MessageHandler, NetworkAdapter};
pub use error::{NetError, NetResult};
pub use mux::ProtocolId;
pub use routing::ContentRouting;
pub use testnet::TestNetwork;
