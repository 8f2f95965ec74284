//! The block-exchange protocol.
//!
//! A [`Bitswap`] session keeps a local [`Wantlist`], per-partner [`ledger`]
//! accounting, and a [`Engine`] that decides which block to send to which
//! peer next. Arriving blocks flow through [`Notifications`] back to blocked
//! `get_block` callers.
//!
//! [`ledger`]: crate::ledger

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod message;
pub mod notifications;
pub mod session;
pub mod strategy;
pub mod wantlist;

pub use config::BitswapConfig;
pub use engine::{Engine, Envelope};
pub use error::{BitswapError, BitswapResult};
pub use ledger::{LedgerMap, LedgerStats};
pub use message::{BitswapMessage, BlockPayload, WantEntry};
pub use notifications::Notifications;
pub use session::Bitswap;
pub use strategy::Strategy;
pub use wantlist::Wantlist;

/// Protocol identifier the exchange registers with the network adapter.
pub const BITSWAP_PROTOCOL: &str = "/cairn/bitswap/1.0.0";
