//! Blockstore: the durable mapping from [`Cid`] to block bytes.
//!
//! [`Blockstore`] is the storage seam the rest of the system builds on. The
//! in-memory implementation here is the reference for the contract; durable
//! backends key their entries with the layout in [`keys`].
//!
//! [`Cid`]: cairn_types::Cid

pub mod error;
pub mod keys;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryBlockstore;
pub use traits::Blockstore;
