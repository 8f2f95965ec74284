//! Merkle DAG layer: typed nodes over the block service.
//!
//! [`DagNode`] is the decoded structural view of a block, polymorphic over
//! codec. [`DagService`] resolves CIDs to nodes through the block service,
//! keeps a link cache so link lists can be read without full block fetches,
//! and offers graph enumeration ([`walk`]) and batched child fetching
//! ([`fetcher`]) on top.

pub mod error;
pub mod fetcher;
pub mod node;
pub mod service;
pub mod unixfs;
pub mod walk;

pub use error::{DagError, DagResult};
pub use fetcher::{Fetcher, FetcherConfig, FetcherStats};
pub use node::{DagNode, PbNode};
pub use service::{DagService, LinkCache, MemoryLinkCache};
pub use unixfs::{UnixFsData, UnixFsType};
pub use walk::{enumerate_children, walk_parallel, WalkConfig};
