use async_trait::async_trait;
use tokio::sync::mpsc;

use cairn_types::{Cid, PeerId};

use crate::error::NetResult;

/// Content routing: who can supply a given CID.
///
/// Implemented by the DHT and consumed by the exchange layer; the seam lives
/// here so the two crates need not know each other.
#[async_trait]
pub trait ContentRouting: Send + Sync {
    /// Announce that this node can supply `key`.
    async fn provide(&self, key: Cid) -> NetResult<()>;

    /// Find up to `limit` providers for `key`.
    ///
    /// Providers are delivered on the channel as they are found, local
    /// records first; the channel closes when the search completes.
    async fn find_providers(&self, key: Cid, limit: usize) -> mpsc::Receiver<PeerId>;
}
