use std::time::Duration;

/// Tunables for the DHT.
#[derive(Clone, Debug)]
pub struct DhtConfig {
    /// Bucket capacity and lookup result-set size.
    pub k: usize,
    /// Lookup concurrency.
    pub alpha: usize,
    /// Deadline for a single RPC.
    pub rpc_timeout: Duration,
    /// A bucket head older than this may be evicted for a newcomer.
    pub bucket_staleness: Duration,
    /// Provider record lifetime.
    pub provider_ttl: Duration,
    /// How often the provider-store GC sweeps.
    pub provider_gc_interval: Duration,
    /// Maximum number of CIDs the provider store tracks.
    pub provider_capacity: usize,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: 20,
            alpha: 3,
            rpc_timeout: Duration::from_secs(30),
            bucket_staleness: Duration::from_secs(3600),
            provider_ttl: Duration::from_secs(24 * 3600),
            provider_gc_interval: Duration::from_secs(3600),
            provider_capacity: 4096,
        }
    }
}
