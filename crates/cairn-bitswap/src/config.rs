use std::time::Duration;

use crate::strategy::Strategy;

/// Tunables for a bitswap session.
#[derive(Clone, Debug)]
pub struct BitswapConfig {
    /// How often the full wantlist is resent to providers.
    pub rebroadcast_interval: Duration,
    /// How long new wants are batched before a provider search flushes.
    pub provider_search_batch_delay: Duration,
    /// Providers asked for per find.
    pub providers_per_find: usize,
    /// Pending wants that force an immediate flush.
    pub batch_threshold: usize,
    /// Send policy applied per partner.
    pub strategy: Strategy,
}

impl Default for BitswapConfig {
    fn default() -> Self {
        Self {
            rebroadcast_interval: Duration::from_secs(5),
            provider_search_batch_delay: Duration::from_millis(3),
            providers_per_find: 6,
            batch_threshold: 10,
            strategy: Strategy::Standard,
        }
    }
}
