//! Windowed Cache Metrics
//!
//! Extends [`CoreCacheMetrics`] with counters for the coordinator's upstream
//! traffic and its reactions to source events.

use super::{CacheMetrics, CoreCacheMetrics};
use crate::config::EvictionStrategy;
use std::collections::BTreeMap;

/// Metrics of one [`WindowedCache`](crate::WindowedCache).
#[derive(Debug, Clone, PartialEq)]
pub struct WindowCacheMetrics {
    /// Core metrics common to all configurations
    pub core: CoreCacheMetrics,

    /// Eviction strategy the cache runs with
    pub strategy: EvictionStrategy,

    /// Calls issued to the source's `fetch_by_offset`, prefetches included
    pub upstream_fetches: u64,

    /// Upstream fetches that returned an error
    pub upstream_failures: u64,

    /// Requests that waited on another caller's in-flight fetch
    pub coalesced_waits: u64,

    /// Background prefetches started
    pub prefetches: u64,

    /// Fetch results dropped because a mutate or refresh arrived meanwhile
    pub discarded_fetches: u64,

    /// Segments moved to `Purged` by the eviction pass
    pub segments_purged: u64,

    /// Mutate events applied
    pub mutations_applied: u64,

    /// Refresh events applied, plus resets caused by unresolvable mutations
    pub refreshes: u64,
}

impl WindowCacheMetrics {
    /// Creates zeroed metrics for a cache using `strategy`.
    pub fn new(strategy: EvictionStrategy) -> Self {
        Self {
            core: CoreCacheMetrics::new(),
            strategy,
            upstream_fetches: 0,
            upstream_failures: 0,
            coalesced_waits: 0,
            prefetches: 0,
            discarded_fetches: 0,
            segments_purged: 0,
            mutations_applied: 0,
            refreshes: 0,
        }
    }

    /// Records a purged segment and the rows it dropped.
    pub fn record_purge(&mut self, rows: u64) {
        self.segments_purged += 1;
        self.core.record_eviction(rows);
    }

    /// Converts all metrics to a BTreeMap for reporting
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.core.to_btreemap();

        metrics.insert(
            "coalesced_waits".to_string(),
            self.coalesced_waits as f64,
        );
        metrics.insert(
            "discarded_fetches".to_string(),
            self.discarded_fetches as f64,
        );
        metrics.insert(
            "mutations_applied".to_string(),
            self.mutations_applied as f64,
        );
        metrics.insert("prefetches".to_string(), self.prefetches as f64);
        metrics.insert("refreshes".to_string(), self.refreshes as f64);
        metrics.insert(
            "segments_purged".to_string(),
            self.segments_purged as f64,
        );
        metrics.insert(
            "upstream_failures".to_string(),
            self.upstream_failures as f64,
        );
        metrics.insert(
            "upstream_fetches".to_string(),
            self.upstream_fetches as f64,
        );

        metrics
    }
}

impl CacheMetrics for WindowCacheMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        match self.strategy {
            EvictionStrategy::Never => "WINDOW-NEVER",
            EvictionStrategy::Lru => "WINDOW-LRU",
        }
    }
}
