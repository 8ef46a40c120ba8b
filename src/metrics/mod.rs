//! Cache Metrics System
//!
//! Metrics for the windowed cache, reported through a BTreeMap so every dump
//! lists its keys in the same order. The simulator and the benches compare
//! configurations by diffing these maps, so ordering must be deterministic.
//!
//! Counters are measured in rows rather than bytes: a request for a window
//! of `size` rows counts `size` rows requested, and a hit serves all of them
//! from the store.

use std::collections::BTreeMap;

pub mod window;

pub use window::WindowCacheMetrics;

/// Common metrics tracked by every cache configuration
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CoreCacheMetrics {
    /// Total number of window requests
    pub requests: u64,

    /// Requests answered entirely from the store
    pub cache_hits: u64,

    /// Total rows requested (hits + misses)
    pub rows_requested: u64,

    /// Rows served directly from the store
    pub rows_served_from_cache: u64,

    /// Rows written into the store by foreground fetches, prefetches and
    /// `fetch_first` snapshots
    pub rows_written_to_cache: u64,

    /// Rows dropped by the eviction pass
    pub evictions: u64,
}

impl CoreCacheMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request served from the store.
    ///
    /// # Arguments
    /// * `rows` - Number of rows returned to the caller
    pub fn record_hit(&mut self, rows: u64) {
        self.requests += 1;
        self.cache_hits += 1;
        self.rows_requested += rows;
        self.rows_served_from_cache += rows;
    }

    /// Records a request that had to go upstream.
    ///
    /// Misses are derived as `requests - cache_hits`.
    pub fn record_miss(&mut self, rows: u64) {
        self.requests += 1;
        self.rows_requested += rows;
    }

    /// Records rows written into the store.
    pub fn record_insertion(&mut self, rows: u64) {
        self.rows_written_to_cache += rows;
    }

    /// Records rows dropped by eviction.
    pub fn record_eviction(&mut self, rows: u64) {
        self.evictions += rows;
    }

    /// Fraction of requests served from the store, 0.0 with no requests.
    pub fn hit_rate(&self) -> f64 {
        if self.requests > 0 {
            self.cache_hits as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that went upstream, 0.0 with no requests.
    pub fn miss_rate(&self) -> f64 {
        if self.requests > 0 {
            (self.requests - self.cache_hits) as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Fraction of requested rows served from the store.
    pub fn row_hit_rate(&self) -> f64 {
        if self.rows_requested > 0 {
            self.rows_served_from_cache as f64 / self.rows_requested as f64
        } else {
            0.0
        }
    }

    /// Convert core metrics to BTreeMap for reporting
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("cache_hits".to_string(), self.cache_hits as f64);
        metrics.insert("evictions".to_string(), self.evictions as f64);
        metrics.insert("requests".to_string(), self.requests as f64);
        metrics.insert(
            "cache_misses".to_string(),
            (self.requests - self.cache_hits) as f64,
        );

        // Rates (0.0 to 1.0)
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("miss_rate".to_string(), self.miss_rate());
        metrics.insert("row_hit_rate".to_string(), self.row_hit_rate());

        // Rows
        metrics.insert(
            "rows_requested".to_string(),
            self.rows_requested as f64,
        );
        metrics.insert(
            "rows_served_from_cache".to_string(),
            self.rows_served_from_cache as f64,
        );
        metrics.insert(
            "rows_written_to_cache".to_string(),
            self.rows_written_to_cache as f64,
        );

        if self.requests > 0 {
            metrics.insert(
                "avg_window_size".to_string(),
                self.rows_requested as f64 / self.requests as f64,
            );
        }

        metrics
    }
}

/// Uniform metrics interface
///
/// Lets the simulator collect and compare metrics across cache
/// configurations. Keys come back sorted.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Name identifying the configuration (e.g. "WINDOW-LRU")
    fn algorithm_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_with_no_requests() {
        let metrics = CoreCacheMetrics::new();
        assert_eq!(metrics.hit_rate(), 0.0);
        assert_eq!(metrics.miss_rate(), 0.0);
        assert_eq!(metrics.row_hit_rate(), 0.0);
        assert!(!metrics.to_btreemap().contains_key("avg_window_size"));
    }

    #[test]
    fn test_hits_and_misses() {
        let mut metrics = CoreCacheMetrics::new();
        metrics.record_miss(10);
        metrics.record_insertion(10);
        metrics.record_hit(10);
        metrics.record_hit(10);
        metrics.record_miss(20);

        assert_eq!(metrics.requests, 4);
        assert_eq!(metrics.cache_hits, 2);
        assert_eq!(metrics.hit_rate(), 0.5);
        assert_eq!(metrics.row_hit_rate(), 0.4);

        let map = metrics.to_btreemap();
        assert_eq!(map["cache_misses"], 2.0);
        assert_eq!(map["avg_window_size"], 12.5);
        let keys: Vec<&String> = map.keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
