// Data models for window cache simulation

use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Shape of the generated scroll trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Pattern {
    /// Page by page from the top to the bottom, wrapping around
    Down,
    /// Page by page from the bottom to the top, wrapping around
    Up,
    /// Mostly scrolling down, with occasional jumps to a random offset
    Jumpy,
    /// Scrolls down a few pages, back up a few pages, drifting downwards
    Oscillate,
}

impl Pattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::Down => "down",
            Pattern::Up => "up",
            Pattern::Jumpy => "jumpy",
            Pattern::Oscillate => "oscillate",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache configurations compared by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheSetup {
    /// Keep every fetched row
    Never,
    /// Purge stale segments far from the window
    Lru,
    /// LRU eviction plus directional prefetch
    LruPrefetch,
}

impl CacheSetup {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSetup::Never => "never",
            CacheSetup::Lru => "lru",
            CacheSetup::LruPrefetch => "lru+prefetch",
        }
    }

    /// Get all configurations, in report order
    pub fn all() -> Vec<CacheSetup> {
        vec![CacheSetup::Never, CacheSetup::Lru, CacheSetup::LruPrefetch]
    }
}

/// Configuration for a simulation run
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Rows held by the in-memory source
    pub rows: usize,
    /// Rows per request
    pub page: usize,
    /// Number of requests in the trace
    pub requests: usize,
    /// Trace shape
    pub pattern: Pattern,
    /// Seed for the trace generator
    pub seed: u64,
    /// Configurations to run
    pub setups: Vec<CacheSetup>,
}

/// Counters collected for one configuration
#[derive(Debug, Clone, Default)]
pub struct SetupStats {
    pub requests: u64,
    pub hits: u64,
    pub upstream_fetches: u64,
    pub rows_evicted: u64,
    pub segments_purged: u64,
    pub prefetches: u64,
    pub coalesced_waits: u64,
    pub elapsed: Duration,
}

impl SetupStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            (self.hits as f64 / self.requests as f64) * 100.0
        }
    }

    /// Average time per request in microseconds
    pub fn avg_request_us(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.elapsed.as_secs_f64() * 1_000_000.0 / self.requests as f64
        }
    }
}

/// Results of a simulation run, in configuration order
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub pattern: Pattern,
    pub stats: Vec<(CacheSetup, SetupStats)>,
    pub duration: Duration,
}

/// One CSV line per configuration
#[derive(Debug, Serialize)]
pub struct CsvResultRow {
    pub setup: String,
    pub pattern: String,
    pub requests: u64,
    pub hits: u64,
    pub hit_rate: f64,
    pub upstream_fetches: u64,
    pub rows_evicted: u64,
    pub segments_purged: u64,
    pub prefetches: u64,
    pub coalesced_waits: u64,
    pub elapsed_ms: f64,
}
