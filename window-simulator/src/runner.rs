//! Simulation runner for windowed cache configurations
//!
//! Every configuration replays the same trace against its own cache over a
//! fresh in-memory source. Background prefetches are queued on a `TaskQueue`
//! and drained after each request, so a prefetch always lands before the
//! next request is issued and runs are reproducible.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use futures::executor::block_on;
use tracing::{debug, info};
use window_cache::{
    CacheError, EvictionStrategy, FetchByOffsetParameters, MemorySource, TaskQueue,
    WindowCacheConfig, WindowedCache,
};

use crate::generator::{TraceConfig, TraceGenerator};
use crate::models::{CacheSetup, SetupStats, SimulationConfig, SimulationResult};

/// Proximity used by the LRU configurations, in pages
const PROXIMITY_PAGES: usize = 2;

pub struct SimulationRunner {
    config: SimulationConfig,
}

impl SimulationRunner {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    fn cache_config(&self, setup: CacheSetup) -> WindowCacheConfig {
        let proximity = NonZeroUsize::new(self.config.page * PROXIMITY_PAGES);
        match setup {
            CacheSetup::Never => WindowCacheConfig::default(),
            CacheSetup::Lru => WindowCacheConfig {
                eviction: EvictionStrategy::Lru,
                proximity,
                ..WindowCacheConfig::default()
            },
            CacheSetup::LruPrefetch => WindowCacheConfig {
                eviction: EvictionStrategy::Lru,
                prefetch: true,
                proximity,
                ..WindowCacheConfig::default()
            },
        }
    }

    /// Run every configured setup over the same trace
    pub fn run(&self) -> Result<SimulationResult, CacheError<std::convert::Infallible>> {
        let start_time = Instant::now();
        let trace = TraceGenerator::new(TraceConfig {
            rows: self.config.rows,
            page: self.config.page,
            requests: self.config.requests,
            pattern: self.config.pattern,
            seed: self.config.seed,
        })
        .generate();
        info!(
            requests = trace.len(),
            pattern = %self.config.pattern,
            "trace generated"
        );

        let mut stats = Vec::with_capacity(self.config.setups.len());
        for &setup in &self.config.setups {
            let result = self.run_setup(setup, &trace)?;
            info!(
                setup = setup.as_str(),
                hit_rate = result.hit_rate(),
                upstream_fetches = result.upstream_fetches,
                "setup finished"
            );
            stats.push((setup, result));
        }

        Ok(SimulationResult {
            pattern: self.config.pattern,
            stats,
            duration: start_time.elapsed(),
        })
    }

    fn run_setup(
        &self,
        setup: CacheSetup,
        trace: &[usize],
    ) -> Result<SetupStats, CacheError<std::convert::Infallible>> {
        let rows = u32::try_from(self.config.rows).unwrap_or(u32::MAX);
        let source = MemorySource::from_rows((0..rows).collect());
        let queue = Arc::new(TaskQueue::new());
        let cache = WindowedCache::init(
            source,
            self.cache_config(setup),
            Some(queue.clone()),
        );

        let start_time = Instant::now();
        for &offset in trace {
            let page = block_on(
                cache.fetch_by_offset(FetchByOffsetParameters::new(offset, self.config.page)),
            )?;
            debug!(
                setup = setup.as_str(),
                offset,
                rows = page.results.len(),
                "request served"
            );
            queue.run_until_idle();
        }
        let elapsed = start_time.elapsed();
        cache.destroy();

        let metrics = cache.window_metrics();
        Ok(SetupStats {
            requests: metrics.core.requests,
            hits: metrics.core.cache_hits,
            upstream_fetches: metrics.upstream_fetches,
            rows_evicted: metrics.core.evictions,
            segments_purged: metrics.segments_purged,
            prefetches: metrics.prefetches,
            coalesced_waits: metrics.coalesced_waits,
            elapsed,
        })
    }
}
