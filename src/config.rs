//! Cache Configuration Module
//!
//! This module provides the configuration structure for [`WindowedCache`](crate::WindowedCache).
//!
//! # Design Philosophy
//!
//! The configuration struct has all public fields for simple instantiation:
//!
//! - **Simple**: Just create the struct with all fields set, or start from `Default`
//! - **Type safety**: Strategies are enums rather than magic numbers
//! - **No boilerplate**: No builder methods needed
//!
//! # Sizing Guidelines
//!
//! ## Understanding `proximity` and `miss_threshold`
//!
//! - **`proximity`**: How many rows on either side of the requested window are
//!   protected from eviction. When left as `None` the size of the first request
//!   is used, which for a scrolling list is roughly one viewport.
//! - **`miss_threshold`**: How many consecutive requests must skip a segment
//!   before it becomes an eviction candidate.
//!
//! ```text
//!            protected zone
//!   ◀──────────────────────────────────▶
//!   start - proximity   [start, end)   end + proximity
//!
//!   Ready segments wholly outside the zone with missCount >= miss_threshold
//!   are purged after the next request.
//! ```
//!
//! # Examples
//!
//! ```
//! use window_cache::config::{EvictionStrategy, WindowCacheConfig};
//! use core::num::NonZeroUsize;
//!
//! // Evict aggressively for a list that is scrolled a long way.
//! let config = WindowCacheConfig {
//!     eviction: EvictionStrategy::Lru,
//!     prefetch: true,
//!     miss_threshold: 5,
//!     proximity: NonZeroUsize::new(50),
//! };
//! assert_eq!(config.eviction, EvictionStrategy::Lru);
//! ```

use core::fmt;
use core::num::NonZeroUsize;

/// Number of consecutive misses before a segment may be purged.
pub const DEFAULT_MISS_THRESHOLD: u32 = 5;

/// Governs whether the planner ever purges segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EvictionStrategy {
    /// Keep every fetched row until the cache is reset.
    #[default]
    Never,
    /// Purge segments that have not been touched recently and lie away from
    /// the active window.
    Lru,
}

impl EvictionStrategy {
    /// Returns true when segments can be purged under this strategy.
    #[inline]
    pub fn evicts(self) -> bool {
        matches!(self, EvictionStrategy::Lru)
    }

    /// Short name used in metrics and simulator output.
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionStrategy::Never => "never",
            EvictionStrategy::Lru => "lru",
        }
    }
}

/// Configuration for a [`WindowedCache`](crate::WindowedCache).
///
/// # Fields
///
/// - `eviction`: Whether distant, stale segments are purged.
/// - `prefetch`: Whether an adjacent purged or partially resident segment is
///   fetched in the background after each request. Only takes effect with
///   `EvictionStrategy::Lru` and a spawner passed to
///   [`WindowedCache::init`](crate::WindowedCache::init).
/// - `miss_threshold`: Consecutive misses before a segment can be purged.
/// - `proximity`: Protected distance around the active window. `None` means
///   "use the size of the first request".
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WindowCacheConfig {
    /// Eviction strategy for resident segments.
    pub eviction: EvictionStrategy,
    /// Speculatively fetch the neighbouring segment in the direction of travel.
    pub prefetch: bool,
    /// Consecutive misses a segment must accumulate before it is purged.
    pub miss_threshold: u32,
    /// Explicit eviction distance; derived from the first request when `None`.
    pub proximity: Option<NonZeroUsize>,
}

impl Default for WindowCacheConfig {
    fn default() -> Self {
        Self {
            eviction: EvictionStrategy::Never,
            prefetch: false,
            miss_threshold: DEFAULT_MISS_THRESHOLD,
            proximity: None,
        }
    }
}

impl fmt::Debug for WindowCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowCacheConfig")
            .field("eviction", &self.eviction)
            .field("prefetch", &self.prefetch)
            .field("miss_threshold", &self.miss_threshold)
            .field("proximity", &self.proximity)
            .finish()
    }
}
