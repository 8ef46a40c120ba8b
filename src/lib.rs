#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Request Flow
//!
//! ```text
//! ┌──────────────┐  fetch_by_offset   ┌───────────────────────────────────────┐
//! │   consumer   │ ─────────────────▶ │ WindowedCache                         │
//! │ (list view)  │ ◀───────────────── │                                       │
//! └──────────────┘   rows + done      │  RangeStore ◀── write_span ──┐        │
//!                                     │  SegmentRegistry             │        │
//!                                     │  in-flight table             │        │
//!                                     │  planner ── evict / prefetch │        │
//!                                     │  reconciler ◀── events ──┐   │        │
//!                                     └──────────────────────────┼───┼────────┘
//!                                                                │   │
//!                                     ┌──────────────────────────┴───┴────────┐
//!                                     │ PagedDataSource                       │
//!                                     └───────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Type | Role |
//! |------|------|
//! | [`WindowedCache`] | Coordinator: serves windows, coalesces fetches, runs the planner |
//! | [`PagedDataSource`] | Contract every upstream implements |
//! | [`MemorySource`] | In-memory source emitting mutate/refresh events |
//! | [`TaskQueue`] | Deterministic spawner for background prefetches |
//! | [`WindowCacheConfig`] | Eviction strategy, prefetch flag, thresholds |
//!
//! ## Code Examples
//!
//! ### Read-through with LRU eviction and prefetch
//!
//! ```rust
//! use std::sync::Arc;
//! use futures::executor::block_on;
//! use window_cache::config::{EvictionStrategy, WindowCacheConfig};
//! use window_cache::{FetchByOffsetParameters, MemorySource, TaskQueue, WindowedCache};
//!
//! let queue = Arc::new(TaskQueue::new());
//! let config = WindowCacheConfig {
//!     eviction: EvictionStrategy::Lru,
//!     prefetch: true,
//!     ..WindowCacheConfig::default()
//! };
//! let cache = WindowedCache::init(
//!     MemorySource::from_rows((0..1_000u32).collect()),
//!     config,
//!     Some(queue.clone()),
//! );
//!
//! let page = block_on(cache.fetch_by_offset(FetchByOffsetParameters::new(0, 25))).unwrap();
//! assert_eq!(page.results.len(), 25);
//! assert!(!page.done);
//!
//! // Background work runs when the queue is drained.
//! queue.run_until_idle();
//! ```
//!
//! ### Following source mutations
//!
//! ```rust
//! use futures::executor::block_on;
//! use window_cache::{FetchByOffsetParameters, MemorySource, WindowedCache};
//!
//! let cache = WindowedCache::new(MemorySource::from_rows((0..100u32).collect()));
//! block_on(cache.fetch_by_offset(FetchByOffsetParameters::new(20, 10))).unwrap();
//!
//! // A row removed before the window shifts it down by one.
//! cache.source().remove(5);
//! assert_eq!(cache.start_index(), 19);
//! ```

/// Cache configuration structures.
///
/// Provides `WindowCacheConfig` and the `EvictionStrategy` enum.
pub mod config;

/// Row entry type.
///
/// Provides `Item<K, D>`, pairing a row payload with its metadata.
pub mod entry;

/// Error types.
pub mod error;

/// Range Cache Store.
///
/// A dense window of rows addressed by logical offset, with null cells for
/// purged or not yet fetched rows.
pub mod store;

/// Cache Segment Registry.
///
/// Tracks resident, fetching and purged ranges of the store.
pub mod segment;

/// Paged data source contract.
///
/// The `PagedDataSource` trait plus its parameter, result, event and
/// listener types.
pub mod source;

/// In-memory data source.
pub mod memory;

/// Deterministic spawner for background prefetches.
pub mod task;

/// Cache metrics system.
///
/// Provides the `CacheMetrics` trait and BTreeMap-based reporting.
pub mod metrics;

/// Windowed Cache Coordinator.
///
/// Serves windowed reads from the store, coalesces overlapping upstream
/// fetches and wires the planner and reconciler together.
pub mod window;

pub(crate) mod inflight;
pub(crate) mod planner;
pub(crate) mod reconcile;

pub use config::{EvictionStrategy, WindowCacheConfig};
pub use entry::{Item, ItemMetadata};
pub use error::{CacheError, PreconditionError};
pub use memory::MemorySource;
pub use metrics::{CacheMetrics, WindowCacheMetrics};
pub use segment::{CacheStatus, FetchDirection, Segment};
pub use source::{
    Capability, ContainsKeysResults, DataProviderEvent, DataProviderListener, Emptiness,
    FetchByKeysParameters, FetchByKeysResults, FetchByOffsetParameters, FetchByOffsetResults,
    FetchListParameters, FetchListResult, ListenerId, ListenerSet, MutationDetail, MutationEvent,
    MutationTarget, PagedDataSource, SharedListener,
};
pub use task::TaskQueue;
pub use window::{Spawner, WindowedCache};
