//! Shared fixtures for the integration tests.
//!
//! [`GatedSource`] wraps a [`MemorySource`] and can park every
//! `fetch_by_offset` call until the test opens the gate, or fail a given
//! number of calls. That is enough to create the interleavings the cache has
//! to survive: overlapping requests, cancellation, and events arriving while
//! a fetch is in flight.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::oneshot;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use window_cache::config::{EvictionStrategy, WindowCacheConfig};
use window_cache::{
    Capability, ContainsKeysResults, DataProviderEvent, Emptiness, FetchByKeysParameters,
    FetchByKeysResults, FetchByOffsetParameters, FetchByOffsetResults, FetchListParameters,
    FetchListResult, Item, ListenerId, MemorySource, PagedDataSource, SharedListener,
};

/// Routes cache logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Shorthand for offset parameters.
pub fn window(offset: usize, size: usize) -> FetchByOffsetParameters {
    FetchByOffsetParameters::new(offset, size)
}

/// LRU configuration with an explicit proximity.
pub fn lru_config(prefetch: bool, proximity: usize) -> WindowCacheConfig {
    WindowCacheConfig {
        eviction: EvictionStrategy::Lru,
        prefetch,
        proximity: NonZeroUsize::new(proximity),
        ..WindowCacheConfig::default()
    }
}

/// Keys of a row list, in order.
pub fn keys(rows: &[Item<u64, u32>]) -> Vec<u64> {
    rows.iter().map(|item| *item.key()).collect()
}

/// Keys of a store read; `None` marks a non-resident cell.
pub fn cell_keys(cells: &[Option<Item<u64, u32>>]) -> Vec<Option<u64>> {
    cells
        .iter()
        .map(|cell| cell.as_ref().map(|item| *item.key()))
        .collect()
}

/// Error returned by [`GatedSource`] when a failure is injected.
#[derive(Debug, thiserror::Error)]
#[error("injected upstream failure")]
pub struct SourceError;

/// A [`MemorySource`] whose offset fetches can be held back or failed.
#[derive(Debug)]
pub struct GatedSource {
    inner: MemorySource<u32>,
    holding: AtomicBool,
    gates: Mutex<Vec<oneshot::Sender<()>>>,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl GatedSource {
    /// A source with rows `0..rows`, row `i` carrying key `i` and data `i`.
    pub fn new(rows: u32) -> Self {
        Self {
            inner: MemorySource::from_rows((0..rows).collect()),
            holding: AtomicBool::new(false),
            gates: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// The wrapped source, for edits that emit events.
    pub fn memory(&self) -> &MemorySource<u32> {
        &self.inner
    }

    /// Parks every subsequent offset fetch until [`release`](Self::release).
    pub fn hold(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    /// Stops holding and lets every parked fetch continue.
    pub fn release(&self) {
        self.holding.store(false, Ordering::SeqCst);
        for gate in self.gates.lock().drain(..) {
            let _ = gate.send(());
        }
    }

    /// Makes the next `count` offset fetches fail.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Offset fetches started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Offset fetches currently parked.
    pub fn parked(&self) -> usize {
        self.gates.lock().len()
    }
}

#[async_trait]
impl PagedDataSource for GatedSource {
    type Key = u64;
    type Data = u32;
    type Error = SourceError;

    async fn fetch_by_offset(
        &self,
        params: FetchByOffsetParameters,
    ) -> Result<FetchByOffsetResults<u64, u32>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.holding.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().push(tx);
            let _ = rx.await;
        }
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(SourceError);
        }
        self.inner
            .fetch_by_offset(params)
            .await
            .map_err(|never| match never {})
    }

    fn fetch_first(
        &self,
        params: FetchListParameters,
    ) -> BoxStream<'static, Result<FetchListResult<u64, u32>, SourceError>> {
        self.inner
            .fetch_first(params)
            .map(|page| page.map_err(|never| match never {}))
            .boxed()
    }

    async fn fetch_by_keys(
        &self,
        params: FetchByKeysParameters<u64>,
    ) -> Result<FetchByKeysResults<u64, u32>, SourceError> {
        self.inner
            .fetch_by_keys(params)
            .await
            .map_err(|never| match never {})
    }

    async fn contains_keys(
        &self,
        params: FetchByKeysParameters<u64>,
    ) -> Result<ContainsKeysResults<u64>, SourceError> {
        self.inner
            .contains_keys(params)
            .await
            .map_err(|never| match never {})
    }

    async fn get_total_size(&self) -> Result<Option<usize>, SourceError> {
        self.inner
            .get_total_size()
            .await
            .map_err(|never| match never {})
    }

    fn is_empty(&self) -> Emptiness {
        self.inner.is_empty()
    }

    fn get_capability(&self, name: &str) -> Option<Capability> {
        self.inner.get_capability(name)
    }

    fn add_listener(&self, listener: SharedListener<u64, u32>) -> ListenerId {
        self.inner.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }

    fn dispatch_event(&self, event: &DataProviderEvent<u64, u32>) {
        self.inner.dispatch_event(event)
    }
}
