//! Windowed Cache Coordinator
//!
//! [`WindowedCache`] wraps a [`PagedDataSource`] and answers windowed
//! `fetch_by_offset` requests from a [`RangeStore`], going upstream only for
//! windows that are not fully resident.
//!
//! # How a request is served
//!
//! ```text
//!   fetch_by_offset(offset, size)
//!        │
//!        ├─ resident? ───────────────yes──▶ touch segments, read store ──┐
//!        │                                                               │
//!        ├─ overlaps a started fetch? ──yes─▶ park on it, then retry     │
//!        │                                                               │
//!        └─ mark_fetching + register ──▶ source.fetch_by_offset          │
//!                                             │                          │
//!                    epoch changed? ──yes──▶ discard, return rows        │
//!                                             │                          │
//!                    write_span + complete ◀──┘                          │
//!                                             │                          │
//!                                             ▼                          ▼
//!                                    planner (evict, maybe spawn prefetch)
//! ```
//!
//! # Thread Safety
//!
//! The store, registry, in-flight table and metrics live behind one
//! `parking_lot::Mutex` that is never held across an `.await`. Every mutate,
//! refresh and `fetch_first` bumps an epoch; a fetch that completes under a
//! different epoch leaves the store alone.
//!
//! # Cancellation
//!
//! Dropping a `fetch_by_offset` future while it waits on the source reverts
//! its segment reservation and wakes any callers parked on it.

use crate::config::WindowCacheConfig;
use crate::entry::Item;
use crate::error::{CacheError, PreconditionError};
use crate::inflight::InFlight;
use crate::metrics::{CacheMetrics, WindowCacheMetrics};
use crate::planner::{self, Prefetch};
use crate::reconcile;
use crate::segment::{FetchDirection, FetchTicket, Segment, SegmentRegistry};
use crate::source::{
    Capability, ContainsKeysResults, DataProviderEvent, DataProviderListener, Emptiness,
    FetchByKeysParameters, FetchByKeysResults, FetchByOffsetParameters, FetchByOffsetResults,
    FetchListParameters, FetchListResult, ListenerId, PagedDataSource, SharedListener,
};
use crate::store::RangeStore;
use core::fmt;
use core::num::NonZeroUsize;
use futures::channel::oneshot;
use futures::stream::{BoxStream, StreamExt};
use futures::task::{Spawn, SpawnExt};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Executor used for background prefetches.
pub type Spawner = Arc<dyn Spawn + Send + Sync>;

/// Under eviction, merged Ready segments cover at most this many proximities.
const SPAN_LIMIT_FACTOR: usize = 2;

/// Mutable state shared by the orchestrator, planner and reconciler.
pub(crate) struct State<K, D> {
    pub(crate) store: RangeStore<K, D>,
    pub(crate) registry: SegmentRegistry,
    pub(crate) in_flight: InFlight,
    /// Prefetch reservations whose task has not started yet.
    queued: Vec<Pending>,
    pub(crate) metrics: WindowCacheMetrics,
    pub(crate) current_start: Option<usize>,
    pub(crate) proximity: Option<usize>,
    pub(crate) epoch: u64,
}

/// An upstream fetch that has been reserved but not yet settled.
pub(crate) struct Pending {
    ticket: FetchTicket,
    flight: u64,
    epoch: u64,
}

impl<K, D> State<K, D> {
    pub(crate) fn new(config: &WindowCacheConfig) -> Self {
        Self {
            store: RangeStore::new(),
            registry: SegmentRegistry::new(),
            in_flight: InFlight::new(),
            queued: Vec::new(),
            metrics: WindowCacheMetrics::new(config.eviction),
            current_start: None,
            proximity: None,
            epoch: 0,
        }
    }

    /// Reserves `[start, end)` in the registry and the in-flight table.
    ///
    /// Requests count misses against untouched segments; prefetches do not.
    pub(crate) fn begin_fetch(&mut self, start: usize, end: usize, request: bool) -> Pending {
        let ticket = if request {
            self.registry.mark_fetching(start, end - 1)
        } else {
            self.registry.reserve(start, end - 1)
        };
        let flight = self.in_flight.register(start, end);
        self.metrics.upstream_fetches += 1;
        Pending {
            ticket,
            flight,
            epoch: self.epoch,
        }
    }

    /// Reserves `[start, end)` for a background prefetch and parks the
    /// reservation until its task starts. Returns the in-flight handle.
    pub(crate) fn queue_prefetch(&mut self, start: usize, end: usize) -> u64 {
        let pending = self.begin_fetch(start, end, false);
        let flight = pending.flight;
        self.queued.push(pending);
        flight
    }

    /// Hands a queued prefetch its reservation. `None` once a request has
    /// taken it over.
    fn claim_prefetch(&mut self, flight: u64) -> Option<Pending> {
        let pos = self.queued.iter().position(|p| p.flight == flight)?;
        Some(self.queued.swap_remove(pos))
    }

    /// Undoes every queued prefetch overlapping `[start, end)` so a request
    /// can fetch the range itself. Returns how many were taken over.
    fn take_over_prefetches(&mut self, start: usize, end: usize) -> usize {
        let (taken, kept): (Vec<Pending>, Vec<Pending>) =
            core::mem::take(&mut self.queued)
                .into_iter()
                .partition(|pending| {
                    let (first, last) = pending.ticket.span();
                    first < end && start <= last
                });
        self.queued = kept;
        let count = taken.len();
        for pending in taken {
            self.withdraw_prefetch(pending);
        }
        count
    }

    /// Undoes a prefetch reservation that never reached the source.
    fn withdraw_prefetch(&mut self, pending: Pending) {
        self.metrics.upstream_fetches = self.metrics.upstream_fetches.saturating_sub(1);
        self.abandon(pending, false);
    }

    /// Undoes a reservation whose fetch will never be settled.
    fn abandon(&mut self, pending: Pending, keep_as_purged: bool) {
        self.registry.revert(pending.ticket, keep_as_purged);
        self.in_flight.complete(pending.flight);
    }

    /// Drops every cached row and segment and invalidates in-flight fetches.
    pub(crate) fn invalidate(&mut self) {
        self.store.reset();
        self.registry.reset();
        self.epoch += 1;
    }
}

impl<K: Clone, D: Clone> State<K, D> {
    /// Applies the outcome of an upstream fetch.
    ///
    /// Returns the upstream rows and whether they were stored. Rows fetched
    /// under a stale epoch are handed back without touching the store.
    fn settle<E>(
        &mut self,
        pending: Pending,
        params: FetchByOffsetParameters,
        outcome: Result<FetchByOffsetResults<K, D>, E>,
        keep_failed_as_purged: bool,
    ) -> Result<(FetchByOffsetResults<K, D>, bool), CacheError<E>> {
        self.in_flight.complete(pending.flight);
        let fetched = match outcome {
            Ok(fetched) => fetched,
            Err(err) => {
                self.metrics.upstream_failures += 1;
                self.registry.revert(pending.ticket, keep_failed_as_purged);
                debug!(
                    offset = params.offset,
                    size = params.size,
                    "upstream fetch failed, reservation reverted"
                );
                return Err(CacheError::Upstream(err));
            }
        };

        if pending.epoch != self.epoch {
            self.metrics.discarded_fetches += 1;
            self.registry.revert(pending.ticket, false);
            debug!(
                offset = params.offset,
                size = params.size,
                "source changed during fetch, result not cached"
            );
            return Ok((fetched, false));
        }

        let stored = match self.store.write_span(
            params.offset,
            fetched.results.iter().cloned(),
            fetched.done,
        ) {
            Ok(stored) => stored,
            Err(err) => {
                self.registry.revert(pending.ticket, keep_failed_as_purged);
                return Err(err.into());
            }
        };
        self.registry
            .complete(pending.ticket, params.offset + stored, &self.store);
        self.metrics.core.record_insertion(stored as u64);
        debug!(
            offset = params.offset,
            rows = stored,
            done = fetched.done,
            "fetched rows stored"
        );
        Ok((fetched, true))
    }

    /// Builds the response for a resident window.
    fn assemble(
        &self,
        params: FetchByOffsetParameters,
    ) -> Result<FetchByOffsetResults<K, D>, PreconditionError> {
        let requested_end = params.end();
        let end = if self.store.is_done() {
            requested_end.min(self.store.end_index())
        } else {
            requested_end
        };
        let start = params.offset.min(end);
        let results = self.store.read_resident(start, end)?;
        Ok(FetchByOffsetResults {
            results,
            fetch_parameters: params,
            done: self.store.is_done() && requested_end >= self.store.end_index(),
        })
    }
}

struct Inner<S: PagedDataSource> {
    source: S,
    config: WindowCacheConfig,
    spawner: Option<Spawner>,
    state: Mutex<State<S::Key, S::Data>>,
    listener: Mutex<Option<ListenerId>>,
}

impl<S: PagedDataSource> Inner<S> {
    fn unsubscribe(&self) -> bool {
        let Some(id) = self.listener.lock().take() else {
            return false;
        };
        self.source.remove_listener(id);
        debug!(listener = id.get(), "unsubscribed from data source");
        true
    }

    fn plan(
        &self,
        state: &mut State<S::Key, S::Data>,
        start: usize,
        end: usize,
        direction: FetchDirection,
    ) -> Option<Prefetch> {
        planner::plan(
            state,
            &self.config,
            self.spawner.is_some(),
            start,
            end,
            direction,
        )
    }

    /// Spawns a reserved prefetch. Must be called without the state lock.
    fn launch(self: &Arc<Self>, job: Prefetch) {
        let Prefetch { params, flight } = job;
        let queued = QueuedPrefetch {
            inner: Arc::clone(self),
            flight: Some(flight),
        };
        let Some(spawner) = self.spawner.as_ref() else {
            return;
        };
        let inner = Arc::clone(self);
        let task = async move {
            let mut queued = queued;
            let Some(pending) = queued.start() else {
                trace!(offset = params.offset, "prefetch taken over by a request");
                return;
            };
            let mut guard = FetchGuard {
                inner: Arc::clone(&inner),
                pending: Some(pending),
            };
            let outcome = inner.source.fetch_by_offset(params).await;
            let mut state = inner.state.lock();
            let Some(pending) = guard.disarm() else {
                return;
            };
            match state.settle(pending, params, outcome, true) {
                Ok((fetched, stored)) => debug!(
                    offset = params.offset,
                    rows = fetched.results.len(),
                    stored,
                    "prefetch finished"
                ),
                Err(err) => warn!(
                    offset = params.offset,
                    size = params.size,
                    error = ?err,
                    "prefetch failed"
                ),
            }
        };
        if let Err(err) = spawner.spawn(task) {
            warn!(error = %err, "could not spawn prefetch");
        }
    }
}

impl<S: PagedDataSource> Drop for Inner<S> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Reverts a reservation if its fetch future is dropped before settling.
struct FetchGuard<S: PagedDataSource> {
    inner: Arc<Inner<S>>,
    pending: Option<Pending>,
}

impl<S: PagedDataSource> FetchGuard<S> {
    fn disarm(&mut self) -> Option<Pending> {
        self.pending.take()
    }
}

impl<S: PagedDataSource> Drop for FetchGuard<S> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            let keep = self.inner.config.eviction.evicts();
            self.inner.state.lock().abandon(pending, keep);
            debug!("fetch cancelled, reservation reverted");
        }
    }
}

/// Withdraws a queued prefetch if its task is dropped before it starts.
struct QueuedPrefetch<S: PagedDataSource> {
    inner: Arc<Inner<S>>,
    flight: Option<u64>,
}

impl<S: PagedDataSource> QueuedPrefetch<S> {
    fn start(&mut self) -> Option<Pending> {
        let flight = self.flight.take()?;
        self.inner.state.lock().claim_prefetch(flight)
    }
}

impl<S: PagedDataSource> Drop for QueuedPrefetch<S> {
    fn drop(&mut self) {
        if let Some(flight) = self.flight.take() {
            let mut state = self.inner.state.lock();
            if let Some(pending) = state.claim_prefetch(flight) {
                state.withdraw_prefetch(pending);
                debug!("prefetch dropped before starting, reservation reverted");
            }
        }
    }
}

/// Routes source events to the reconciler without keeping the cache alive.
struct CacheListener<S: PagedDataSource> {
    inner: Weak<Inner<S>>,
}

impl<S: PagedDataSource> DataProviderListener<S::Key, S::Data> for CacheListener<S> {
    fn on_event(&self, event: &DataProviderEvent<S::Key, S::Data>) {
        if let Some(inner) = self.inner.upgrade() {
            reconcile::apply(&mut inner.state.lock(), event);
        }
    }
}

enum Step<K, D> {
    Hit(FetchByOffsetResults<K, D>, Option<Prefetch>),
    Wait(oneshot::Receiver<()>),
    Fetch(Pending),
}

/// Windowed cache in front of a paged data source.
///
/// Cloning is cheap and yields another handle to the same cache.
///
/// # Examples
///
/// ```
/// use futures::executor::block_on;
/// use window_cache::{FetchByOffsetParameters, MemorySource, WindowedCache};
///
/// let source = MemorySource::from_rows((0..100u32).collect());
/// let cache = WindowedCache::new(source);
///
/// let page = block_on(cache.fetch_by_offset(FetchByOffsetParameters::new(0, 10))).unwrap();
/// assert_eq!(page.results.len(), 10);
/// assert_eq!(cache.source().fetch_count(), 1);
///
/// // The same window again is served from the store.
/// block_on(cache.fetch_by_offset(FetchByOffsetParameters::new(0, 10))).unwrap();
/// assert_eq!(cache.source().fetch_count(), 1);
/// ```
pub struct WindowedCache<S: PagedDataSource> {
    inner: Arc<Inner<S>>,
}

impl<S: PagedDataSource> Clone for WindowedCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: PagedDataSource> WindowedCache<S> {
    /// Creates a cache with the default configuration (no eviction, no
    /// prefetch).
    pub fn new(source: S) -> Self {
        Self::init(source, WindowCacheConfig::default(), None)
    }

    /// Creates a cache with an explicit configuration.
    ///
    /// `spawner` runs background prefetches; without one prefetching is
    /// skipped even when enabled in `config`.
    pub fn init(source: S, config: WindowCacheConfig, spawner: Option<Spawner>) -> Self {
        let inner = Arc::new(Inner {
            source,
            config,
            spawner,
            state: Mutex::new(State::new(&config)),
            listener: Mutex::new(None),
        });
        let listener: SharedListener<S::Key, S::Data> = Arc::new(CacheListener {
            inner: Arc::downgrade(&inner),
        });
        let id = inner.source.add_listener(listener);
        *inner.listener.lock() = Some(id);
        debug!(?config, listener = id.get(), "windowed cache created");
        Self { inner }
    }

    /// Fetches `params.size` rows starting at `params.offset`.
    ///
    /// Resident windows are served from the store. Otherwise exactly one
    /// upstream call is issued, unless an overlapping fetch is already in
    /// flight, in which case this request waits for it and re-checks.
    pub async fn fetch_by_offset(
        &self,
        params: FetchByOffsetParameters,
    ) -> Result<FetchByOffsetResults<S::Key, S::Data>, CacheError<S::Error>> {
        let FetchByOffsetParameters { offset, size } = params;
        if size == 0 {
            return Err(PreconditionError::ZeroSize.into());
        }
        let end = params.end();
        let inner = &self.inner;

        let direction = {
            let mut state = inner.state.lock();
            if state.proximity.is_none() {
                let proximity = inner.config.proximity.map_or(size, NonZeroUsize::get);
                state.proximity = Some(proximity);
                if inner.config.eviction.evicts() {
                    state
                        .registry
                        .set_span_limit(Some(proximity.saturating_mul(SPAN_LIMIT_FACTOR)));
                }
            }
            let direction = FetchDirection::between(state.current_start, offset);
            state.current_start = Some(offset);
            direction
        };

        loop {
            let step = {
                let mut state = inner.state.lock();
                if state.store.is_fully_resident(offset, end) {
                    state.registry.touch(offset, end - 1);
                    let result = state.assemble(params)?;
                    state.metrics.core.record_hit(result.results.len() as u64);
                    trace!(offset, size, "window served from cache");
                    let job = inner.plan(&mut state, offset, end, direction);
                    Step::Hit(result, job)
                } else {
                    // Only fetches that already reached the source are joined.
                    if state.take_over_prefetches(offset, end) > 0 {
                        debug!(offset, size, "queued prefetch taken over");
                    }
                    match state.in_flight.wait_for(offset, end) {
                        Some(rx) => {
                            state.metrics.coalesced_waits += 1;
                            Step::Wait(rx)
                        }
                        None => {
                            state.metrics.core.record_miss(size as u64);
                            Step::Fetch(state.begin_fetch(offset, end, true))
                        }
                    }
                }
            };

            let pending = match step {
                Step::Hit(result, job) => {
                    if let Some(job) = job {
                        inner.launch(job);
                    }
                    return Ok(result);
                }
                Step::Wait(rx) => {
                    // A dropped sender means the leader was cancelled; retry either way.
                    let _ = rx.await;
                    continue;
                }
                Step::Fetch(pending) => pending,
            };

            let mut guard = FetchGuard {
                inner: Arc::clone(inner),
                pending: Some(pending),
            };
            debug!(offset, size, ?direction, "fetching window from upstream");
            let outcome = inner.source.fetch_by_offset(params).await;

            let (settled, job) = {
                let mut state = inner.state.lock();
                let Some(pending) = guard.disarm() else {
                    continue;
                };
                let keep = inner.config.eviction.evicts();
                let settled = state.settle(pending, params, outcome, keep);
                let job = match settled {
                    Ok((_, true)) => inner.plan(&mut state, offset, end, direction),
                    _ => None,
                };
                (settled, job)
            };
            if let Some(job) = job {
                inner.launch(job);
            }
            return settled.map(|(fetched, _)| fetched);
        }
    }

    /// Streams the source from its first row, snapshotting every page into
    /// the store as it passes by.
    ///
    /// The store and registry are reset when this is called. Snapshotting
    /// stops (pages still flow) once a mutate or refresh arrives.
    pub fn fetch_first(
        &self,
        params: FetchListParameters,
    ) -> BoxStream<'static, Result<FetchListResult<S::Key, S::Data>, CacheError<S::Error>>> {
        let epoch = {
            let mut state = self.inner.state.lock();
            state.invalidate();
            state.epoch
        };
        let inner = Arc::clone(&self.inner);
        let mut offset = 0usize;
        self.inner
            .source
            .fetch_first(params)
            .map(move |page| {
                let page = page.map_err(CacheError::Upstream)?;
                let count = page.results.len();
                {
                    let mut state = inner.state.lock();
                    if state.epoch == epoch {
                        let written = state.store.write_span(
                            offset,
                            page.results.iter().cloned(),
                            page.done,
                        )?;
                        if written > 0 {
                            state.registry.commit(offset, offset + written - 1);
                        }
                        state.metrics.core.record_insertion(written as u64);
                        trace!(offset, rows = written, "fetch_first page cached");
                    }
                }
                offset += count;
                Ok(page)
            })
            .boxed()
    }

    /// Fetches rows by key, bypassing the store.
    pub async fn fetch_by_keys(
        &self,
        params: FetchByKeysParameters<S::Key>,
    ) -> Result<FetchByKeysResults<S::Key, S::Data>, CacheError<S::Error>> {
        self.inner
            .source
            .fetch_by_keys(params)
            .await
            .map_err(CacheError::Upstream)
    }

    /// Reports which keys exist upstream.
    pub async fn contains_keys(
        &self,
        params: FetchByKeysParameters<S::Key>,
    ) -> Result<ContainsKeysResults<S::Key>, CacheError<S::Error>> {
        self.inner
            .source
            .contains_keys(params)
            .await
            .map_err(CacheError::Upstream)
    }

    /// Total number of rows upstream, `None` when unknown.
    pub async fn get_total_size(&self) -> Result<Option<usize>, CacheError<S::Error>> {
        self.inner
            .source
            .get_total_size()
            .await
            .map_err(CacheError::Upstream)
    }

    /// Whether the source holds any rows.
    pub fn is_empty(&self) -> Emptiness {
        self.inner.source.is_empty()
    }

    /// Looks up an optional source feature.
    pub fn get_capability(&self, name: &str) -> Option<Capability> {
        self.inner.source.get_capability(name)
    }

    /// Subscribes to the source's events.
    pub fn add_listener(&self, listener: SharedListener<S::Key, S::Data>) -> ListenerId {
        self.inner.source.add_listener(listener)
    }

    /// Unsubscribes a listener added through [`add_listener`](Self::add_listener).
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.source.remove_listener(id)
    }

    /// Dispatches an event through the source, reaching this cache and
    /// every other listener.
    pub fn dispatch_event(&self, event: &DataProviderEvent<S::Key, S::Data>) {
        self.inner.source.dispatch_event(event)
    }

    /// Stops listening to the source. Safe to call more than once; also runs
    /// when the last handle is dropped.
    pub fn destroy(&self) {
        if !self.inner.unsubscribe() {
            trace!("destroy called on an already detached cache");
        }
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// The configuration the cache was created with.
    pub fn config(&self) -> WindowCacheConfig {
        self.inner.config
    }

    /// Logical offset of the first cell in the store.
    pub fn start_index(&self) -> usize {
        self.inner.state.lock().store.start_index()
    }

    /// Number of cells in the store, resident or not.
    pub fn len(&self) -> usize {
        self.inner.state.lock().store.len()
    }

    /// Returns true when the store holds no cells.
    pub fn is_cache_empty(&self) -> bool {
        self.inner.state.lock().store.is_empty()
    }

    /// Whether the end of the sequence has been reached.
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().store.is_done()
    }

    /// Snapshot of the segment registry.
    pub fn segments(&self) -> Vec<Segment> {
        self.inner.state.lock().registry.iter().copied().collect()
    }

    /// Reads `[start, end)` from the store; non-resident cells are `None`.
    pub fn read(&self, start: usize, end: usize) -> Vec<Option<Item<S::Key, S::Data>>> {
        self.inner.state.lock().store.read(start, end)
    }

    /// Number of upstream fetches currently in flight.
    pub fn pending_fetches(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Snapshot of the cache metrics.
    pub fn window_metrics(&self) -> WindowCacheMetrics {
        self.inner.state.lock().metrics.clone()
    }
}

impl<S: PagedDataSource> CacheMetrics for WindowedCache<S> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.inner.state.lock().metrics.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        self.inner.state.lock().metrics.algorithm_name()
    }
}

impl<S: PagedDataSource> fmt::Debug for WindowedCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WindowedCache")
            .field("config", &self.inner.config)
            .field("store", &state.store)
            .field("segments", &state.registry)
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvictionStrategy;
    use crate::memory::MemorySource;
    use crate::segment::CacheStatus;
    use futures::executor::block_on;

    fn params(offset: usize, size: usize) -> FetchByOffsetParameters {
        FetchByOffsetParameters::new(offset, size)
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let cache = WindowedCache::new(MemorySource::from_rows((0..10u32).collect()));
        let err = block_on(cache.fetch_by_offset(params(0, 0))).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Precondition(PreconditionError::ZeroSize)
        ));
        assert_eq!(cache.source().fetch_count(), 0);
    }

    #[test]
    fn test_short_source_sets_done() {
        let cache = WindowedCache::new(MemorySource::from_rows((0..15u32).collect()));
        let page = block_on(cache.fetch_by_offset(params(10, 10))).unwrap();
        assert_eq!(page.results.len(), 5);
        assert!(page.done);
        assert!(cache.is_done());

        // Past the end is resident-and-absent once done.
        let tail = block_on(cache.fetch_by_offset(params(12, 10))).unwrap();
        assert_eq!(tail.results.len(), 3);
        assert!(tail.done);
        assert_eq!(cache.source().fetch_count(), 1);
    }

    #[test]
    fn test_first_request_sets_proximity() {
        let cache = WindowedCache::new(MemorySource::from_rows((0..50u32).collect()));
        block_on(cache.fetch_by_offset(params(0, 7))).unwrap();
        block_on(cache.fetch_by_offset(params(20, 3))).unwrap();
        assert_eq!(cache.inner.state.lock().proximity, Some(7));
        assert_eq!(cache.inner.state.lock().current_start, Some(20));
    }

    #[test]
    fn test_discarded_fetch_still_returns_rows() {
        let cache = WindowedCache::new(MemorySource::from_rows((0..50u32).collect()));
        let pending = {
            let mut state = cache.inner.state.lock();
            let pending = state.begin_fetch(0, 10, true);
            state.invalidate();
            pending
        };
        let fetched = block_on(cache.source().fetch_by_offset(params(0, 10)));
        let (rows, stored) = cache
            .inner
            .state
            .lock()
            .settle(pending, params(0, 10), fetched, false)
            .unwrap();
        assert_eq!(rows.results.len(), 10);
        assert!(!stored);
        assert!(cache.is_cache_empty());
        assert_eq!(cache.window_metrics().discarded_fetches, 1);
        assert_eq!(cache.pending_fetches(), 0);
    }

    #[test]
    fn test_mutation_reaches_cache_through_source() {
        let cache = WindowedCache::new(MemorySource::from_rows((0..50u32).collect()));
        block_on(cache.fetch_by_offset(params(20, 10))).unwrap();
        cache.source().remove(5);
        assert_eq!(cache.start_index(), 19);
        assert_eq!(cache.segments()[0].start, 19);
        assert_eq!(cache.window_metrics().mutations_applied, 1);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let cache = WindowedCache::new(MemorySource::from_rows((0..10u32).collect()));
        assert_eq!(cache.source().listener_count(), 1);
        cache.destroy();
        cache.destroy();
        assert_eq!(cache.source().listener_count(), 0);

        // Detached caches no longer follow the source.
        block_on(cache.fetch_by_offset(params(0, 5))).unwrap();
        cache.source().dispatch_event(&DataProviderEvent::Refresh);
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn test_dispatch_event_reaches_own_reconciler() {
        let cache = WindowedCache::new(MemorySource::from_rows((0..30u32).collect()));
        block_on(cache.fetch_by_offset(params(0, 10))).unwrap();
        cache.dispatch_event(&DataProviderEvent::Refresh);
        assert!(cache.is_cache_empty());
        assert!(cache.segments().is_empty());
        assert_eq!(cache.start_index(), 0);
    }

    #[test]
    fn test_fetch_below_window_rebases() {
        let config = WindowCacheConfig {
            eviction: EvictionStrategy::Lru,
            ..WindowCacheConfig::default()
        };
        let cache = WindowedCache::init(
            MemorySource::from_rows((0..100u32).collect()),
            config,
            None,
        );
        block_on(cache.fetch_by_offset(params(50, 10))).unwrap();
        block_on(cache.fetch_by_offset(params(10, 10))).unwrap();
        assert_eq!(cache.start_index(), 10);
        let statuses: Vec<CacheStatus> = cache.segments().iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![CacheStatus::Ready, CacheStatus::Ready]);
        assert!(cache.read(20, 50).iter().all(Option::is_none));
    }

    #[test]
    fn test_lru_caps_merged_segments_from_first_request() {
        let config = WindowCacheConfig {
            eviction: EvictionStrategy::Lru,
            ..WindowCacheConfig::default()
        };
        let cache = WindowedCache::init(
            MemorySource::from_rows((0..100u32).collect()),
            config,
            None,
        );
        for offset in [0, 5, 10] {
            block_on(cache.fetch_by_offset(params(offset, 5))).unwrap();
        }
        assert_eq!(cache.inner.state.lock().registry.span_limit(), Some(10));
        let bounds: Vec<(usize, usize)> =
            cache.segments().iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(bounds, vec![(0, 9), (10, 14)]);

        // Without eviction merging is unbounded.
        let plain = WindowedCache::new(MemorySource::from_rows((0..100u32).collect()));
        for offset in [0, 5, 10] {
            block_on(plain.fetch_by_offset(params(offset, 5))).unwrap();
        }
        assert_eq!(plain.inner.state.lock().registry.span_limit(), None);
        assert_eq!(plain.segments().len(), 1);
    }

    #[test]
    fn test_update_through_detail() {
        let cache = WindowedCache::new(MemorySource::from_rows((0..10u32).collect()));
        block_on(cache.fetch_by_offset(params(0, 10))).unwrap();
        let key = *cache.read(3, 4)[0].as_ref().unwrap().key();
        cache.source().update(3, 300);
        let row = cache.read(3, 4).remove(0).unwrap();
        assert_eq!(row.data, 300);
        assert_eq!(row.key(), &key);
    }
}
