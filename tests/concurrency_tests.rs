//! Concurrency Tests for the Windowed Cache
//!
//! Drives interleavings by hand: [`GatedSource`] parks upstream fetches until
//! the test releases them, and futures are polled one step at a time with
//! `futures::poll!` so the order of events is fixed.
//!
//! Background prefetches go through a `TaskQueue`, drained outside of any
//! `block_on`.

mod common;

use common::{init_tracing, keys, lru_config, window, GatedSource, SourceError};
use futures::executor::block_on;
use futures::poll;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use window_cache::{
    CacheError, CacheStatus, Emptiness, MemorySource, PagedDataSource, TaskQueue,
    WindowCacheConfig, WindowedCache,
};

fn gated_cache(rows: u32, config: WindowCacheConfig) -> WindowedCache<GatedSource> {
    init_tracing();
    WindowedCache::init(GatedSource::new(rows), config, None)
}

// ============================================================================
// COALESCING
// ============================================================================

#[test]
fn test_overlapping_requests_share_one_fetch() {
    let cache = gated_cache(100, WindowCacheConfig::default());
    cache.source().hold();

    block_on(async {
        let mut first = Box::pin(cache.fetch_by_offset(window(0, 10)));
        assert!(poll!(first.as_mut()).is_pending());
        assert_eq!(cache.source().parked(), 1);

        let mut second = Box::pin(cache.fetch_by_offset(window(2, 5)));
        assert!(poll!(second.as_mut()).is_pending());
        assert_eq!(cache.pending_fetches(), 1);

        cache.source().release();
        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert_eq!(keys(&first.results), (0..10).collect::<Vec<u64>>());
        assert_eq!(keys(&second.results), vec![2, 3, 4, 5, 6]);
    });

    assert_eq!(cache.source().calls(), 1);
    let metrics = cache.window_metrics();
    assert_eq!(metrics.coalesced_waits, 1);
    assert_eq!(metrics.upstream_fetches, 1);
}

#[test]
fn test_disjoint_requests_fetch_independently() {
    let cache = gated_cache(100, WindowCacheConfig::default());
    cache.source().hold();

    block_on(async {
        let mut low = Box::pin(cache.fetch_by_offset(window(0, 10)));
        let mut high = Box::pin(cache.fetch_by_offset(window(50, 10)));
        assert!(poll!(low.as_mut()).is_pending());
        assert!(poll!(high.as_mut()).is_pending());
        assert_eq!(cache.source().parked(), 2);
        assert_eq!(cache.pending_fetches(), 2);

        cache.source().release();
        assert_eq!(low.await.unwrap().results.len(), 10);
        assert_eq!(high.await.unwrap().results.len(), 10);
    });

    assert_eq!(cache.source().calls(), 2);
    assert_eq!(cache.window_metrics().coalesced_waits, 0);
    assert_eq!(cache.pending_fetches(), 0);
}

// ============================================================================
// CANCELLATION AND FAILURE
// ============================================================================

#[test]
fn test_cancelled_leader_hands_over_to_waiter() {
    let cache = gated_cache(100, WindowCacheConfig::default());
    cache.source().hold();

    block_on(async {
        let mut leader = Box::pin(cache.fetch_by_offset(window(0, 10)));
        assert!(poll!(leader.as_mut()).is_pending());
        let mut waiter = Box::pin(cache.fetch_by_offset(window(2, 5)));
        assert!(poll!(waiter.as_mut()).is_pending());

        drop(leader);
        assert_eq!(cache.pending_fetches(), 0);
        assert!(cache.segments().is_empty());

        cache.source().release();
        let page = waiter.await.unwrap();
        assert_eq!(keys(&page.results), vec![2, 3, 4, 5, 6]);
    });

    assert_eq!(cache.source().calls(), 2);
    let segments = cache.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!((segments[0].start, segments[0].end), (2, 6));
    assert_eq!(segments[0].status, CacheStatus::Ready);
}

#[test]
fn test_failed_fetch_reverts_lru_reservation_to_purged() {
    let cache = gated_cache(100, lru_config(false, 10));
    cache.source().fail_next(1);

    let err = block_on(cache.fetch_by_offset(window(0, 10))).unwrap_err();
    assert!(matches!(err, CacheError::Upstream(SourceError)));
    assert_eq!(cache.pending_fetches(), 0);
    let segments = cache.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].status, CacheStatus::Purged);
    assert_eq!(cache.window_metrics().upstream_failures, 1);

    let page = block_on(cache.fetch_by_offset(window(0, 10))).unwrap();
    assert_eq!(page.results.len(), 10);
    assert!(cache
        .segments()
        .iter()
        .all(|segment| segment.status == CacheStatus::Ready));
    assert!(cache.read(0, 10).iter().all(Option::is_some));
}

#[test]
fn test_failed_fetch_leaves_no_segment_without_eviction() {
    let cache = gated_cache(100, WindowCacheConfig::default());
    cache.source().fail_next(1);

    assert!(block_on(cache.fetch_by_offset(window(20, 10))).is_err());
    assert!(cache.segments().is_empty());
    assert!(cache.is_cache_empty());

    block_on(cache.fetch_by_offset(window(20, 10))).unwrap();
    assert_eq!(cache.source().calls(), 2);
}

// ============================================================================
// EVENTS DURING A FETCH
// ============================================================================

#[test]
fn test_refresh_during_fetch_discards_result() {
    let cache = gated_cache(100, WindowCacheConfig::default());
    cache.source().hold();

    let page = block_on(async {
        let mut fetch = Box::pin(cache.fetch_by_offset(window(50, 10)));
        assert!(poll!(fetch.as_mut()).is_pending());
        cache.source().memory().replace((0..100).collect());
        cache.source().release();
        fetch.await
    })
    .unwrap();

    assert_eq!(page.results.len(), 10);
    assert!(cache.is_cache_empty());
    assert!(cache.segments().is_empty());
    assert_eq!(cache.pending_fetches(), 0);
    let metrics = cache.window_metrics();
    assert_eq!(metrics.discarded_fetches, 1);
    assert_eq!(metrics.refreshes, 1);
}

#[test]
fn test_mutation_during_fetch_discards_result() {
    let cache = gated_cache(100, WindowCacheConfig::default());
    cache.source().hold();

    let page = block_on(async {
        let mut fetch = Box::pin(cache.fetch_by_offset(window(20, 10)));
        assert!(poll!(fetch.as_mut()).is_pending());
        cache.source().memory().insert(0, 500);
        cache.source().release();
        fetch.await
    })
    .unwrap();

    assert_eq!(page.results.len(), 10);
    assert!(cache.segments().is_empty());
    assert!(cache.read(20, 30).iter().all(Option::is_none));
    assert_eq!(cache.window_metrics().discarded_fetches, 1);

    // The next request sees the post-insert sequence.
    let page = block_on(cache.fetch_by_offset(window(20, 10))).unwrap();
    assert_eq!(keys(&page.results), (19..29).collect::<Vec<u64>>());
}

// ============================================================================
// PREFETCH
// ============================================================================

fn prefetching_cache(queue: &Arc<TaskQueue>) -> WindowedCache<GatedSource> {
    init_tracing();
    WindowedCache::init(
        GatedSource::new(200),
        lru_config(true, 10),
        Some(queue.clone()),
    )
}

/// Fills `[0, 50)`, scrolls away long enough to purge it, then scrolls back
/// into the middle of the purged range.
fn scroll_back_into_purged(cache: &WindowedCache<GatedSource>) {
    block_on(cache.fetch_by_offset(window(0, 50))).unwrap();
    for _ in 0..5 {
        block_on(cache.fetch_by_offset(window(150, 10))).unwrap();
    }
    assert!(cache.read(0, 50).iter().all(Option::is_none));
    block_on(cache.fetch_by_offset(window(30, 10))).unwrap();
}

#[test]
fn test_prefetch_fills_purged_gap_upwards() {
    let queue = Arc::new(TaskQueue::new());
    let cache = prefetching_cache(&queue);

    scroll_back_into_purged(&cache);
    assert_eq!(queue.len(), 1);
    assert_eq!(cache.pending_fetches(), 1);
    assert!(cache.read(0, 30).iter().all(Option::is_none));

    assert_eq!(queue.run_until_idle(), 1);
    assert!(cache.read(0, 30).iter().all(Option::is_some));
    assert_eq!(cache.pending_fetches(), 0);
    assert_eq!(cache.source().calls(), 4);
    assert_eq!(cache.window_metrics().prefetches, 1);

    // Scrolling up into the prefetched rows costs nothing.
    block_on(cache.fetch_by_offset(window(10, 10))).unwrap();
    assert_eq!(cache.source().calls(), 4);
}

#[test]
fn test_request_waits_on_running_prefetch() {
    let queue = Arc::new(TaskQueue::new());
    let cache = prefetching_cache(&queue);
    scroll_back_into_purged(&cache);

    // Start the prefetch without letting it reach the source.
    let calls = cache.source().calls();
    cache.source().hold();
    let runner = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.run_until_idle())
    };
    while cache.source().parked() == 0 {
        thread::yield_now();
    }

    block_on(async {
        let mut request = Box::pin(cache.fetch_by_offset(window(5, 10)));
        assert!(poll!(request.as_mut()).is_pending());
        cache.source().release();
        assert_eq!(request.await.unwrap().results.len(), 10);
    });
    assert_eq!(runner.join().unwrap(), 1);
    assert_eq!(cache.source().calls(), calls + 1);
    assert_eq!(cache.window_metrics().coalesced_waits, 1);
}

#[test]
fn test_request_takes_over_queued_prefetch() {
    let queue = Arc::new(TaskQueue::new());
    let cache = prefetching_cache(&queue);
    scroll_back_into_purged(&cache);
    assert_eq!(queue.len(), 1);

    // Nothing drains the queue, so the [0, 30) prefetch never starts.
    let calls = cache.source().calls();
    let page = block_on(cache.fetch_by_offset(window(5, 10))).unwrap();
    assert_eq!(keys(&page.results), (5..15).collect::<Vec<u64>>());
    assert_eq!(cache.source().calls(), calls + 1);
    assert_eq!(cache.window_metrics().coalesced_waits, 0);

    // The request planned a fresh prefetch for [0, 5); the old task finds
    // its reservation gone and leaves the source alone.
    assert_eq!(queue.len(), 2);
    assert_eq!(cache.pending_fetches(), 1);
    assert_eq!(queue.run_until_idle(), 2);
    assert_eq!(cache.source().calls(), calls + 2);
    assert_eq!(cache.pending_fetches(), 0);
    assert!(cache.read(0, 15).iter().all(Option::is_some));
    assert!(cache
        .segments()
        .iter()
        .all(|segment| segment.status != CacheStatus::Fetching));
    // The withdrawn prefetch never counted as an upstream fetch.
    assert_eq!(
        cache.window_metrics().upstream_fetches as usize,
        cache.source().calls()
    );
}

#[test]
fn test_dropped_prefetch_task_releases_reservation() {
    let queue = Arc::new(TaskQueue::new());
    let cache = prefetching_cache(&queue);
    scroll_back_into_purged(&cache);
    assert_eq!(cache.pending_fetches(), 1);

    assert_eq!(queue.clear(), 1);
    assert_eq!(cache.pending_fetches(), 0);
    assert!(cache
        .segments()
        .iter()
        .all(|segment| segment.status != CacheStatus::Fetching));
}

#[test]
fn test_failed_prefetch_does_not_affect_requests() {
    let queue = Arc::new(TaskQueue::new());
    let cache = prefetching_cache(&queue);
    scroll_back_into_purged(&cache);

    cache.source().fail_next(1);
    queue.run_until_idle();
    assert_eq!(cache.window_metrics().upstream_failures, 1);
    assert_eq!(cache.pending_fetches(), 0);
    assert!(cache.read(0, 30).iter().all(Option::is_none));

    let calls = cache.source().calls();
    let page = block_on(cache.fetch_by_offset(window(30, 10))).unwrap();
    assert_eq!(keys(&page.results), (30..40).collect::<Vec<u64>>());
    assert_eq!(cache.source().calls(), calls);
}

#[test]
fn test_prefetch_needs_a_spawner() {
    init_tracing();
    let cache = WindowedCache::init(GatedSource::new(200), lru_config(true, 10), None);
    scroll_back_into_purged(&cache);
    assert_eq!(cache.window_metrics().prefetches, 0);
    assert_eq!(cache.pending_fetches(), 0);
    assert_eq!(cache.source().calls(), 3);
}

// ============================================================================
// MULTI-THREADED READERS
// ============================================================================

#[test]
fn test_parallel_readers_agree_with_source() {
    init_tracing();
    const THREADS: u64 = 8;
    const OPS: usize = 200;

    let source = Arc::new(MemorySource::from_rows((0..2_000u32).collect()));
    let cache = WindowedCache::init(Arc::clone(&source), lru_config(false, 50), None);

    let handles: Vec<_> = (0..THREADS)
        .map(|seed| {
            let cache = cache.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..OPS {
                    let offset = rng.gen_range(0..2_000usize);
                    let size = rng.gen_range(1..60usize);
                    let page = block_on(cache.fetch_by_offset(window(offset, size))).unwrap();
                    let expected = size.min(2_000 - offset);
                    assert_eq!(page.results.len(), expected);
                    for (i, item) in page.results.iter().enumerate() {
                        assert_eq!(*item.key(), (offset + i) as u64);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.pending_fetches(), 0);
    assert!(cache
        .segments()
        .iter()
        .all(|segment| segment.status != CacheStatus::Fetching));

    // Whatever stayed resident still matches the source, before and after an edit.
    let check = |cache: &WindowedCache<Arc<MemorySource<u32>>>| {
        let snapshot = source.snapshot();
        let start = cache.start_index();
        for (i, cell) in cache.read(start, start + cache.len()).iter().enumerate() {
            if let Some(item) = cell {
                assert_eq!(item.key(), snapshot[start + i].key());
            }
        }
    };
    check(&cache);
    source.remove(0);
    check(&cache);
    assert_eq!(PagedDataSource::is_empty(&source), Emptiness::No);
}
