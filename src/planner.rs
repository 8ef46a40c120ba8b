//! Prefetch/Eviction Planner
//!
//! Runs after every satisfied request, under the state lock. With
//! [`EvictionStrategy::Never`](crate::config::EvictionStrategy::Never) it does
//! nothing. Otherwise it first purges stale segments far from the request,
//! then, if prefetching is enabled and a spawner is available, reserves a
//! background fetch for the segment straddling the leading edge of travel.
//!
//! ```text
//!   direction Up                          direction Down
//!
//!   target  [s ............... e]        [s ............... e]  target
//!   window           [start, end)    [start, end)
//!   gap     [s ...... start)                  [end ...... e]
//! ```
//!
//! The prefetch itself is spawned by the coordinator after the lock is
//! released. Until its task starts, the reservation stays queued in the state
//! where a request overlapping the gap can take it over.

use crate::config::WindowCacheConfig;
use crate::segment::{CacheStatus, FetchDirection};
use crate::source::FetchByOffsetParameters;
use crate::window::State;
use tracing::{debug, trace};

/// A reserved background fetch, ready to be spawned.
pub(crate) struct Prefetch {
    pub(crate) params: FetchByOffsetParameters,
    pub(crate) flight: u64,
}

/// Plans eviction and prefetch for a satisfied request over `[start, end)`.
pub(crate) fn plan<K, D>(
    state: &mut State<K, D>,
    config: &WindowCacheConfig,
    can_spawn: bool,
    start: usize,
    end: usize,
    direction: FetchDirection,
) -> Option<Prefetch> {
    if !config.eviction.evicts() {
        return None;
    }
    evict(state, config, start, end);
    if !config.prefetch {
        return None;
    }
    if !can_spawn {
        trace!("no spawner configured, prefetch skipped");
        return None;
    }
    reserve_prefetch(state, direction, start, end)
}

/// Purges Ready segments that are stale and lie outside the protected zone
/// around `[start, end)`. Returns the number of segments purged.
fn evict<K, D>(
    state: &mut State<K, D>,
    config: &WindowCacheConfig,
    start: usize,
    end: usize,
) -> usize {
    let proximity = state.proximity.unwrap_or(end - start);
    let candidates = state.registry.find_candidates_for_eviction(
        start,
        end,
        proximity,
        config.miss_threshold,
    );
    for segment in &candidates {
        let rows = state.store.purge(segment.start, segment.end + 1);
        state.registry.mark_purged(segment.id());
        state.metrics.record_purge(rows as u64);
        debug!(
            start = segment.start,
            end = segment.end,
            rows,
            misses = segment.miss_count,
            "segment purged"
        );
    }
    candidates.len()
}

fn reserve_prefetch<K, D>(
    state: &mut State<K, D>,
    direction: FetchDirection,
    start: usize,
    end: usize,
) -> Option<Prefetch> {
    let target = state.registry.find_prefetch_target(direction, start, end)?;
    if target.status == CacheStatus::Fetching {
        trace!(
            start = target.start,
            end = target.end,
            "prefetch target already fetching"
        );
        return None;
    }
    let wanted = target.status == CacheStatus::Purged
        || !state.store.is_fully_resident(target.start, target.end + 1);
    if !wanted {
        return None;
    }

    let (gap_start, gap_end) = match direction {
        FetchDirection::Up => (target.start, start),
        FetchDirection::Down => (end, target.end + 1),
    };
    if state.store.is_fully_resident(gap_start, gap_end) {
        return None;
    }
    if state.in_flight.overlaps(gap_start, gap_end) {
        trace!(gap_start, gap_end, "prefetch gap already in flight");
        return None;
    }

    let flight = state.queue_prefetch(gap_start, gap_end);
    state.metrics.prefetches += 1;
    debug!(
        ?direction,
        gap_start,
        gap_end,
        target_start = target.start,
        target_end = target.end,
        "prefetch reserved"
    );
    Some(Prefetch {
        params: FetchByOffsetParameters::new(gap_start, gap_end - gap_start),
        flight,
    })
}
