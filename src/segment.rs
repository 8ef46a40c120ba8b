//! Cache Segment Registry
//!
//! Tracks which contiguous logical ranges of the store are resident, being
//! fetched, or purged. Each [`Segment`] carries inclusive bounds, a miss
//! counter driving LRU eviction, and a [`CacheStatus`].
//!
//! # Lifecycle
//!
//! ```text
//!                 mark_fetching / reserve
//!   (absent) ─────────────────────────────▶ Fetching
//!                                              │
//!                 complete (rows written)      │      revert (error / cancel)
//!        ┌─────────────────────────────────────┤──────────────────────────────┐
//!        ▼                                     │                              ▼
//!      Ready ◀──── complete (now resident) ── Purged ◀──── purge ──── Ready   absent / Purged
//! ```
//!
//! Segments are kept in registration order. Ready segments that overlap or
//! touch are merged on completion, so the registry holds at most one Ready
//! descriptor per contiguous resident span. With a span limit set, merging
//! stops once the result would grow past it, so a long scroll leaves a trail
//! of bounded segments that can age out one by one. Purged descriptors are
//! never merged; they may overlap Ready ones.

use crate::store::RangeStore;
use core::fmt;

/// Residency state of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Rows are resident in the store.
    Ready,
    /// A fetch covering the segment is in flight.
    Fetching,
    /// Rows were evicted; they still exist upstream.
    Purged,
}

/// Direction of travel between two consecutive requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchDirection {
    /// The new request starts at or before the previous one.
    Up,
    /// The new request starts after the previous one.
    Down,
}

impl FetchDirection {
    /// Derives the direction from the previous and current start offsets.
    /// The very first request counts as moving down.
    pub fn between(previous: Option<usize>, current: usize) -> Self {
        match previous {
            Some(previous) if current > previous => FetchDirection::Down,
            Some(_) => FetchDirection::Up,
            None => FetchDirection::Down,
        }
    }
}

/// A contiguous range of logical offsets, `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    id: u64,
    /// First offset, inclusive.
    pub start: usize,
    /// Last offset, inclusive.
    pub end: usize,
    /// Consecutive requests that did not touch this segment.
    pub miss_count: u32,
    /// Residency state.
    pub status: CacheStatus,
}

impl Segment {
    /// Registry-assigned identifier, stable across shifts.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of offsets covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Segments always cover at least one offset.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// True if the segment shares an offset with `start..=end`.
    #[inline]
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start <= end && start <= self.end
    }

    /// True if the segment overlaps `start..=end` or sits right next to it.
    #[inline]
    pub fn touches(&self, start: usize, end: usize) -> bool {
        self.start <= end.saturating_add(1) && start <= self.end.saturating_add(1)
    }
}

/// Record of a fetch reservation, used to finish or undo it.
///
/// Holds the id of the segment created for the requested span and the prior
/// status of every existing segment that was flipped to `Fetching`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    segment: u64,
    start: usize,
    end: usize,
    touched: Vec<(u64, CacheStatus)>,
}

impl FetchTicket {
    /// Id of the segment created for this fetch.
    #[inline]
    pub fn segment_id(&self) -> u64 {
        self.segment
    }

    /// Requested span, inclusive.
    #[inline]
    pub fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }
}

/// Ordered collection of segment descriptors.
#[derive(Default)]
pub struct SegmentRegistry {
    segments: Vec<Segment>,
    next_id: u64,
    span_limit: Option<usize>,
}

impl SegmentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of offsets a merged Ready segment may cover. `None`
    /// merges without bound.
    pub fn set_span_limit(&mut self, limit: Option<usize>) {
        self.span_limit = limit;
    }

    /// Current merge cap.
    #[inline]
    pub fn span_limit(&self) -> Option<usize> {
        self.span_limit
    }

    /// Drops every segment. Ids keep increasing so stale tickets never match.
    pub fn reset(&mut self) {
        self.segments.clear();
    }

    /// Number of segments.
    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if no segments are registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Looks up a segment by id.
    pub fn get(&self, id: u64) -> Option<&Segment> {
        self.segments.iter().find(|seg| seg.id == id)
    }

    fn get_mut(&mut self, id: u64) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|seg| seg.id == id)
    }

    fn push(&mut self, start: usize, end: usize, status: CacheStatus) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.segments.push(Segment {
            id,
            start,
            end,
            miss_count: 0,
            status,
        });
        id
    }

    /// Reserves `start..=end` for a foreground fetch.
    ///
    /// Every segment overlapping or adjacent to the range that is not already
    /// fetching moves to `Fetching`; every other segment records a miss.
    pub fn mark_fetching(&mut self, start: usize, end: usize) -> FetchTicket {
        for seg in &mut self.segments {
            if !seg.touches(start, end) {
                seg.miss_count = seg.miss_count.saturating_add(1);
            }
        }
        self.reserve(start, end)
    }

    /// Reserves `start..=end` without touching miss counters. Used for
    /// background prefetches, which are not requests.
    pub fn reserve(&mut self, start: usize, end: usize) -> FetchTicket {
        let mut touched = Vec::new();
        for seg in &mut self.segments {
            if seg.touches(start, end) && seg.status != CacheStatus::Fetching {
                touched.push((seg.id, seg.status));
                seg.status = CacheStatus::Fetching;
            }
        }
        let segment = self.push(start, end, CacheStatus::Fetching);
        FetchTicket {
            segment,
            start,
            end,
            touched,
        }
    }

    /// Registers a freshly written span `start..=end` as `Ready` and merges it
    /// with neighbouring Ready segments. Returns the id of the resulting
    /// descriptor.
    pub fn commit(&mut self, start: usize, end: usize) -> u64 {
        let id = self.push(start, end, CacheStatus::Ready);
        self.coalesce(id)
    }

    /// Flips every `Fetching` segment matching `predicate` to `Ready` and
    /// resets its miss counter. Returns how many segments changed.
    pub fn mark_ready<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Segment) -> bool,
    {
        let mut flipped = 0;
        for seg in &mut self.segments {
            if seg.status == CacheStatus::Fetching && predicate(seg) {
                seg.status = CacheStatus::Ready;
                seg.miss_count = 0;
                flipped += 1;
            }
        }
        flipped
    }

    /// Finishes a successful fetch whose rows have been written to `store`.
    ///
    /// `fetched_end` is one past the last offset actually returned, which may
    /// fall short of the reservation when the source ran out of rows.
    pub fn complete<K, D>(
        &mut self,
        ticket: FetchTicket,
        fetched_end: usize,
        store: &RangeStore<K, D>,
    ) {
        if fetched_end <= ticket.start {
            self.segments.retain(|seg| seg.id != ticket.segment);
        } else if let Some(seg) = self.get_mut(ticket.segment) {
            seg.end = seg.end.min(fetched_end - 1);
        }

        let was_ready: Vec<u64> = ticket
            .touched
            .iter()
            .filter(|(_, prior)| *prior == CacheStatus::Ready)
            .map(|(id, _)| *id)
            .collect();
        self.mark_ready(|seg| seg.id == ticket.segment || was_ready.contains(&seg.id));

        for (id, prior) in &ticket.touched {
            if *prior != CacheStatus::Purged {
                continue;
            }
            if let Some(seg) = self.get_mut(*id) {
                if seg.status != CacheStatus::Fetching {
                    continue;
                }
                seg.miss_count = 0;
                seg.status = if store.is_fully_resident(seg.start, seg.end + 1) {
                    CacheStatus::Ready
                } else {
                    CacheStatus::Purged
                };
            }
        }

        self.coalesce_all();
    }

    /// Undoes a reservation after a failed, discarded or cancelled fetch.
    ///
    /// Touched segments get their prior status back. The segment created for
    /// the request becomes `Purged` when `keep_as_purged` is set and is removed
    /// otherwise.
    pub fn revert(&mut self, ticket: FetchTicket, keep_as_purged: bool) {
        for (id, prior) in ticket.touched {
            if let Some(seg) = self.get_mut(id) {
                if seg.status == CacheStatus::Fetching {
                    seg.status = prior;
                }
            }
        }
        if keep_as_purged {
            if let Some(seg) = self.get_mut(ticket.segment) {
                seg.status = CacheStatus::Purged;
                seg.miss_count = 0;
            }
        } else {
            self.segments.retain(|seg| seg.id != ticket.segment);
        }
    }

    /// Updates miss counters for a request served from the store: segments
    /// overlapping `start..=end` reset to zero, every other non-purged segment
    /// records a miss.
    pub fn touch(&mut self, start: usize, end: usize) {
        for seg in &mut self.segments {
            if seg.status == CacheStatus::Purged {
                continue;
            }
            if seg.overlaps(start, end) {
                seg.miss_count = 0;
            } else {
                seg.miss_count = seg.miss_count.saturating_add(1);
            }
        }
    }

    /// Ready segments with at least `miss_threshold` misses lying wholly
    /// outside `[reference_start - proximity, reference_end + proximity]`.
    pub fn find_candidates_for_eviction(
        &self,
        reference_start: usize,
        reference_end: usize,
        proximity: usize,
        miss_threshold: u32,
    ) -> Vec<Segment> {
        let low = reference_start.saturating_sub(proximity);
        let high = reference_end.saturating_add(proximity);
        self.segments
            .iter()
            .filter(|seg| {
                seg.status == CacheStatus::Ready
                    && seg.miss_count >= miss_threshold
                    && (seg.end < low || seg.start > high)
            })
            .copied()
            .collect()
    }

    /// Marks a segment purged. Returns false if it no longer exists.
    pub fn mark_purged(&mut self, id: u64) -> bool {
        match self.get_mut(id) {
            Some(seg) => {
                seg.status = CacheStatus::Purged;
                true
            }
            None => false,
        }
    }

    /// First segment, in registration order, straddling the leading edge of
    /// the window `[start, end)` for the given direction of travel.
    ///
    /// Moving up that is the segment with `seg.start < start < seg.end`;
    /// moving down, the one with `seg.start < end < seg.end`.
    pub fn find_prefetch_target(
        &self,
        direction: FetchDirection,
        start: usize,
        end: usize,
    ) -> Option<Segment> {
        let edge = match direction {
            FetchDirection::Up => start,
            FetchDirection::Down => end,
        };
        self.segments
            .iter()
            .find(|seg| seg.start < edge && edge < seg.end)
            .copied()
    }

    /// Adjusts bounds for a row inserted at logical `index`.
    pub fn shift_for_insert(&mut self, index: usize) {
        for seg in &mut self.segments {
            if seg.start >= index {
                seg.start += 1;
                seg.end += 1;
            } else if seg.end >= index {
                seg.end += 1;
            }
        }
    }

    /// Adjusts bounds for a row removed at logical `index`, dropping segments
    /// that lose their only offset.
    pub fn shift_for_remove(&mut self, index: usize) {
        self.segments.retain_mut(|seg| {
            if seg.start > index {
                seg.start -= 1;
                seg.end -= 1;
                true
            } else if seg.end >= index {
                if seg.start == seg.end {
                    return false;
                }
                seg.end -= 1;
                true
            } else {
                true
            }
        });
    }

    /// Merges the Ready segment `id` with every Ready segment it touches,
    /// as long as the result stays within the span limit. Returns the id of
    /// the surviving descriptor. The merged range keeps the earliest
    /// registration slot.
    fn coalesce(&mut self, id: u64) -> u64 {
        let limit = self.span_limit.unwrap_or(usize::MAX);
        let mut survivor = id;
        loop {
            let Some(idx) = self.segments.iter().position(|seg| seg.id == survivor) else {
                return survivor;
            };
            let current = self.segments[idx];
            let other = self.segments.iter().position(|seg| {
                seg.id != survivor
                    && seg.status == CacheStatus::Ready
                    && seg.touches(current.start, current.end)
                    && seg.end.max(current.end) - seg.start.min(current.start) < limit
            });
            let Some(other) = other else {
                return survivor;
            };
            let (keep, gone) = if other < idx { (other, idx) } else { (idx, other) };
            let absorbed = self.segments.remove(gone);
            let kept = &mut self.segments[keep];
            kept.start = kept.start.min(absorbed.start);
            kept.end = kept.end.max(absorbed.end);
            kept.miss_count = kept.miss_count.min(absorbed.miss_count);
            survivor = kept.id;
        }
    }

    fn coalesce_all(&mut self) {
        let ready: Vec<u64> = self
            .segments
            .iter()
            .filter(|seg| seg.status == CacheStatus::Ready)
            .map(|seg| seg.id)
            .collect();
        for id in ready {
            if self.get(id).is_some() {
                self.coalesce(id);
            }
        }
    }
}

impl fmt::Debug for SegmentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.segments
                    .iter()
                    .map(|seg| (seg.start, seg.end, seg.status, seg.miss_count)),
            )
            .finish()
    }
}
