//! Range Cache Store
//!
//! A dense, growable array of rows addressed by a logical start offset. The
//! store holds one contiguous *window* of the source's row sequence:
//!
//! ```text
//!   logical offsets   0 ... start_index                     end_index
//!                           │                                  │
//!   rows                    [ Some | Some | None | Some | ... ]
//!                              ▲             ▲
//!                           resident      purged / not yet fetched
//! ```
//!
//! A `None` cell means "not resident" (evicted, or a gap between two fetched
//! spans), never "absent from the source". Data and metadata live together in
//! one [`Item`], so the two parallel sequences always have the same length.
//!
//! # Thread Safety
//!
//! The store is a plain data structure. The coordinator keeps it behind its
//! state mutex together with the segment registry.

use crate::entry::Item;
use crate::error::PreconditionError;
use core::fmt;
use core::hash::Hash;
use hashbrown::HashMap;

/// Window of rows held by the cache.
pub struct RangeStore<K, D> {
    rows: Vec<Option<Item<K, D>>>,
    start_index: usize,
    done: bool,
}

impl<K, D> Default for RangeStore<K, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, D> RangeStore<K, D> {
    /// Creates an empty store starting at offset 0.
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            start_index: 0,
            done: false,
        }
    }

    /// Empties the store, rewinds `start_index` to 0 and clears `done`.
    pub fn reset(&mut self) {
        self.rows.clear();
        self.start_index = 0;
        self.done = false;
    }

    /// Logical offset of the first cell.
    #[inline]
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Logical offset one past the last cell.
    #[inline]
    pub fn end_index(&self) -> usize {
        self.start_index + self.rows.len()
    }

    /// Number of cells in the window, resident or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the window holds no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether the source has signalled that the sequence ends at `end_index`.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Overrides the end-of-sequence flag.
    #[inline]
    pub fn set_done(&mut self, done: bool) {
        self.done = done;
    }

    /// Number of non-null cells.
    pub fn resident_rows(&self) -> usize {
        self.rows.iter().filter(|cell| cell.is_some()).count()
    }

    /// Returns true if `offset` addresses a cell inside the window.
    #[inline]
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start_index && offset < self.end_index()
    }

    /// Returns the resident row at `offset`, if any.
    pub fn get(&self, offset: usize) -> Option<&Item<K, D>> {
        if !self.contains(offset) {
            return None;
        }
        self.rows[offset - self.start_index].as_ref()
    }

    /// Returns true if any cell in the window is null.
    pub fn has_holes(&self) -> bool {
        self.rows.iter().any(Option::is_none)
    }

    /// Sets the cell at `offset`, growing the window to the right with holes
    /// when `offset` lies past the end. Writing into an empty store rebases the
    /// window at `offset`.
    pub fn write(
        &mut self,
        offset: usize,
        item: Option<Item<K, D>>,
    ) -> Result<(), PreconditionError> {
        if self.rows.is_empty() {
            self.start_index = offset;
        }
        if offset < self.start_index {
            return Err(PreconditionError::BelowWindow {
                offset,
                start_index: self.start_index,
            });
        }
        let pos = offset - self.start_index;
        if pos >= self.rows.len() {
            self.rows.resize_with(pos + 1, || None);
        }
        self.rows[pos] = item;
        Ok(())
    }

    /// Overwrites the cell at `offset` inside the window. Returns false, and
    /// leaves the store alone, when `offset` is outside it.
    pub fn replace(&mut self, offset: usize, item: Option<Item<K, D>>) -> bool {
        if !self.contains(offset) {
            return false;
        }
        self.rows[offset - self.start_index] = item;
        true
    }

    /// Moves the window start down to `offset`, prepending holes.
    ///
    /// No-op when `offset` is not below the current start.
    pub fn rebase(&mut self, offset: usize) {
        if offset >= self.start_index {
            return;
        }
        if self.rows.is_empty() {
            self.start_index = offset;
            return;
        }
        let pad = self.start_index - offset;
        let mut rows = Vec::with_capacity(pad + self.rows.len());
        rows.resize_with(pad, || None);
        rows.append(&mut self.rows);
        self.rows = rows;
        self.start_index = offset;
    }

    /// Writes a freshly fetched span starting at `offset`.
    ///
    /// When `upstream_done` is set the sequence is known to end right after
    /// the span, so the window is cut (or padded) to that end and marked done.
    /// Returns the number of rows written.
    pub fn write_span<I>(
        &mut self,
        offset: usize,
        items: I,
        upstream_done: bool,
    ) -> Result<usize, PreconditionError>
    where
        I: IntoIterator<Item = Item<K, D>>,
    {
        self.rebase(offset);
        let mut written = 0;
        for item in items {
            self.write(offset + written, Some(item))?;
            written += 1;
        }
        if upstream_done {
            self.set_end(offset + written);
            self.done = true;
        }
        Ok(written)
    }

    /// Resizes the window so that it ends at `end`.
    fn set_end(&mut self, end: usize) {
        if self.rows.is_empty() {
            self.start_index = end;
        } else if end <= self.start_index {
            self.rows.clear();
            self.start_index = end;
        } else {
            self.rows.resize_with(end - self.start_index, || None);
        }
    }

    /// Returns true if every offset in `[start, end)` holds a resident row.
    ///
    /// Once the source is done, offsets at or past `end_index` have no rows
    /// to fetch and count as resident.
    pub fn is_fully_resident(&self, start: usize, end: usize) -> bool {
        self.first_hole(start, end).is_none()
    }

    /// Returns the first offset in `[start, end)` that is not resident.
    pub fn first_hole(&self, start: usize, end: usize) -> Option<usize> {
        let end = if self.done {
            end.min(self.end_index())
        } else {
            end
        };
        if start >= end {
            return None;
        }
        if start < self.start_index {
            return Some(start);
        }
        (start..end).find(|&offset| self.get(offset).is_none())
    }

    /// Inserts a cell at `offset` with `Vec::insert` semantics relative to the
    /// window start. Returns false (and leaves the store untouched) when
    /// `offset` is outside `[start_index, end_index]`.
    pub fn insert_at(&mut self, offset: usize, item: Option<Item<K, D>>) -> bool {
        if offset < self.start_index || offset > self.end_index() {
            return false;
        }
        self.rows.insert(offset - self.start_index, item);
        true
    }

    /// Removes the cell at `offset`, returning it. `None` when `offset` is
    /// outside the window.
    pub fn remove_at(&mut self, offset: usize) -> Option<Option<Item<K, D>>> {
        if !self.contains(offset) {
            return None;
        }
        Some(self.rows.remove(offset - self.start_index))
    }

    /// Shifts the whole window one position to the right, for a row inserted
    /// before it.
    #[inline]
    pub fn shift_up(&mut self) {
        self.start_index += 1;
    }

    /// Shifts the whole window one position to the left, for a row removed
    /// before it. Floors at 0.
    #[inline]
    pub fn shift_down(&mut self) {
        self.start_index = self.start_index.saturating_sub(1);
    }

    /// Nulls out every resident cell in `[start, end)` that lies inside the
    /// window. Returns the number of rows dropped.
    pub fn purge(&mut self, start: usize, end: usize) -> usize {
        let from = start.max(self.start_index);
        let to = end.min(self.end_index());
        if from >= to {
            return 0;
        }
        let mut purged = 0;
        for cell in &mut self.rows[from - self.start_index..to - self.start_index] {
            if cell.take().is_some() {
                purged += 1;
            }
        }
        purged
    }

    /// Returns `[start, end)` as a sequence of cells. Positions outside the
    /// window, purged rows and gaps all come back as `None`.
    pub fn read(&self, start: usize, end: usize) -> Vec<Option<Item<K, D>>>
    where
        K: Clone,
        D: Clone,
    {
        (start..end).map(|offset| self.get(offset).cloned()).collect()
    }

    /// Returns the resident rows of `[start, end)`, failing on the first hole.
    pub fn read_resident(
        &self,
        start: usize,
        end: usize,
    ) -> Result<Vec<Item<K, D>>, PreconditionError>
    where
        K: Clone,
        D: Clone,
    {
        (start..end)
            .map(|offset| {
                self.get(offset)
                    .cloned()
                    .ok_or(PreconditionError::NotResident { offset })
            })
            .collect()
    }
}

impl<K: PartialEq, D> RangeStore<K, D> {
    /// Logical offset of the resident row with `key`.
    pub fn position_of(&self, key: &K) -> Option<usize> {
        self.rows
            .iter()
            .position(|cell| cell.as_ref().is_some_and(|item| item.key() == key))
            .map(|pos| pos + self.start_index)
    }
}

impl<K: Hash + Eq + Clone, D> RangeStore<K, D> {
    /// Builds a key → logical offset index over the resident rows.
    pub fn key_positions(&self) -> HashMap<K, usize> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(pos, cell)| {
                cell.as_ref()
                    .map(|item| (item.key().clone(), pos + self.start_index))
            })
            .collect()
    }
}

impl<K, D> fmt::Debug for RangeStore<K, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeStore")
            .field("start_index", &self.start_index)
            .field("len", &self.rows.len())
            .field("resident", &self.resident_rows())
            .field("done", &self.done)
            .finish()
    }
}
