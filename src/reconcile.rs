//! Mutation Reconciler
//!
//! Keeps the store and the segment registry aligned with the source when it
//! reports structural changes.
//!
//! - `refresh` clears everything.
//! - `remove` (applied first, highest index first): a row below the window
//!   shifts the window down by one; a row inside it is spliced out.
//! - `add` (applied next, lowest index first): a row below the window shifts
//!   it up by one; a row inside it is spliced in; a row at or past the end
//!   only clears the `done` flag.
//! - `update` (applied last) overwrites resident rows in place.
//!
//! Keys are resolved against resident metadata. A structural change that
//! cannot be located is ignored when the window provably starts at row 0 with
//! no holes (the row must lie past the window); otherwise the cache is
//! cleared. Every mutation also bumps the epoch so in-flight fetches issued
//! against the old indexes are not stored.

use crate::entry::Item;
use crate::source::{DataProviderEvent, MutationDetail, MutationEvent, MutationTarget};
use crate::store::RangeStore;
use crate::window::State;
use core::hash::Hash;
use tracing::{debug, trace};

/// A structural change whose position in the window is unknown.
struct Unresolved;

/// Applies a source event to the cache state.
pub(crate) fn apply<K, D>(state: &mut State<K, D>, event: &DataProviderEvent<K, D>)
where
    K: Clone + Eq + Hash,
    D: Clone,
{
    match event {
        DataProviderEvent::Refresh => {
            state.invalidate();
            state.metrics.refreshes += 1;
            debug!("refresh received, cache cleared");
        }
        DataProviderEvent::Mutate(mutation) => {
            state.epoch += 1;
            state.metrics.mutations_applied += 1;
            if apply_mutation(state, mutation).is_err() {
                state.invalidate();
                state.metrics.refreshes += 1;
                debug!("mutation outside the resident rows, cache cleared");
            }
        }
    }
}

fn apply_mutation<K, D>(
    state: &mut State<K, D>,
    mutation: &MutationEvent<K, D>,
) -> Result<(), Unresolved>
where
    K: Clone + Eq + Hash,
    D: Clone,
{
    if let Some(remove) = &mutation.remove {
        remove_rows(state, remove)?;
    }
    if let Some(add) = &mutation.add {
        add_rows(state, add)?;
    }
    if let Some(update) = &mutation.update {
        update_rows(state, update);
    }
    debug!(
        start_index = state.store.start_index(),
        len = state.store.len(),
        "mutation applied"
    );
    Ok(())
}

/// True when every row not resident must lie past the window end.
fn window_is_prefix<K, D>(store: &RangeStore<K, D>) -> bool {
    store.start_index() == 0 && !store.has_holes()
}

fn remove_rows<K, D>(
    state: &mut State<K, D>,
    detail: &MutationDetail<K, D>,
) -> Result<(), Unresolved>
where
    K: Clone + Eq + Hash,
{
    let mut indexes = match &detail.target {
        MutationTarget::Indexes(indexes) => indexes.clone(),
        MutationTarget::Keys(keys) => {
            let positions = state.store.key_positions();
            let prefix = window_is_prefix(&state.store);
            let mut resolved = Vec::with_capacity(keys.len());
            for key in keys {
                match positions.get(key) {
                    Some(&position) => resolved.push(position),
                    None if prefix => {}
                    None => return Err(Unresolved),
                }
            }
            resolved
        }
        MutationTarget::BeforeKeys(keys) if keys.is_empty() => Vec::new(),
        MutationTarget::BeforeKeys(_) => return Err(Unresolved),
    };
    indexes.sort_unstable_by(|a, b| b.cmp(a));
    indexes.dedup();
    for index in indexes {
        remove_index(state, index);
    }
    Ok(())
}

/// Segments are shifted wherever the row falls; purged descriptors may lie
/// past the window end.
fn remove_index<K, D>(state: &mut State<K, D>, index: usize) {
    if index < state.store.start_index() {
        state.store.shift_down();
    } else {
        state.store.remove_at(index);
    }
    state.registry.shift_for_remove(index);
}

fn add_rows<K, D>(
    state: &mut State<K, D>,
    detail: &MutationDetail<K, D>,
) -> Result<(), Unresolved>
where
    K: Clone + Eq,
    D: Clone,
{
    let items = detail.items();
    match &detail.target {
        MutationTarget::Indexes(indexes) => {
            let mut rows: Vec<(usize, Option<Item<K, D>>)> =
                indexes.iter().copied().zip(items).collect();
            rows.sort_by_key(|(index, _)| *index);
            for (index, item) in rows {
                insert_index(state, index, item);
            }
        }
        MutationTarget::Keys(keys) => {
            if keys.is_empty() {
                return Ok(());
            }
            if !state.store.is_empty() {
                return Err(Unresolved);
            }
            state.store.set_done(false);
        }
        MutationTarget::BeforeKeys(before) => {
            for (key, item) in before.iter().zip(items) {
                let Some(key) = key else {
                    // Appended rows land past the window.
                    state.store.set_done(false);
                    continue;
                };
                match state.store.position_of(key) {
                    Some(position) => insert_index(state, position, item),
                    None if window_is_prefix(&state.store) => {}
                    None => return Err(Unresolved),
                }
            }
        }
    }
    Ok(())
}

fn insert_index<K, D>(state: &mut State<K, D>, index: usize, item: Option<Item<K, D>>) {
    if index < state.store.start_index() {
        state.store.shift_up();
        state.registry.shift_for_insert(index);
    } else if index < state.store.end_index() {
        state.store.insert_at(index, item);
        state.registry.shift_for_insert(index);
    } else {
        state.store.set_done(false);
        state.registry.shift_for_insert(index);
    }
}

fn update_rows<K, D>(state: &mut State<K, D>, detail: &MutationDetail<K, D>)
where
    K: Clone + PartialEq,
    D: Clone,
{
    let items = detail.items();
    let positions: Vec<Option<usize>> = match &detail.target {
        MutationTarget::Indexes(indexes) => indexes.iter().copied().map(Some).collect(),
        MutationTarget::Keys(keys) => keys
            .iter()
            .map(|key| state.store.position_of(key))
            .collect(),
        MutationTarget::BeforeKeys(_) => return,
    };
    for (position, item) in positions.into_iter().zip(items) {
        let Some(position) = position else {
            continue;
        };
        if !state.store.replace(position, item) {
            trace!(position, "update outside the window ignored");
        }
    }
}
