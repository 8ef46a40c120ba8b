//! Row Entry Types
//!
//! This module provides the `Item<K, D>` structure exchanged between a data
//! source, the windowed cache and its consumers. Each item pairs a row payload
//! with its per-row metadata, which at minimum carries the row's stable key.
//!
//! # Design Philosophy
//!
//! The data source contract talks about two parallel sequences, `data` and
//! `metadata`. Holding both in one struct keeps them the same length by
//! construction:
//!
//! - **Consistency**: a row can never have data without metadata or vice versa
//! - **Cheap eviction**: the store holds `Option<Item<K, D>>`; `None` marks an
//!   evicted (or not yet fetched) row, not a row absent from the source
//!
//! # Usage Examples
//!
//! ```
//! use window_cache::entry::{Item, ItemMetadata};
//!
//! let item = Item::new(42u64, "forty-two");
//! assert_eq!(item.key(), &42);
//! assert_eq!(item.data, "forty-two");
//!
//! let from_parts = Item::from_parts("forty-two", ItemMetadata::new(42u64));
//! assert_eq!(item, from_parts);
//! ```

/// Per-row metadata supplied by the data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemMetadata<K> {
    /// Stable key identifying the row across fetches and mutations.
    pub key: K,
}

impl<K> ItemMetadata<K> {
    /// Creates metadata for the row identified by `key`.
    #[inline]
    pub fn new(key: K) -> Self {
        Self { key }
    }
}

/// A single row: its payload plus metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<K, D> {
    /// The row payload.
    pub data: D,
    /// Per-row metadata.
    pub metadata: ItemMetadata<K>,
}

impl<K, D> Item<K, D> {
    /// Creates an item from a key and a payload.
    #[inline]
    pub fn new(key: K, data: D) -> Self {
        Self {
            data,
            metadata: ItemMetadata::new(key),
        }
    }

    /// Creates an item from a payload and already-built metadata.
    #[inline]
    pub fn from_parts(data: D, metadata: ItemMetadata<K>) -> Self {
        Self { data, metadata }
    }

    /// Returns the row's key.
    #[inline]
    pub fn key(&self) -> &K {
        &self.metadata.key
    }
}

/// Zips parallel `data` / `metadata` sequences into items.
///
/// Returns `None` for positions where either side is missing, which callers
/// store as a hole to be re-fetched later.
pub(crate) fn zip_parallel<K: Clone, D: Clone>(
    len: usize,
    data: Option<&[D]>,
    metadata: Option<&[ItemMetadata<K>]>,
) -> Vec<Option<Item<K, D>>> {
    (0..len)
        .map(|i| {
            let data = data.and_then(|d| d.get(i))?;
            let metadata = metadata.and_then(|m| m.get(i))?;
            Some(Item::from_parts(data.clone(), metadata.clone()))
        })
        .collect()
}
