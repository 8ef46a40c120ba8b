//! Paged Data Source Contract
//!
//! The windowed cache sits in front of any type implementing
//! [`PagedDataSource`]. A source exposes random access by offset, key lookups,
//! a streamed first-page iteration, a few metadata queries, and an event
//! stream reporting structural changes (`mutate`) and full invalidations
//! (`refresh`).
//!
//! # Events
//!
//! ```text
//!   source ──add_listener──▶ [ListenerSet] ──dispatch──▶ listener.on_event(&event)
//!                                                 │
//!                              DataProviderEvent::Mutate { add, remove, update }
//!                              DataProviderEvent::Refresh
//! ```
//!
//! Each mutation detail addresses rows either by index or by key and may
//! carry parallel `data` / `metadata` for the affected rows.

use crate::entry::{zip_parallel, Item, ItemMetadata};
use async_trait::async_trait;
use core::fmt;
use core::hash::Hash;
use core::sync::atomic::{AtomicU64, Ordering};
use futures::stream::BoxStream;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use std::sync::Arc;

/// Request for `size` rows starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchByOffsetParameters {
    /// Logical offset of the first requested row.
    pub offset: usize,
    /// Number of rows requested.
    pub size: usize,
}

impl FetchByOffsetParameters {
    /// Creates parameters for `[offset, offset + size)`.
    #[inline]
    pub fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    /// One past the last requested offset.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.size)
    }
}

/// Rows returned for an offset request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchByOffsetResults<K, D> {
    /// Rows in order, starting at `fetch_parameters.offset`.
    pub results: Vec<Item<K, D>>,
    /// The request that produced these rows.
    pub fetch_parameters: FetchByOffsetParameters,
    /// Whether the sequence ends after the last returned row.
    pub done: bool,
}

/// Parameters for a streamed iteration from the first row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FetchListParameters {
    /// Rows per page; the source picks when `None`.
    pub size: Option<usize>,
}

/// One page yielded by a `fetch_first` iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchListResult<K, D> {
    /// Rows of this page, following the previous page.
    pub results: Vec<Item<K, D>>,
    /// Whether this is the final page.
    pub done: bool,
}

/// Request addressing rows by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchByKeysParameters<K> {
    /// Keys to look up.
    pub keys: Vec<K>,
}

/// Rows found for a key request.
#[derive(Debug, Clone)]
pub struct FetchByKeysResults<K, D> {
    /// Found rows by key; missing keys are absent.
    pub results: HashMap<K, Item<K, D>>,
    /// The request that produced these rows.
    pub fetch_parameters: FetchByKeysParameters<K>,
}

/// Answer to a `contains_keys` request.
#[derive(Debug, Clone)]
pub struct ContainsKeysResults<K> {
    /// Subset of the requested keys present in the source.
    pub contained_keys: HashSet<K>,
}

/// Whether the source holds any rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emptiness {
    /// The source has no rows.
    Yes,
    /// The source has at least one row.
    No,
    /// The source cannot tell without fetching.
    Unknown,
}

/// Description of an optional source feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability {
    /// How the feature is implemented, e.g. `"randomAccess"`.
    pub implementation: String,
}

impl Capability {
    /// Creates a capability with the given implementation name.
    pub fn new(implementation: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
        }
    }
}

/// How a mutation detail addresses the affected rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationTarget<K> {
    /// Logical indexes. For `add` these are positions after insertion; for
    /// `remove` and `update`, positions before the change.
    Indexes(Vec<usize>),
    /// Row keys. For `add` the position of the new rows is unknown.
    Keys(Vec<K>),
    /// For `add` only: the key of the row each new row is inserted before, or
    /// `None` to append.
    BeforeKeys(Vec<Option<K>>),
}

impl<K> MutationTarget<K> {
    /// Number of addressed rows.
    pub fn len(&self) -> usize {
        match self {
            MutationTarget::Indexes(indexes) => indexes.len(),
            MutationTarget::Keys(keys) => keys.len(),
            MutationTarget::BeforeKeys(keys) => keys.len(),
        }
    }

    /// Returns true when no rows are addressed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One of the `add` / `remove` / `update` parts of a mutate event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationDetail<K, D> {
    /// Affected rows.
    pub target: MutationTarget<K>,
    /// New payloads, parallel to `target`.
    pub data: Option<Vec<D>>,
    /// New metadata, parallel to `target`.
    pub metadata: Option<Vec<ItemMetadata<K>>>,
}

impl<K, D> MutationDetail<K, D> {
    /// Rows at `indexes`, carrying their new contents.
    pub fn at_indexes(indexes: Vec<usize>, items: Vec<Item<K, D>>) -> Self {
        let (data, metadata) = items
            .into_iter()
            .map(|item| (item.data, item.metadata))
            .unzip();
        Self {
            target: MutationTarget::Indexes(indexes),
            data: Some(data),
            metadata: Some(metadata),
        }
    }

    /// Rows at `indexes` with no contents attached.
    pub fn indexes(indexes: Vec<usize>) -> Self {
        Self {
            target: MutationTarget::Indexes(indexes),
            data: None,
            metadata: None,
        }
    }

    /// Rows addressed by key with no contents attached.
    pub fn keys(keys: Vec<K>) -> Self {
        Self {
            target: MutationTarget::Keys(keys),
            data: None,
            metadata: None,
        }
    }

    /// Rows addressed by key, carrying their new contents.
    pub fn keyed_items(items: Vec<Item<K, D>>) -> Self
    where
        K: Clone,
    {
        let keys = items.iter().map(|item| item.key().clone()).collect();
        let (data, metadata) = items
            .into_iter()
            .map(|item| (item.data, item.metadata))
            .unzip();
        Self {
            target: MutationTarget::Keys(keys),
            data: Some(data),
            metadata: Some(metadata),
        }
    }

    /// New rows each inserted before the row keyed by the matching entry of
    /// `before` (`None` appends).
    pub fn before_keys(before: Vec<Option<K>>, items: Vec<Item<K, D>>) -> Self {
        let (data, metadata) = items
            .into_iter()
            .map(|item| (item.data, item.metadata))
            .unzip();
        Self {
            target: MutationTarget::BeforeKeys(before),
            data: Some(data),
            metadata: Some(metadata),
        }
    }

    /// Pairs each target with its new contents, `None` where absent.
    pub fn items(&self) -> Vec<Option<Item<K, D>>>
    where
        K: Clone,
        D: Clone,
    {
        zip_parallel(
            self.target.len(),
            self.data.as_deref(),
            self.metadata.as_deref(),
        )
    }
}

/// Structural changes reported by a source in one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent<K, D> {
    /// Inserted rows.
    pub add: Option<MutationDetail<K, D>>,
    /// Removed rows.
    pub remove: Option<MutationDetail<K, D>>,
    /// Rows changed in place.
    pub update: Option<MutationDetail<K, D>>,
}

impl<K, D> Default for MutationEvent<K, D> {
    fn default() -> Self {
        Self {
            add: None,
            remove: None,
            update: None,
        }
    }
}

/// Notification emitted by a data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataProviderEvent<K, D> {
    /// Rows were added, removed or updated.
    Mutate(MutationEvent<K, D>),
    /// Everything may have changed; drop all cached state.
    Refresh,
}

/// Handle returned by [`PagedDataSource::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wraps a raw id.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Receiver of data source notifications.
pub trait DataProviderListener<K, D>: Send + Sync {
    /// Called synchronously for every dispatched event.
    fn on_event(&self, event: &DataProviderEvent<K, D>);
}

impl<K, D, F> DataProviderListener<K, D> for F
where
    F: Fn(&DataProviderEvent<K, D>) + Send + Sync,
{
    fn on_event(&self, event: &DataProviderEvent<K, D>) {
        self(event)
    }
}

/// Shared, type-erased listener.
pub type SharedListener<K, D> = Arc<dyn DataProviderListener<K, D>>;

/// Listener bookkeeping for source implementations.
///
/// Listeners are invoked outside the internal lock, so a listener may add or
/// remove listeners (or call back into the source) without deadlocking.
pub struct ListenerSet<K, D> {
    listeners: Mutex<Vec<(ListenerId, SharedListener<K, D>)>>,
    next_id: AtomicU64,
}

impl<K, D> Default for ListenerSet<K, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, D> ListenerSet<K, D> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a listener.
    pub fn add(&self, listener: SharedListener<K, D>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Unregisters a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Delivers `event` to every registered listener.
    pub fn dispatch(&self, event: &DataProviderEvent<K, D>) {
        let listeners: Vec<SharedListener<K, D>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Returns true when nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, D> fmt::Debug for ListenerSet<K, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

/// An abstract paged, keyed data source.
///
/// Implementations must be internally synchronized; the cache may call these
/// methods concurrently from several tasks. Listeners must be invoked without
/// holding locks the source's own fetch methods need.
#[async_trait]
pub trait PagedDataSource: Send + Sync + 'static {
    /// Stable row key.
    type Key: Clone + Eq + Hash + Send + Sync + 'static;
    /// Row payload.
    type Data: Clone + Send + Sync + 'static;
    /// Error returned by failed requests.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetches up to `params.size` rows starting at `params.offset`.
    async fn fetch_by_offset(
        &self,
        params: FetchByOffsetParameters,
    ) -> Result<FetchByOffsetResults<Self::Key, Self::Data>, Self::Error>;

    /// Streams the sequence page by page from the first row.
    fn fetch_first(
        &self,
        params: FetchListParameters,
    ) -> BoxStream<'static, Result<FetchListResult<Self::Key, Self::Data>, Self::Error>>;

    /// Fetches rows by key.
    async fn fetch_by_keys(
        &self,
        params: FetchByKeysParameters<Self::Key>,
    ) -> Result<FetchByKeysResults<Self::Key, Self::Data>, Self::Error>;

    /// Reports which of the given keys exist.
    async fn contains_keys(
        &self,
        params: FetchByKeysParameters<Self::Key>,
    ) -> Result<ContainsKeysResults<Self::Key>, Self::Error>;

    /// Total number of rows, `None` when unknown.
    async fn get_total_size(&self) -> Result<Option<usize>, Self::Error>;

    /// Whether the source holds any rows.
    fn is_empty(&self) -> Emptiness;

    /// Looks up an optional feature by name.
    fn get_capability(&self, name: &str) -> Option<Capability>;

    /// Subscribes to mutate/refresh notifications.
    fn add_listener(&self, listener: SharedListener<Self::Key, Self::Data>) -> ListenerId;

    /// Unsubscribes a listener. Returns false if it was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Delivers an event to this source's listeners.
    fn dispatch_event(&self, event: &DataProviderEvent<Self::Key, Self::Data>);
}

/// Lets a source be shared between a cache and whoever edits it.
#[async_trait]
impl<T: PagedDataSource + ?Sized> PagedDataSource for Arc<T> {
    type Key = T::Key;
    type Data = T::Data;
    type Error = T::Error;

    async fn fetch_by_offset(
        &self,
        params: FetchByOffsetParameters,
    ) -> Result<FetchByOffsetResults<Self::Key, Self::Data>, Self::Error> {
        (**self).fetch_by_offset(params).await
    }

    fn fetch_first(
        &self,
        params: FetchListParameters,
    ) -> BoxStream<'static, Result<FetchListResult<Self::Key, Self::Data>, Self::Error>> {
        (**self).fetch_first(params)
    }

    async fn fetch_by_keys(
        &self,
        params: FetchByKeysParameters<Self::Key>,
    ) -> Result<FetchByKeysResults<Self::Key, Self::Data>, Self::Error> {
        (**self).fetch_by_keys(params).await
    }

    async fn contains_keys(
        &self,
        params: FetchByKeysParameters<Self::Key>,
    ) -> Result<ContainsKeysResults<Self::Key>, Self::Error> {
        (**self).contains_keys(params).await
    }

    async fn get_total_size(&self) -> Result<Option<usize>, Self::Error> {
        (**self).get_total_size().await
    }

    fn is_empty(&self) -> Emptiness {
        (**self).is_empty()
    }

    fn get_capability(&self, name: &str) -> Option<Capability> {
        (**self).get_capability(name)
    }

    fn add_listener(&self, listener: SharedListener<Self::Key, Self::Data>) -> ListenerId {
        (**self).add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        (**self).remove_listener(id)
    }

    fn dispatch_event(&self, event: &DataProviderEvent<Self::Key, Self::Data>) {
        (**self).dispatch_event(event)
    }
}
