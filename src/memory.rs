//! In-Memory Data Source
//!
//! [`MemorySource`] implements [`PagedDataSource`] over a `Vec` held behind a
//! mutex. Rows get sequential `u64` keys. Structural edits go through
//! [`insert`](MemorySource::insert), [`remove`](MemorySource::remove),
//! [`update`](MemorySource::update) and [`replace`](MemorySource::replace),
//! each of which notifies listeners after the lock is released.
//!
//! # Examples
//!
//! ```
//! use window_cache::{MemorySource, PagedDataSource, FetchByOffsetParameters};
//! use futures::executor::block_on;
//!
//! let source = MemorySource::from_rows(vec!["a", "b", "c"]);
//! let page = block_on(source.fetch_by_offset(FetchByOffsetParameters::new(1, 5))).unwrap();
//! assert_eq!(page.results.len(), 2);
//! assert!(page.done);
//! assert_eq!(source.fetch_count(), 1);
//! ```

use crate::entry::Item;
use crate::source::{
    Capability, ContainsKeysResults, DataProviderEvent, Emptiness, FetchByKeysParameters,
    FetchByKeysResults, FetchByOffsetParameters, FetchByOffsetResults, FetchListParameters,
    FetchListResult, ListenerId, ListenerSet, MutationDetail, MutationEvent, PagedDataSource,
    SharedListener,
};
use async_trait::async_trait;
use core::convert::Infallible;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use futures::stream::{self, BoxStream, StreamExt};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

/// Page size used by `fetch_first` when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Capability name reported by [`MemorySource`].
pub const RANDOM_ACCESS: &str = "randomAccess";

struct Rows<D> {
    items: Vec<Item<u64, D>>,
    next_key: u64,
}

impl<D> Rows<D> {
    fn from_data(data: Vec<D>) -> Self {
        let items: Vec<Item<u64, D>> = data
            .into_iter()
            .enumerate()
            .map(|(key, data)| Item::new(key as u64, data))
            .collect();
        let next_key = items.len() as u64;
        Self { items, next_key }
    }

    fn next_item(&mut self, data: D) -> Item<u64, D> {
        let item = Item::new(self.next_key, data);
        self.next_key += 1;
        item
    }
}

/// A paged data source over an in-memory row list.
pub struct MemorySource<D> {
    rows: Mutex<Rows<D>>,
    listeners: ListenerSet<u64, D>,
    fetches: AtomicUsize,
    page_size: usize,
}

impl<D: Clone + Send + Sync + 'static> Default for MemorySource<D> {
    fn default() -> Self {
        Self::from_rows(Vec::new())
    }
}

impl<D: Clone + Send + Sync + 'static> MemorySource<D> {
    /// Creates a source whose row `i` holds `rows[i]` under key `i`.
    pub fn from_rows(rows: Vec<D>) -> Self {
        Self {
            rows: Mutex::new(Rows::from_data(rows)),
            listeners: ListenerSet::new(),
            fetches: AtomicUsize::new(0),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the default page size for `fetch_first`. Zero is ignored.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        if page_size > 0 {
            self.page_size = page_size;
        }
        self
    }

    /// Current number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.lock().items.len()
    }

    /// Copy of every row in order.
    pub fn snapshot(&self) -> Vec<Item<u64, D>> {
        self.rows.lock().items.clone()
    }

    /// Number of `fetch_by_offset` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Inserts a row at `index` (clamped to the end) and returns its key.
    pub fn insert(&self, index: usize, data: D) -> u64 {
        let (index, item) = {
            let mut rows = self.rows.lock();
            let index = index.min(rows.items.len());
            let item = rows.next_item(data);
            rows.items.insert(index, item.clone());
            (index, item)
        };
        let key = *item.key();
        self.notify(MutationEvent {
            add: Some(MutationDetail::at_indexes(vec![index], vec![item])),
            ..MutationEvent::default()
        });
        key
    }

    /// Appends a row and returns its key.
    pub fn push(&self, data: D) -> u64 {
        self.insert(usize::MAX, data)
    }

    /// Removes the row at `index`.
    pub fn remove(&self, index: usize) -> Option<Item<u64, D>> {
        let removed = {
            let mut rows = self.rows.lock();
            if index >= rows.items.len() {
                return None;
            }
            rows.items.remove(index)
        };
        self.notify(MutationEvent {
            remove: Some(MutationDetail::indexes(vec![index])),
            ..MutationEvent::default()
        });
        Some(removed)
    }

    /// Replaces the payload of the row at `index`, keeping its key.
    pub fn update(&self, index: usize, data: D) -> bool {
        let item = {
            let mut rows = self.rows.lock();
            let Some(row) = rows.items.get_mut(index) else {
                return false;
            };
            row.data = data;
            row.clone()
        };
        self.notify(MutationEvent {
            update: Some(MutationDetail::at_indexes(vec![index], vec![item])),
            ..MutationEvent::default()
        });
        true
    }

    /// Swaps in a whole new row list and signals a refresh.
    pub fn replace(&self, rows: Vec<D>) {
        {
            let mut current = self.rows.lock();
            let first_key = current.next_key;
            current.items = rows
                .into_iter()
                .enumerate()
                .map(|(i, data)| Item::new(first_key + i as u64, data))
                .collect();
            current.next_key = first_key + current.items.len() as u64;
        }
        self.listeners.dispatch(&DataProviderEvent::Refresh);
    }

    fn notify(&self, event: MutationEvent<u64, D>) {
        self.listeners.dispatch(&DataProviderEvent::Mutate(event));
    }
}

#[async_trait]
impl<D: Clone + Send + Sync + 'static> PagedDataSource for MemorySource<D> {
    type Key = u64;
    type Data = D;
    type Error = Infallible;

    async fn fetch_by_offset(
        &self,
        params: FetchByOffsetParameters,
    ) -> Result<FetchByOffsetResults<u64, D>, Infallible> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock();
        let len = rows.items.len();
        let start = params.offset.min(len);
        let end = params.end().min(len);
        Ok(FetchByOffsetResults {
            results: rows.items[start..end].to_vec(),
            fetch_parameters: params,
            done: params.end() >= len,
        })
    }

    fn fetch_first(
        &self,
        params: FetchListParameters,
    ) -> BoxStream<'static, Result<FetchListResult<u64, D>, Infallible>> {
        let page_size = params.size.filter(|&size| size > 0).unwrap_or(self.page_size);
        let items = self.snapshot();
        let mut pages: Vec<Result<FetchListResult<u64, D>, Infallible>> = items
            .chunks(page_size)
            .map(|chunk| {
                Ok(FetchListResult {
                    results: chunk.to_vec(),
                    done: false,
                })
            })
            .collect();
        match pages.last_mut() {
            Some(Ok(last)) => last.done = true,
            _ => pages.push(Ok(FetchListResult {
                results: Vec::new(),
                done: true,
            })),
        }
        stream::iter(pages).boxed()
    }

    async fn fetch_by_keys(
        &self,
        params: FetchByKeysParameters<u64>,
    ) -> Result<FetchByKeysResults<u64, D>, Infallible> {
        let wanted: HashSet<u64> = params.keys.iter().copied().collect();
        let results: HashMap<u64, Item<u64, D>> = self
            .rows
            .lock()
            .items
            .iter()
            .filter(|item| wanted.contains(item.key()))
            .map(|item| (*item.key(), item.clone()))
            .collect();
        Ok(FetchByKeysResults {
            results,
            fetch_parameters: params,
        })
    }

    async fn contains_keys(
        &self,
        params: FetchByKeysParameters<u64>,
    ) -> Result<ContainsKeysResults<u64>, Infallible> {
        let rows = self.rows.lock();
        let contained_keys = params
            .keys
            .into_iter()
            .filter(|key| rows.items.iter().any(|item| item.key() == key))
            .collect();
        Ok(ContainsKeysResults { contained_keys })
    }

    async fn get_total_size(&self) -> Result<Option<usize>, Infallible> {
        Ok(Some(self.row_count()))
    }

    fn is_empty(&self) -> Emptiness {
        if self.row_count() == 0 {
            Emptiness::Yes
        } else {
            Emptiness::No
        }
    }

    fn get_capability(&self, name: &str) -> Option<Capability> {
        (name == RANDOM_ACCESS).then(|| Capability::new("memory"))
    }

    fn add_listener(&self, listener: SharedListener<u64, D>) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn dispatch_event(&self, event: &DataProviderEvent<u64, D>) {
        self.listeners.dispatch(event)
    }
}

impl<D> fmt::Debug for MemorySource<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("rows", &self.rows.lock().items.len())
            .field("listeners", &self.listeners)
            .field("fetches", &self.fetches.load(Ordering::Relaxed))
            .field("page_size", &self.page_size)
            .finish()
    }
}
