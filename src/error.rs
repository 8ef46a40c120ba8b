//! Error types returned by the windowed cache.

use thiserror::Error;

/// A request that would read or write the store in an inconsistent way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PreconditionError {
    /// A window of zero rows was requested.
    #[error("requested window size must be non-zero")]
    ZeroSize,
    /// A write targeted an offset before the store's start index.
    #[error("offset {offset} lies before the cached window starting at {start_index}")]
    BelowWindow {
        /// Offending offset.
        offset: usize,
        /// Store start index at the time of the write.
        start_index: usize,
    },
    /// A read touched a row that is not resident (purged or never fetched).
    #[error("row at offset {offset} is not resident")]
    NotResident {
        /// First non-resident offset.
        offset: usize,
    },
}

/// Errors surfaced by [`WindowedCache`](crate::WindowedCache).
///
/// `E` is the data source's own error type; upstream failures are propagated
/// verbatim and never retried by the cache.
#[derive(Debug, Error)]
pub enum CacheError<E> {
    /// The data source rejected the request.
    #[error("upstream data source failed")]
    Upstream(#[source] E),
    /// The cache refused to return or store inconsistent data.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
}

impl<E> CacheError<E> {
    /// Returns the upstream error, if this is one.
    pub fn upstream(&self) -> Option<&E> {
        match self {
            CacheError::Upstream(err) => Some(err),
            CacheError::Precondition(_) => None,
        }
    }
}
