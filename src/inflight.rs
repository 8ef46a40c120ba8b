//! In-flight fetch table.
//!
//! Every upstream fetch registers its half-open range here before it is
//! issued. A request overlapping a registered range parks on a oneshot
//! receiver instead of issuing its own fetch, and re-checks residency once the
//! leader finishes. Completing (or abandoning) a fetch wakes all of its
//! waiters; a dropped sender wakes them just the same.

use futures::channel::oneshot;
use tracing::trace;

struct PendingFetch {
    id: u64,
    start: usize,
    end: usize,
    waiters: Vec<oneshot::Sender<()>>,
}

#[derive(Default)]
pub(crate) struct InFlight {
    fetches: Vec<PendingFetch>,
    next_id: u64,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `[start, end)` as being fetched and returns its handle.
    pub(crate) fn register(&mut self, start: usize, end: usize) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.fetches.push(PendingFetch {
            id,
            start,
            end,
            waiters: Vec::new(),
        });
        id
    }

    /// True if any registered fetch overlaps `[start, end)`.
    pub(crate) fn overlaps(&self, start: usize, end: usize) -> bool {
        self.fetches
            .iter()
            .any(|fetch| fetch.start < end && start < fetch.end)
    }

    /// Parks on the first registered fetch overlapping `[start, end)`.
    pub(crate) fn wait_for(&mut self, start: usize, end: usize) -> Option<oneshot::Receiver<()>> {
        let fetch = self
            .fetches
            .iter_mut()
            .find(|fetch| fetch.start < end && start < fetch.end)?;
        let (tx, rx) = oneshot::channel();
        fetch.waiters.push(tx);
        trace!(
            start,
            end,
            leader_start = fetch.start,
            leader_end = fetch.end,
            "waiting on in-flight fetch"
        );
        Some(rx)
    }

    /// Removes a fetch and wakes its waiters. Returns how many were woken.
    pub(crate) fn complete(&mut self, id: u64) -> usize {
        let Some(pos) = self.fetches.iter().position(|fetch| fetch.id == id) else {
            return 0;
        };
        let fetch = self.fetches.swap_remove(pos);
        let woken = fetch.waiters.len();
        for waiter in fetch.waiters {
            let _ = waiter.send(());
        }
        woken
    }

    pub(crate) fn len(&self) -> usize {
        self.fetches.len()
    }
}
