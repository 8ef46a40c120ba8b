//! Deterministic Background Executor
//!
//! [`TaskQueue`] implements [`futures::task::Spawn`] by queueing spawned
//! futures until [`run_until_idle`](TaskQueue::run_until_idle) drains them in
//! FIFO order. Handing one to [`WindowedCache::init`](crate::WindowedCache::init)
//! makes background prefetches run exactly when the caller decides, which is
//! what the tests and the simulator need.
//!
//! Queued tasks are driven with `futures::executor::block_on`, so
//! `run_until_idle` must not be called from inside another `block_on`.

use core::fmt;
use futures::executor::block_on;
use futures::task::{FutureObj, Spawn, SpawnError};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// FIFO queue of spawned futures.
#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<FutureObj<'static, ()>>>,
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Runs queued tasks to completion, including any they spawn, until the
    /// queue is empty. Returns how many tasks ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.tasks.lock().pop_front();
            let Some(task) = next else {
                return ran;
            };
            block_on(task);
            ran += 1;
        }
    }

    /// Drops every queued task without running it. Returns how many were
    /// dropped.
    pub fn clear(&self) -> usize {
        let dropped: VecDeque<_> = core::mem::take(&mut *self.tasks.lock());
        dropped.len()
    }
}

impl Spawn for TaskQueue {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        self.tasks.lock().push_back(future);
        Ok(())
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("queued", &self.len())
            .finish()
    }
}
