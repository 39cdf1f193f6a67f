//! Storage strategies: where queued work items are held.
//!
//! A storage strategy is shared by every worker of a [`Pool`]. Pushes carry the
//! index of the worker the schedule strategy picked, and each worker pops with
//! its own index, so a sharded storage can keep per-worker affinity while a
//! centralized one simply ignores the hint.
//!
//! [`Pool`]: crate::pool::Pool

use crate::pool::WorkItem;

use parking_lot::Mutex;

use std::collections::VecDeque;
use std::fmt;

/// Thread-safe holding area for [`WorkItem`]s.
pub trait StorageStrategy: Send + Sync + 'static {
    /// Creates an empty storage, preallocating room for about `capacity` items.
    fn with_capacity(capacity: usize) -> Self
    where
        Self: Sized;

    /// Enqueues `item`; `hint` is the index of the targeted worker.
    fn push(&self, item: WorkItem, hint: usize);

    /// Returns the next item for the worker with index `hint`, if any.
    fn pop(&self, hint: usize) -> Option<WorkItem>;

    /// Number of items currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any worker may pop any item regardless of its hint.
    ///
    /// Shared storages let the pool wake an idle worker when the targeted
    /// one is busy.
    fn is_shared(&self) -> bool {
        false
    }
}

/// A single lock-guarded FIFO queue shared by all workers.
///
/// Placement hints are ignored: any worker pops the oldest item.
pub struct CentralizedQueueStrategy {
    queue: Mutex<VecDeque<WorkItem>>,
}

impl CentralizedQueueStrategy {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }
}

impl Default for CentralizedQueueStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageStrategy for CentralizedQueueStrategy {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn push(&self, item: WorkItem, _hint: usize) {
        self.queue.lock().push_back(item);
    }

    fn pop(&self, _hint: usize) -> Option<WorkItem> {
        self.queue.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }

    fn is_shared(&self) -> bool {
        true
    }
}

impl fmt::Debug for CentralizedQueueStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralizedQueueStrategy")
            .field("len", &self.len())
            .finish()
    }
}
