//! Generic worker pool composed from a storage and a schedule strategy.
//!
//! The pool decouples where work is held ([`StorageStrategy`]) from which
//! worker receives it ([`ScheduleStrategy`]). [`Pool::schedule`] asks the
//! schedule strategy for a target, pushes the item into storage tagged with
//! that target and unparks the targeted worker, or an idle one when the
//! storage is shared and the target is busy. Each worker pops with its own
//! index as the hint, runs whatever it gets and parks when storage has nothing
//! for it.
//!
//! # Example
//!
//! ```ignore
//! use coro_executor::pool::{CentralizedQueueStrategy, PoolBuilder, RoundRobinStrategy, WorkItem};
//!
//! let pool = PoolBuilder::new()
//!     .threads(4)
//!     .queue_capacity(64)
//!     .build::<CentralizedQueueStrategy, RoundRobinStrategy>()?;
//!
//! pool.schedule(WorkItem::new(coroutine.continuation()));
//! pool.stop();
//! ```

mod schedule;
mod storage;
mod work_item;

pub use schedule::{RoundRobinStrategy, ScheduleStrategy};
pub use storage::{CentralizedQueueStrategy, StorageStrategy};
pub use work_item::WorkItem;

use crate::error::{BuildError, panic_message};
use crate::frame::Continuation;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, Thread};

const DEFAULT_THREAD_NAME: &str = "pool-worker";

struct PoolShared<S, P> {
    storage: S,
    schedule: P,
    // Closed by `stop` before the final drain; pushes happen under the read side.
    accepting: RwLock<bool>,
    stop: AtomicBool,
    idle: Vec<AtomicBool>,
}

impl<S, P> PoolShared<S, P>
where
    S: StorageStrategy,
    P: ScheduleStrategy,
{
    fn worker_loop(&self, index: usize) {
        debug!(worker = index, "pool worker started");
        let idle = &self.idle[index];

        loop {
            if let Some(item) = self.storage.pop(index) {
                run_item(item, index);
                continue;
            }

            if self.stop.load(Ordering::Acquire) {
                break;
            }

            // A push racing with this flag is either popped below or sees us idle and unparks us.
            idle.store(true, Ordering::SeqCst);
            if let Some(item) = self.storage.pop(index) {
                idle.store(false, Ordering::SeqCst);
                run_item(item, index);
                continue;
            }

            if !self.stop.load(Ordering::Acquire) {
                thread::park();
            }
            idle.store(false, Ordering::SeqCst);
        }

        debug!(worker = index, "pool worker exiting");
    }

    // Worker to unpark for an item pushed towards `target`.
    fn wake_target(&self, target: usize) -> usize {
        if !self.storage.is_shared() || self.idle[target].load(Ordering::SeqCst) {
            return target;
        }

        self.idle
            .iter()
            .position(|idle| idle.load(Ordering::SeqCst))
            .unwrap_or(target)
    }
}

fn run_item(item: WorkItem, index: usize) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| item.run())) {
        error!(
            worker = index,
            panic = %panic_message(payload.as_ref()),
            "work item panicked"
        );
    }
}

/// Fixed-size worker group parameterized by storage and placement policies.
///
/// Dropping the pool is equivalent to [`Pool::stop`].
pub struct Pool<S, P>
where
    S: StorageStrategy,
    P: ScheduleStrategy,
{
    shared: Arc<PoolShared<S, P>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    threads: Vec<Thread>,
}

impl<S, P> Pool<S, P>
where
    S: StorageStrategy,
    P: ScheduleStrategy,
{
    /// Creates a pool of `threads` workers with default settings.
    pub fn new(threads: usize) -> Result<Self, BuildError> {
        PoolBuilder::new().threads(threads).build()
    }

    /// Places `item` on the worker picked by the schedule strategy.
    ///
    /// Returns the target worker index, or `None` if the pool is stopped and
    /// the item was dropped. Indices returned by the strategy are reduced
    /// modulo the worker count. An accepted item is guaranteed to run, on a
    /// worker or during [`Pool::stop`].
    ///
    /// With a shared storage, an idle worker is woken when the target is
    /// busy.
    pub fn schedule(&self, item: WorkItem) -> Option<usize> {
        let target = {
            let accepting = self.shared.accepting.read();
            if !*accepting {
                warn!("pool stopped, dropping work item");
                return None;
            }

            let target = self.shared.schedule.next_target() % self.threads.len();
            self.shared.storage.push(item, target);
            target
        };

        self.threads[self.shared.wake_target(target)].unpark();

        Some(target)
    }

    /// Shorthand for scheduling a continuation with an explicit priority.
    pub fn schedule_with_priority(&self, priority: i32, continuation: Continuation) -> Option<usize> {
        self.schedule(WorkItem::with_priority(priority, continuation))
    }

    pub fn threads(&self) -> usize {
        self.threads.len()
    }

    /// Number of items waiting in storage.
    pub fn pending(&self) -> usize {
        self.shared.storage.len()
    }

    pub fn storage(&self) -> &S {
        &self.shared.storage
    }

    pub fn schedule_strategy(&self) -> &P {
        &self.shared.schedule
    }

    /// Whether the calling thread is one of this pool's workers.
    pub fn on_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.threads.iter().any(|thread| thread.id() == current)
    }

    /// Stops the pool, letting workers drain their items before joining them.
    ///
    /// Items that slipped into storage after the workers exited are resumed on
    /// the calling thread. Idempotent.
    ///
    /// # Aborts
    /// Calling this from one of the pool's own workers aborts the process.
    pub fn stop(&self) {
        if self.on_worker_thread() {
            error!("Pool::stop called from its own worker thread, aborting");
            std::process::abort();
        }

        let mut workers = self.workers.lock();
        if workers.is_empty() {
            return;
        }

        // Waits out in-flight pushes; everything accepted is now in storage.
        *self.shared.accepting.write() = false;
        self.shared.stop.store(true, Ordering::Release);
        for thread in &self.threads {
            thread.unpark();
        }

        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("pool worker thread panicked");
            }
        }

        let mut leftovers = 0;
        for index in 0..self.threads.len() {
            while let Some(item) = self.shared.storage.pop(index) {
                run_item(item, index);
                leftovers += 1;
            }
        }

        info!(leftovers, "pool stopped");
    }
}

impl<S, P> Drop for Pool<S, P>
where
    S: StorageStrategy,
    P: ScheduleStrategy,
{
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S, P> fmt::Debug for Pool<S, P>
where
    S: StorageStrategy,
    P: ScheduleStrategy,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("threads", &self.threads.len())
            .field("pending", &self.pending())
            .field("stopped", &self.shared.stop.load(Ordering::Relaxed))
            .finish()
    }
}

/// Builder assembling a [`Pool`] from its strategies.
///
/// # Example
/// ```ignore
/// let pool: Pool<CentralizedQueueStrategy, RoundRobinStrategy> =
///     PoolBuilder::new().threads(2).build()?;
/// ```
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    threads: usize,
    queue_capacity: usize,
    thread_name: String,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolBuilder {
    /// Creates a builder for a single-worker pool with no preallocation.
    pub fn new() -> Self {
        Self {
            threads: 1,
            queue_capacity: 0,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Sets the number of worker threads. Must be at least 1.
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }

    /// Capacity hint passed to [`StorageStrategy::with_capacity`].
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the name prefix of worker threads.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Builds both strategies and spawns the workers.
    ///
    /// # Errors
    /// - [`BuildError::ZeroWorkers`] if the thread count is 0
    /// - any error from [`ScheduleStrategy::for_threads`]
    /// - [`BuildError::Spawn`] if a worker thread could not be spawned
    pub fn build<S, P>(self) -> Result<Pool<S, P>, BuildError>
    where
        S: StorageStrategy,
        P: ScheduleStrategy,
    {
        if self.threads == 0 {
            return Err(BuildError::ZeroWorkers);
        }

        let shared = Arc::new(PoolShared {
            storage: S::with_capacity(self.queue_capacity),
            schedule: P::for_threads(self.threads)?,
            accepting: RwLock::new(true),
            stop: AtomicBool::new(false),
            idle: (0..self.threads).map(|_| AtomicBool::new(false)).collect(),
        });

        let mut workers = Vec::with_capacity(self.threads);
        for index in 0..self.threads {
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.thread_name, index))
                .spawn(move || worker_shared.worker_loop(index));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shared.stop.store(true, Ordering::Release);
                    for handle in workers {
                        handle.thread().unpark();
                        let _ = handle.join();
                    }
                    return Err(BuildError::Spawn(err));
                }
            }
        }

        let threads = workers.iter().map(|handle| handle.thread().clone()).collect();
        info!(threads = self.threads, "pool started");

        Ok(Pool {
            shared,
            workers: Mutex::new(workers),
            threads,
        })
    }
}
