//! Schedule strategies: which worker a new work item targets.

use crate::error::BuildError;

use std::sync::atomic::{AtomicUsize, Ordering};

/// Placement policy picking the worker that receives the next item.
pub trait ScheduleStrategy: Send + Sync + 'static {
    /// Creates the policy for a pool of `threads` workers.
    fn for_threads(threads: usize) -> Result<Self, BuildError>
    where
        Self: Sized;

    /// Index of the worker that should receive the next item, in `0..threads`.
    fn next_target(&self) -> usize;
}

/// Cycles through workers `0, 1, ..., n - 1, 0, ...`.
///
/// The counter is advanced atomically and kept reduced modulo the thread
/// count, so concurrent callers each get a valid index and the counter never
/// overflows. Which caller gets which index is unordered.
#[derive(Debug)]
pub struct RoundRobinStrategy {
    threads: usize,
    next: AtomicUsize,
}

impl RoundRobinStrategy {
    /// Creates a round-robin policy over `threads` workers.
    ///
    /// # Errors
    /// [`BuildError::ZeroThreads`] if `threads` is 0.
    pub fn new(threads: usize) -> Result<Self, BuildError> {
        if threads == 0 {
            return Err(BuildError::ZeroThreads);
        }

        Ok(Self {
            threads,
            next: AtomicUsize::new(0),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Index the next call to [`ScheduleStrategy::next_target`] will return.
    pub fn position(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }
}

impl ScheduleStrategy for RoundRobinStrategy {
    fn for_threads(threads: usize) -> Result<Self, BuildError> {
        Self::new(threads)
    }

    fn next_target(&self) -> usize {
        let threads = self.threads;
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some((n + 1) % threads)
            })
            .unwrap_or_else(|n| n)
    }
}
