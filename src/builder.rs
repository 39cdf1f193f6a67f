//! Fluent builder for Executor construction.

use crate::error::BuildError;
use crate::runtime::Executor;

use std::sync::Arc;

const DEFAULT_THREAD_NAME: &str = "coro-worker";

/// Builder for constructing [`Executor`] instances with a fluent API.
///
/// # Example
/// ```ignore
/// let executor = ExecutorBuilder::new()
///     .worker_threads(4)
///     .thread_name("io")
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct ExecutorBuilder {
    worker_threads: usize,
    thread_name: String,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorBuilder {
    /// Creates a builder for a single-worker executor.
    pub fn new() -> Self {
        Self {
            worker_threads: 1,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Sets the number of worker threads. Must be at least 1.
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    /// Sets the name prefix of worker threads; workers are named `<prefix>-<index>`.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Spawns the workers and returns the shared executor handle.
    ///
    /// # Errors
    /// - [`BuildError::ZeroWorkers`] if the worker count is 0
    /// - [`BuildError::Spawn`] if a worker thread could not be spawned
    pub fn build(self) -> Result<Arc<Executor>, BuildError> {
        Executor::start(self.worker_threads, &self.thread_name)
    }
}
