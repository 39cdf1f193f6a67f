//! Error types shared by the executor, the pool and shared tasks.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Failure to build an executor, a pool or a placement strategy.
///
/// Configuration mistakes are reported synchronously at construction.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// An executor or pool was asked to run with no worker threads.
    #[error("worker thread count must be greater than 0")]
    ZeroWorkers,

    /// A placement strategy was built for zero target threads.
    #[error("schedule strategy requires at least one thread")]
    ZeroThreads,

    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Failure captured from the computation producing a [`SharedTask`].
///
/// Cloned into every awaiter, so each one re-raises the same failure.
///
/// [`SharedTask`]: crate::SharedTask
#[derive(Clone, thiserror::Error)]
pub enum TaskError {
    /// The producing computation panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The producing computation returned an error.
    #[error("task failed: {0}")]
    Failed(Arc<dyn Error + Send + Sync>),
}

impl TaskError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TaskError::Panicked(panic_message(payload.as_ref()))
    }

    pub(crate) fn failed<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        TaskError::Failed(Arc::new(error))
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Panicked(msg) => f.debug_tuple("Panicked").field(msg).finish(),
            TaskError::Failed(err) => f.debug_tuple("Failed").field(&err.to_string()).finish(),
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
