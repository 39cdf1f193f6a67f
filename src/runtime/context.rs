//! Thread-local executor context for worker threads.
//!
//! Every executor worker runs its loop inside [`enter_context`], which records
//! a non-owning reference to the executor in thread-local storage. Frames
//! resumed on that thread read it to learn which executor they belong to, and
//! [`spawn_managed`] uses it to register new computations without an explicit
//! executor handle. Frames also record themselves while being polled, which
//! lets a [`Schedule`] awaited inside them move them to another executor.
//!
//! # Example
//!
//! ```ignore
//! // `shared` is the executor's `Arc<Shared>`.
//! enter_context(Arc::downgrade(&shared), || {
//!     // ... worker loop ...
//! });
//! ```
//!
//! [`spawn_managed`]: crate::spawn_managed
//! [`Schedule`]: crate::Schedule

use crate::frame::Frame;
use crate::runtime::core::Shared;

use std::cell::RefCell;
use std::sync::{Arc, Weak};

thread_local! {
    /// Executor owning the current worker thread.
    ///
    /// Set by [`enter_context`] for the whole lifetime of a worker loop.
    static CURRENT_EXECUTOR: RefCell<Option<Weak<Shared>>> = const { RefCell::new(None) };

    /// Frame whose future is being polled on this thread, innermost first.
    static CURRENT_FRAME: RefCell<Option<Weak<Frame>>> = const { RefCell::new(None) };
}

/// Runs `function` with `executor` installed as the current executor.
///
/// The previous context is restored on exit, so nested contexts behave.
pub(crate) fn enter_context<F, R>(executor: Weak<Shared>, function: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = CURRENT_EXECUTOR.with(|current| current.borrow_mut().replace(executor));

    let result = function();

    CURRENT_EXECUTOR.with(|current| *current.borrow_mut() = previous);

    result
}

/// Returns the executor whose worker is running the caller, if any.
pub(crate) fn current_executor() -> Option<Weak<Shared>> {
    CURRENT_EXECUTOR.with(|current| current.borrow().clone())
}

/// Runs `function` with `frame` recorded as the frame being polled.
///
/// Inline resumptions nest; the outer frame is restored on exit, including
/// when `function` unwinds.
pub(crate) fn enter_frame<F, R>(frame: &Arc<Frame>, function: F) -> R
where
    F: FnOnce() -> R,
{
    struct Restore(Option<Weak<Frame>>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0.take();
            CURRENT_FRAME.with(|current| *current.borrow_mut() = previous);
        }
    }

    let previous = CURRENT_FRAME.with(|current| current.borrow_mut().replace(Arc::downgrade(frame)));
    let _restore = Restore(previous);

    function()
}

/// Returns the frame being polled on this thread, if any.
pub(crate) fn current_frame() -> Option<Arc<Frame>> {
    CURRENT_FRAME.with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
}
