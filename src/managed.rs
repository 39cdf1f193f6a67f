//! Fire-and-forget computations whose lifetime is owned by an [`Executor`].
//!
//! A [`ManagedCoroutine`] starts suspended. Until it is handed to
//! [`Executor::add_managed`] its creator owns the frame, may resume it by hand
//! and destroys it on drop. Once registered the handle is consumed: the frame
//! lives in the executor's registry, holds only a weak back-reference to the
//! executor, and is destroyed by a worker after it reaches final suspension
//! (or by the executor's teardown, whichever comes first).
//!
//! ```ignore
//! let executor = Executor::create(2)?;
//! let coroutine = ManagedCoroutine::new(async {
//!     yield_now().await;
//!     println!("done");
//! });
//! executor.add_managed(coroutine);
//! ```
//!
//! [`Executor`]: crate::Executor
//! [`Executor::add_managed`]: crate::Executor::add_managed

use crate::frame::{Continuation, Frame, FrameId};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Lifecycle of a managed frame.
///
/// `Running` may be re-entered any number of times from `Registered` (or
/// `Created`, for frames resumed by their creator) before `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagedState {
    /// Suspended, not yet owned by an executor.
    Created,
    /// Owned by an executor and suspended.
    Registered,
    /// Being resumed on some thread.
    Running,
    /// Reached final suspension, waiting for retirement.
    Completed,
    /// Frame freed.
    Destroyed,
}

pub(crate) fn state_of(frame: &Frame) -> ManagedState {
    if frame.is_destroyed() {
        ManagedState::Destroyed
    } else if frame.is_complete() {
        ManagedState::Completed
    } else if frame.is_running() {
        ManagedState::Running
    } else if frame.is_managed() {
        ManagedState::Registered
    } else {
        ManagedState::Created
    }
}

/// Move-only handle to a fire-and-forget computation that has not been
/// registered yet.
pub struct ManagedCoroutine {
    frame: Option<Arc<Frame>>,
}

impl ManagedCoroutine {
    /// Wraps `body` in a new, suspended frame.
    ///
    /// # Example
    /// ```ignore
    /// let coroutine = ManagedCoroutine::new(async { println!("hello") });
    /// assert_eq!(coroutine.state(), ManagedState::Created);
    /// ```
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            frame: Some(Frame::new(body)),
        }
    }

    /// Identity the frame will be registered under.
    pub fn id(&self) -> FrameId {
        self.frame().id()
    }

    pub fn state(&self) -> ManagedState {
        state_of(self.frame())
    }

    /// Continuation resuming this frame, e.g. for [`Executor::queue_resume`].
    ///
    /// The creator still owns the frame: once this handle is dropped,
    /// resuming the continuation does nothing.
    ///
    /// [`Executor::queue_resume`]: crate::Executor::queue_resume
    pub fn continuation(&self) -> Continuation {
        Continuation::from_frame(self.frame().clone())
    }

    /// Resumes the computation on the current thread.
    pub fn resume(&self) {
        self.frame().run();
    }

    pub(crate) fn into_frame(mut self) -> Arc<Frame> {
        // Registration moves ownership out; Drop then sees `None`.
        match self.frame.take() {
            Some(frame) => frame,
            None => unreachable!("managed coroutine handle without a frame"),
        }
    }

    fn frame(&self) -> &Arc<Frame> {
        match &self.frame {
            Some(frame) => frame,
            None => unreachable!("managed coroutine handle without a frame"),
        }
    }
}

impl Drop for ManagedCoroutine {
    fn drop(&mut self) {
        // Never registered: the creator owns the frame.
        if let Some(frame) = self.frame.take() {
            frame.destroy();
        }
    }
}

impl fmt::Debug for ManagedCoroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedCoroutine")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
