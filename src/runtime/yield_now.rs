use crate::frame::Continuation;
use crate::runtime::context;
use crate::runtime::core::Shared;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

/// Cooperative scheduler hint: suspends once so other work can run.
///
/// The first poll wakes the current computation and returns `Pending`. A
/// computation bound to an executor is re-queued there; an unbound one is
/// resumed again right away.
pub async fn yield_now() {
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            if !self.0 {
                self.0 = true;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            Poll::Ready(())
        }
    }

    YieldOnce(false).await
}

/// Awaitable returned by [`Executor::schedule`].
///
/// Suspends the awaiting computation and queues its continuation on the
/// executor, so it resumes on one of the executor's workers. When awaited
/// inside a frame, the frame is rebound to the executor and later wakes are
/// queued there too, even for a frame registered on another executor. If
/// the executor is gone or stopped it completes immediately on the current
/// thread.
///
/// [`Executor::schedule`]: crate::Executor::schedule
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct Schedule {
    executor: Weak<Shared>,
    queued: bool,
}

impl Schedule {
    pub(crate) fn new(executor: Weak<Shared>) -> Self {
        Self {
            executor,
            queued: false,
        }
    }
}

impl Future for Schedule {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.queued {
            return Poll::Ready(());
        }
        self.queued = true;

        let Some(shared) = self.executor.upgrade() else {
            return Poll::Ready(());
        };

        if !shared.queue_resume(Continuation::from(cx.waker().clone())) {
            return Poll::Ready(());
        }

        // Still inside the frame's poll, so the rebind lands before any wake
        // can hand the frame off.
        if let Some(frame) = context::current_frame() {
            frame.rebind(Arc::downgrade(&shared));
        }

        Poll::Pending
    }
}
