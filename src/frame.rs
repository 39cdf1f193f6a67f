//! Heap frames for suspended computations and the continuations that resume them.
//!
//! A [`Frame`] boxes a `Future<Output = ()>` together with an atomic state word.
//! The state word is the only thing deciding who may poll the future and who
//! frees it:
//!
//! - `RUNNING` is claimed by exactly one thread before polling. A resume that
//!   finds it set only records `NOTIFIED`, and the running thread polls again.
//! - `DESTROYED` is set exactly once. If the frame is idle the destroyer drops
//!   the future itself, otherwise the running thread drops it after the poll.
//! - `COMPLETE` marks final suspension. A completed frame keeps its future
//!   until it is destroyed.
//! - `MANAGED` marks a frame owned by an executor registry; its completion
//!   queues retirement instead of waiting for a handle to drop.
//!
//! Wakers handed to the future re-queue the frame on the executor it is bound
//! to, or resume it inline on the waking thread when it is unbound.

use crate::error::panic_message;
use crate::runtime::{context, waker};
use crate::runtime::core::Shared;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

const RUNNING: usize = 1;
const NOTIFIED: usize = 1 << 1;
const SCHEDULED: usize = 1 << 2;
const COMPLETE: usize = 1 << 3;
const DESTROYED: usize = 1 << 4;
const MANAGED: usize = 1 << 5;

/// Identity of a frame, stable for as long as the frame is alive.
///
/// Executors key their registry of owned frames by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(usize);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame-{:#x}", self.0)
    }
}

enum Suspend {
    Repoll,
    Idle,
    Released,
    HandOff(Arc<Shared>),
}

/// Result of a single resumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resumed {
    /// The computation suspended again.
    Suspended,
    /// The computation reached final suspension during this resumption.
    Completed,
    /// Another thread is polling the frame; it will poll again.
    Busy,
    /// The frame had already completed or been destroyed.
    Finished,
}

/// Heap-resident state of a suspended computation.
///
/// `executor` is where wakes are queued. `owner` is the executor whose
/// registry holds a managed frame; it only changes on registration, while
/// `executor` follows [`Executor::schedule`] hand-offs.
///
/// [`Executor::schedule`]: crate::Executor::schedule
pub(crate) struct Frame {
    state: AtomicUsize,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    executor: Mutex<Option<Weak<Shared>>>,
    owner: Mutex<Option<Weak<Shared>>>,
}

impl Frame {
    /// Boxes `future` into a new, suspended frame. Nothing runs until resumed.
    pub(crate) fn new<F>(future: F) -> Arc<Self>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Frame {
            state: AtomicUsize::new(0),
            future: Mutex::new(Some(Box::pin(future))),
            executor: Mutex::new(None),
            owner: Mutex::new(None),
        })
    }

    pub(crate) fn id(self: &Arc<Self>) -> FrameId {
        FrameId(Arc::as_ptr(self) as usize)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) & RUNNING != 0
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state.load(Ordering::Acquire) & COMPLETE != 0
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.state.load(Ordering::Acquire) & DESTROYED != 0
    }

    pub(crate) fn is_managed(&self) -> bool {
        self.state.load(Ordering::Acquire) & MANAGED != 0
    }

    /// Binds the frame to `executor` and marks it as owned by its registry.
    ///
    /// Returns `true` if the frame had already completed, in which case the
    /// caller is responsible for queueing its retirement.
    pub(crate) fn adopt(&self, executor: Weak<Shared>) -> bool {
        *self.owner.lock() = Some(executor.clone());
        *self.executor.lock() = Some(executor);
        let prev = self.state.fetch_or(MANAGED, Ordering::AcqRel);
        prev & COMPLETE != 0
    }

    /// Polls the computation once on the calling thread.
    ///
    /// If another thread is already polling the frame, the resumption is
    /// recorded and acted on by that thread once its poll returns: a frame
    /// bound to a live executor is re-queued there, an unbound one is polled
    /// again inline.
    pub(crate) fn run(self: &Arc<Self>) -> Resumed {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & (COMPLETE | DESTROYED) != 0 {
                return Resumed::Finished;
            }

            let busy = current & RUNNING != 0;
            let next = if busy {
                // The running thread must see our executor before it sees NOTIFIED.
                self.bind_to_current();
                current | NOTIFIED
            } else {
                (current | RUNNING) & !(NOTIFIED | SCHEDULED)
            };

            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) if busy => return Resumed::Busy,
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.bind_to_current();

        let waker = waker::frame_waker(self);
        let mut cx = Context::from_waker(&waker);

        loop {
            if context::enter_frame(self, || self.poll_once(&mut cx)).is_ready() {
                return self.finish();
            }

            match self.suspend() {
                Suspend::Repoll => continue,
                Suspend::Idle => return Resumed::Suspended,
                Suspend::Released => return Resumed::Finished,
                Suspend::HandOff(shared) => {
                    if shared.queue_resume(Continuation::from_frame(self.clone())) {
                        return Resumed::Suspended;
                    }

                    // Executor stopped between the check and the push.
                    self.state.fetch_and(!SCHEDULED, Ordering::AcqRel);
                    return self.run();
                }
            }
        }
    }

    // Leaves the RUNNING state after a pending poll.
    fn suspend(&self) -> Suspend {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & DESTROYED != 0 {
                self.release_destroyed();
                return Suspend::Released;
            }

            let (next, outcome) = if current & NOTIFIED != 0 {
                match self.handoff_target() {
                    Some(shared) => (
                        (current & !(RUNNING | NOTIFIED)) | SCHEDULED,
                        Suspend::HandOff(shared),
                    ),
                    None => (current & !NOTIFIED, Suspend::Repoll),
                }
            } else {
                (current & !RUNNING, Suspend::Idle)
            };

            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return outcome,
                Err(actual) => current = actual,
            }
        }
    }

    /// Requests destruction of the frame.
    ///
    /// Returns `false` if destruction had already been requested. When the
    /// frame is being polled, the polling thread frees it once the poll returns.
    pub(crate) fn destroy(&self) -> bool {
        let prev = self.state.fetch_or(DESTROYED, Ordering::AcqRel);
        if prev & DESTROYED != 0 {
            return false;
        }

        if prev & RUNNING == 0 {
            let future = self.future.lock().take();
            drop(future);
        }

        true
    }

    fn poll_once(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return Poll::Ready(());
        };

        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
            Ok(poll) => poll,
            Err(payload) => {
                // Unhandled panics end the computation; the frame is retired as if it returned.
                error!(
                    panic = %panic_message(payload.as_ref()),
                    "computation panicked, treating it as completed"
                );
                Poll::Ready(())
            }
        }
    }

    fn finish(self: &Arc<Self>) -> Resumed {
        let prev = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current | COMPLETE) & !(RUNNING | NOTIFIED))
            })
            .unwrap_or_else(|current| current);

        if prev & DESTROYED != 0 {
            let future = self.future.lock().take();
            drop(future);
            return Resumed::Finished;
        }

        if prev & MANAGED != 0 {
            self.retire();
        }

        Resumed::Completed
    }

    fn release_destroyed(&self) {
        let future = self.future.lock().take();
        self.state.fetch_and(!(RUNNING | NOTIFIED), Ordering::AcqRel);
        drop(future);
    }

    // Final suspension of a managed frame.
    fn retire(self: &Arc<Self>) {
        let id = self.id();
        let queued = self
            .owner()
            .and_then(|weak| weak.upgrade())
            .is_some_and(|shared| shared.queue_retirement(id));

        if !queued {
            warn!(%id, "owning executor is gone, destroying frame at final suspension");
            self.destroy();
        }
    }

    fn bound_executor(&self) -> Option<Weak<Shared>> {
        self.executor.lock().clone()
    }

    fn owner(&self) -> Option<Weak<Shared>> {
        self.owner.lock().clone()
    }

    /// Moves later wakes of this frame to `executor`, managed or not.
    pub(crate) fn rebind(&self, executor: Weak<Shared>) {
        *self.executor.lock() = Some(executor);
    }

    // Live executor a woken frame is handed back to instead of being repolled.
    fn handoff_target(&self) -> Option<Arc<Shared>> {
        let bound = self.bound_executor()?.upgrade()?;
        bound.is_accepting().then_some(bound)
    }

    // Frames resumed on a worker stay with that worker's executor. Managed
    // frames keep the executor that registered them.
    fn bind_to_current(&self) {
        if self.is_managed() {
            return;
        }

        if let Some(current) = context::current_executor() {
            *self.executor.lock() = Some(current);
        }
    }

    /// Wake path: queue on the bound executor, or resume inline when unbound.
    pub(crate) fn schedule(self: &Arc<Self>) {
        let Some(executor) = self.bound_executor() else {
            self.run();
            return;
        };

        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & (COMPLETE | DESTROYED | SCHEDULED) != 0 {
                return;
            }

            let next = if current & RUNNING != 0 {
                current | NOTIFIED
            } else {
                current | SCHEDULED
            };

            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) if current & RUNNING != 0 => return,
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let accepted = executor
            .upgrade()
            .is_some_and(|shared| shared.queue_resume(Continuation::from_frame(self.clone())));

        if accepted {
            return;
        }

        self.state.fetch_and(!SCHEDULED, Ordering::AcqRel);

        // The owner destroys its managed frames at teardown.
        let owner_alive = self
            .owner()
            .and_then(|weak| weak.upgrade())
            .is_some_and(|shared| shared.is_accepting());

        if self.is_managed() && !owner_alive {
            debug!(id = %self.id(), "ignoring wake for a frame whose executor has stopped");
        } else {
            self.run();
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Anything a worker can resume.
pub(crate) trait Resumable: Send + Sync {
    fn resume(self: Arc<Self>);
}

impl Resumable for Frame {
    fn resume(self: Arc<Self>) {
        self.run();
    }
}

struct WakerResume(Waker);

impl Resumable for WakerResume {
    fn resume(self: Arc<Self>) {
        self.0.wake_by_ref();
    }
}

/// Opaque handle to the resumption point of a suspended computation.
///
/// Resuming runs the computation on the calling thread until it suspends
/// again or completes. Resuming a frame that has already been destroyed is a
/// no-op.
#[derive(Clone)]
pub struct Continuation {
    inner: Arc<dyn Resumable>,
}

impl Continuation {
    pub(crate) fn from_frame(frame: Arc<Frame>) -> Self {
        Self { inner: frame }
    }

    /// Resumes the computation on the current thread.
    pub fn resume(self) {
        self.inner.resume();
    }
}

impl From<Waker> for Continuation {
    /// Wraps a foreign waker; resuming it wakes the waker.
    fn from(waker: Waker) -> Self {
        Self {
            inner: Arc::new(WakerResume(waker)),
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::pin::Pin;
    use std::sync::atomic::AtomicBool;

    struct Flag(Arc<AtomicBool>);

    impl Drop for Flag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn frame_starts_suspended() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let frame = Frame::new(async move {
            r.store(true, Ordering::SeqCst);
        });

        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(frame.run(), Resumed::Completed);
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(frame.run(), Resumed::Finished);
    }

    // Drops its flag only when the future itself is dropped.
    struct Guarded<F> {
        inner: Pin<Box<F>>,
        _flag: Flag,
    }

    impl<F: Future> Future for Guarded<F> {
        type Output = F::Output;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            self.inner.as_mut().poll(cx)
        }
    }

    #[test]
    fn completed_frame_keeps_state_until_destroyed() {
        let dropped = Arc::new(AtomicBool::new(false));
        let frame = Frame::new(Guarded {
            inner: Box::pin(async {}),
            _flag: Flag(dropped.clone()),
        });

        assert_eq!(frame.run(), Resumed::Completed);
        assert!(frame.is_complete());
        assert!(!dropped.load(Ordering::SeqCst));

        assert!(frame.destroy());
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!frame.destroy());
    }

    #[test]
    fn destroy_during_poll_is_deferred_to_the_poller() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = Flag(dropped.clone());
        let slot: Arc<Mutex<Option<Arc<Frame>>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let dropped_inside = Arc::new(AtomicBool::new(true));
        let seen = dropped_inside.clone();
        let flag = dropped.clone();

        let frame = Frame::new(async move {
            let _keep = &guard;
            let me = inner.lock().take();
            if let Some(me) = me {
                assert!(me.destroy());
                seen.store(flag.load(Ordering::SeqCst), Ordering::SeqCst);
            }
            futures::future::pending::<()>().await;
        });
        *slot.lock() = Some(frame.clone());

        assert_eq!(frame.run(), Resumed::Finished);
        assert!(!dropped_inside.load(Ordering::SeqCst));
        assert!(dropped.load(Ordering::SeqCst));
        assert!(frame.is_destroyed());
        assert!(!frame.is_running());
    }

    #[test]
    fn unbound_wake_resumes_inline() {
        let waker_slot: Arc<Mutex<Option<Waker>>> = Arc::new(Mutex::new(None));
        let stash = waker_slot.clone();
        let polls = Arc::new(AtomicUsize::new(0));
        let counted = polls.clone();

        let frame = Frame::new(futures::future::poll_fn(move |cx| {
            if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                *stash.lock() = Some(cx.waker().clone());
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        }));

        assert_eq!(frame.run(), Resumed::Suspended);
        let waker = waker_slot.lock().take().expect("waker registered");
        waker.wake();

        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert!(frame.is_complete());
    }
}
