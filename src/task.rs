//! Shared, multi-awaiter result of an asynchronous computation.
//!
//! A [`SharedTask`] wraps a producing computation in a suspended frame and a
//! result slot. Handles are reference counted: cloning one shares the same
//! frame, and the frame is destroyed exactly once, when the last handle goes
//! away, on whichever thread that happens.
//!
//! # Producing and awaiting
//!
//! ```ignore
//! use coro_executor::{Executor, SharedTask};
//!
//! let executor = Executor::create(2)?;
//! let answer = SharedTask::new(async { 42 });
//!
//! let reader = answer.clone();
//! let printer = SharedTask::new(async move {
//!     let value = reader.await.expect("producer failed");
//!     println!("{value}");
//! });
//!
//! executor.queue_resume(printer.continuation()); // suspends on `answer`
//! executor.queue_resume(answer.continuation());  // completes, wakes `printer`
//! ```
//!
//! # How completion works
//!
//! 1. The producer runs when its continuation is resumed
//! 2. Its output (or error, or panic) is stored in the result slot
//! 3. Every waiter registered at that moment is woken, and only those
//! 4. Awaiters arriving later read the stored outcome without suspending

use crate::error::TaskError;
use crate::frame::{Continuation, Frame};

use futures::FutureExt;
use parking_lot::Mutex;

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::error::Error;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::mem;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};

/// Reference-counted handle to a computation producing a `T`.
///
/// # Type Parameters
///
/// * `T` - The produced value; cloned into every awaiter
///
/// # Internals
///
/// - `frame`: the producer's suspended frame, destroyed with the last handle
/// - `slot`: the outcome plus the waiters registered before completion
pub struct SharedTask<T> {
    inner: Arc<TaskInner<T>>,
}

struct TaskInner<T> {
    frame: Arc<Frame>,
    slot: Arc<ResultSlot<T>>,
}

impl<T> Drop for TaskInner<T> {
    fn drop(&mut self) {
        self.frame.destroy();
    }
}

struct ResultSlot<T> {
    ready: AtomicBool,
    state: Mutex<SlotState<T>>,
}

// Waiters are keyed by registration order so a cancelled awaiter can
// remove itself.
struct SlotState<T> {
    outcome: Option<Result<T, TaskError>>,
    waiters: BTreeMap<usize, Waker>,
    next_waiter: usize,
}

impl<T: Clone> ResultSlot<T> {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            state: Mutex::new(SlotState {
                outcome: None,
                waiters: BTreeMap::new(),
                next_waiter: 0,
            }),
        }
    }

    fn complete(&self, outcome: Result<T, TaskError>) {
        let waiters = {
            let mut state = self.state.lock();
            state.outcome = Some(outcome);
            self.ready.store(true, Ordering::Release);
            mem::take(&mut state.waiters)
        };

        for waiter in waiters.into_values() {
            waiter.wake();
        }
    }

    fn outcome(&self) -> Option<Result<T, TaskError>> {
        self.state.lock().outcome.clone()
    }
}

impl<T> SharedTask<T>
where
    T: Clone + Send + 'static,
{
    /// Wraps `producer` in a new, suspended task. The returned handle is the
    /// only reference.
    ///
    /// A panic inside `producer` is captured and re-raised to every awaiter
    /// as [`TaskError::Panicked`].
    pub fn new<F>(producer: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::from_outcome(async move { Ok(producer.await) })
    }

    /// Like [`SharedTask::new`] for a fallible producer; an `Err` is delivered
    /// to every awaiter as [`TaskError::Failed`].
    pub fn try_new<F, E>(producer: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Error + Send + Sync + 'static,
    {
        Self::from_outcome(async move { producer.await.map_err(TaskError::failed) })
    }

    fn from_outcome<F>(producer: F) -> Self
    where
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let slot = Arc::new(ResultSlot::new());
        let sink = slot.clone();

        let frame = Frame::new(async move {
            let outcome = match AssertUnwindSafe(producer).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(TaskError::from_panic(payload)),
            };
            sink.complete(outcome);
        });

        Self {
            inner: Arc::new(TaskInner { frame, slot }),
        }
    }

    /// Continuation resuming the producer, e.g. for [`Executor::queue_resume`].
    ///
    /// Resuming it after every handle has been dropped does nothing.
    ///
    /// [`Executor::queue_resume`]: crate::Executor::queue_resume
    pub fn continuation(&self) -> Continuation {
        Continuation::from_frame(self.inner.frame.clone())
    }

    /// Resumes the producer on the current thread.
    pub fn resume(&self) {
        self.inner.frame.run();
    }

    /// Returns the outcome without waiting, if the producer has completed.
    pub fn try_get(&self) -> Option<Result<T, TaskError>> {
        if !self.is_ready() {
            return None;
        }
        self.inner.slot.outcome()
    }
}

impl<T> SharedTask<T> {
    /// Whether the producer has stored a value or an error.
    pub fn is_ready(&self) -> bool {
        self.inner.slot.ready.load(Ordering::Acquire)
    }

    /// Number of live handles sharing this task, awaiters included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether both handles share the same frame.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for SharedTask<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for SharedTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTask")
            .field("ready", &self.is_ready())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl<T> IntoFuture for SharedTask<T>
where
    T: Clone + Send + 'static,
{
    type Output = Result<T, TaskError>;
    type IntoFuture = TaskAwait<T>;

    fn into_future(self) -> Self::IntoFuture {
        TaskAwait {
            task: self,
            waiter: None,
        }
    }
}

impl<T> IntoFuture for &SharedTask<T>
where
    T: Clone + Send + 'static,
{
    type Output = Result<T, TaskError>;
    type IntoFuture = TaskAwait<T>;

    /// Awaiting by reference holds its own handle, keeping the task alive
    /// until the outcome is consumed.
    fn into_future(self) -> Self::IntoFuture {
        self.clone().into_future()
    }
}

/// Future resolving to the outcome of a [`SharedTask`].
///
/// Each awaiter receives its own clone of the value or error. Dropping a
/// pending `TaskAwait` deregisters its waker.
#[must_use = "futures do nothing unless awaited"]
pub struct TaskAwait<T> {
    task: SharedTask<T>,
    waiter: Option<usize>,
}

impl<T> Future for TaskAwait<T>
where
    T: Clone + Send + 'static,
{
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let slot = &this.task.inner.slot;

        if slot.ready.load(Ordering::Acquire) {
            return Poll::Ready(completed_outcome(slot));
        }

        let mut state = slot.state.lock();

        // Completion may have happened between the check above and the lock.
        if let Some(outcome) = state.outcome.as_ref() {
            return Poll::Ready(outcome.clone());
        }

        let key = match this.waiter {
            Some(key) => key,
            None => {
                let key = state.next_waiter;
                state.next_waiter += 1;
                this.waiter = Some(key);
                key
            }
        };

        match state.waiters.entry(key) {
            Entry::Occupied(mut entry) => {
                if !entry.get().will_wake(cx.waker()) {
                    entry.insert(cx.waker().clone());
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(cx.waker().clone());
            }
        }

        Poll::Pending
    }
}

impl<T> Drop for TaskAwait<T> {
    fn drop(&mut self) {
        // Deregister an awaiter abandoned before completion.
        if let Some(key) = self.waiter.take() {
            self.task.inner.slot.state.lock().waiters.remove(&key);
        }
    }
}

fn completed_outcome<T: Clone>(slot: &ResultSlot<T>) -> Result<T, TaskError> {
    match slot.outcome() {
        Some(outcome) => outcome,
        None => panic!("SharedTask resumed with neither a value nor an error"),
    }
}

impl<T> fmt::Debug for TaskAwait<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskAwait")
            .field("task", &self.task)
            .field("registered", &self.waiter.is_some())
            .finish()
    }
}
