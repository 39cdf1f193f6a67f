//! Multi-threaded executor that resumes continuations and retires managed frames.
//!
//! The executor owns a fixed set of worker threads. Each worker sleeps on a
//! condition variable until the resume queue or the retirement queue has work,
//! always prefers resumption, and exits once a stop has been requested and both
//! queues are drained. Frames registered through [`Executor::add_managed`] live
//! in the executor's registry until their retirement is processed, or until the
//! executor tears down.

use crate::builder::ExecutorBuilder;
use crate::error::{BuildError, panic_message};
use crate::frame::{Continuation, Frame, FrameId};
use crate::managed::{self, ManagedCoroutine, ManagedState};
use crate::runtime::context::enter_context;
use crate::runtime::queue::{Job, Leftovers, Queues};
use crate::runtime::yield_now::Schedule;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// State shared between the executor handle, its workers and the frames it owns.
///
/// Frames only ever hold a `Weak` reference to it, so outstanding frames never
/// keep a torn-down executor alive.
pub(crate) struct Shared {
    queues: Mutex<Queues>,
    wake: Condvar,
}

impl Shared {
    fn new(workers: usize) -> Self {
        Self {
            queues: Mutex::new(Queues::new(workers)),
            wake: Condvar::new(),
        }
    }

    /// Enqueues `continuation` and wakes one worker.
    ///
    /// Returns `false` if the executor has already stopped.
    pub(crate) fn queue_resume(&self, continuation: Continuation) -> bool {
        {
            let mut queues = self.queues.lock();
            if queues.is_stopped() {
                return false;
            }
            queues.push_resume(continuation);
        }

        self.wake.notify_one();
        true
    }

    /// Enqueues a registered frame for destruction and wakes one worker.
    pub(crate) fn queue_retirement(&self, id: FrameId) -> bool {
        {
            let mut queues = self.queues.lock();
            if queues.is_stopped() {
                return false;
            }
            queues.push_retire(id);
        }

        self.wake.notify_one();
        true
    }

    pub(crate) fn is_accepting(&self) -> bool {
        !self.queues.lock().is_stopped()
    }

    /// Takes ownership of `frame`, binds it to this executor and queues it.
    pub(crate) fn register(self: &Arc<Self>, frame: Arc<Frame>) -> FrameId {
        let id = frame.id();

        {
            let mut queues = self.queues.lock();

            if queues.is_stopped() {
                drop(queues);
                warn!(%id, "executor already stopped, destroying unregistered frame");
                frame.destroy();
                return id;
            }

            queues.register(id, frame.clone());

            if frame.adopt(Arc::downgrade(self)) {
                queues.push_retire(id);
            } else {
                queues.push_resume(Continuation::from_frame(frame));
            }
        }

        debug!(%id, "registered managed coroutine");
        self.wake.notify_one();
        id
    }

    fn worker_loop(self: Arc<Self>, index: usize) {
        debug!(worker = index, "worker started");

        enter_context(Arc::downgrade(&self), || {
            while let Some(job) = self.next_job() {
                match job {
                    Job::Resume(continuation) => {
                        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| continuation.resume())) {
                            error!(
                                worker = index,
                                panic = %panic_message(payload.as_ref()),
                                "continuation panicked"
                            );
                        }
                    }
                    Job::Retire(id, Some(frame)) => {
                        frame.destroy();
                        debug!(worker = index, %id, "retired managed coroutine");
                    }
                    Job::Retire(id, None) => {
                        debug!(worker = index, %id, "retirement requested for unknown frame");
                    }
                }
            }
        });

        debug!(worker = index, "worker exiting");
    }

    // Blocks until there is work or the executor is stopping with nothing left.
    fn next_job(&self) -> Option<Job> {
        let mut queues = self.queues.lock();
        self.wake.wait_while(&mut queues, |queues| queues.should_wait());
        queues.next_job()
    }

    fn request_stop(&self) {
        self.queues.lock().request_stop();
        self.wake.notify_all();
    }
}

/// Fixed-size pool of worker threads resuming suspended computations.
///
/// Always handed out as an `Arc<Executor>`. Dropping the last handle is
/// equivalent to [`Executor::stop`].
///
/// # Example
/// ```ignore
/// let executor = Executor::create(4)?;
/// executor.add_managed(ManagedCoroutine::new(async {
///     println!("running on a worker");
/// }));
/// executor.stop();
/// ```
pub struct Executor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
}

impl Executor {
    /// Creates an executor with `worker_threads` workers.
    ///
    /// # Errors
    /// [`BuildError::ZeroWorkers`] if `worker_threads` is 0.
    pub fn create(worker_threads: usize) -> Result<Arc<Self>, BuildError> {
        ExecutorBuilder::new().worker_threads(worker_threads).build()
    }

    /// Returns a builder for configuring an executor.
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    pub(crate) fn start(worker_threads: usize, thread_name: &str) -> Result<Arc<Self>, BuildError> {
        if worker_threads == 0 {
            return Err(BuildError::ZeroWorkers);
        }

        let shared = Arc::new(Shared::new(worker_threads));
        let mut workers = Vec::with_capacity(worker_threads);

        for index in 0..worker_threads {
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", thread_name, index))
                .spawn(move || worker_shared.worker_loop(index));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shared.request_stop();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(BuildError::Spawn(err));
                }
            }
        }

        let worker_ids = workers.iter().map(|handle| handle.thread().id()).collect();
        info!(workers = worker_threads, "executor started");

        Ok(Arc::new(Self {
            shared,
            workers: Mutex::new(workers),
            worker_ids,
        }))
    }

    /// Queues `continuation` to be resumed on a worker thread.
    ///
    /// Continuations queued after the executor stopped are dropped.
    pub fn queue_resume(&self, continuation: Continuation) {
        if !self.shared.queue_resume(continuation) {
            warn!("executor stopped, dropping continuation");
        }
    }

    /// Takes ownership of a freshly created managed coroutine.
    ///
    /// The frame is inserted into the registry, bound to this executor and
    /// queued for its first resumption. From here on only the executor
    /// destroys it.
    pub fn add_managed(&self, coroutine: ManagedCoroutine) -> FrameId {
        self.shared.register(coroutine.into_frame())
    }

    /// Queues a registered frame for destruction.
    ///
    /// Ids that are not (or no longer) registered are ignored by the worker
    /// that pops them.
    pub fn queue_retirement(&self, id: FrameId) {
        if !self.shared.queue_retirement(id) {
            warn!(%id, "executor stopped, dropping retirement request");
        }
    }

    /// Returns an awaitable that moves the awaiting computation onto this
    /// executor's workers.
    pub fn schedule(&self) -> Schedule {
        Schedule::new(Arc::downgrade(&self.shared))
    }

    /// Lifecycle state of a registered frame, or `None` once it is retired.
    pub fn managed_state(&self, id: FrameId) -> Option<ManagedState> {
        self.shared
            .queues
            .lock()
            .registered(id)
            .map(|frame| managed::state_of(frame))
    }

    /// Number of frames currently owned by the registry.
    pub fn registered_count(&self) -> usize {
        self.shared.queues.lock().registered_count()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_ids.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.queues.lock().is_stopped()
    }

    /// Whether the calling thread is one of this executor's workers.
    pub fn on_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.worker_ids.contains(&current)
    }

    /// Stops the executor.
    ///
    /// Wakes every worker, lets them drain both queues and joins them. The
    /// last worker to exit closes the queues, so later wakes resume their
    /// computations inline instead of being queued. Anything still queued
    /// is then resumed on the calling thread and every frame still in the
    /// registry is destroyed. Idempotent; concurrent callers return once
    /// teardown is complete.
    ///
    /// # Aborts
    /// Calling this from one of the executor's own workers would join the
    /// calling thread, so the process is aborted instead.
    pub fn stop(&self) {
        if self.on_worker_thread() {
            error!("Executor::stop called from its own worker thread, aborting");
            std::process::abort();
        }

        let mut workers = self.workers.lock();
        if workers.is_empty() && self.is_stopped() {
            return;
        }

        self.shared.request_stop();

        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }

        let Leftovers { continuations, frames } = self.shared.queues.lock().finish_stop();

        let resumed = continuations.len();
        for continuation in continuations {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| continuation.resume())) {
                error!(panic = %panic_message(payload.as_ref()), "continuation panicked during teardown");
            }
        }

        let destroyed = frames.iter().filter(|frame| frame.destroy()).count();

        info!(resumed, destroyed, "executor stopped");
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("workers", &self.worker_ids.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Registers `future` as a managed coroutine on the executor running the caller.
///
/// # Panics
/// Panics if called outside of an executor worker thread.
pub fn spawn_managed<F>(future: F) -> FrameId
where
    F: Future<Output = ()> + Send + 'static,
{
    let shared = crate::runtime::context::current_executor()
        .and_then(|weak| weak.upgrade())
        .expect("spawn_managed() called outside of an executor worker");

    shared.register(ManagedCoroutine::new(future).into_frame())
}
