//! Lock-protected executor state: resume queue, retirement queue and registry.
//!
//! All of it lives behind the executor's single mutex so that a registry entry
//! and the retirement that erases it are always observed together.

use crate::frame::{Continuation, Frame, FrameId};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Unit of work handed to a worker.
pub(crate) enum Job {
    /// Resume a queued continuation.
    Resume(Continuation),
    /// Free a retired frame. `None` when the entry was already gone.
    Retire(FrameId, Option<Arc<Frame>>),
}

/// Everything an executor still holds once its workers are gone.
pub(crate) struct Leftovers {
    pub(crate) continuations: Vec<Continuation>,
    pub(crate) frames: Vec<Arc<Frame>>,
}

pub(crate) struct Queues {
    resume: VecDeque<Continuation>,
    retire: VecDeque<FrameId>,
    registry: HashMap<FrameId, Arc<Frame>>,
    live_workers: usize,
    stop_requested: bool,
    stopped: bool,
}

impl Queues {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            resume: VecDeque::new(),
            retire: VecDeque::new(),
            registry: HashMap::new(),
            live_workers: workers,
            stop_requested: false,
            stopped: false,
        }
    }

    pub(crate) fn push_resume(&mut self, continuation: Continuation) {
        self.resume.push_back(continuation);
    }

    pub(crate) fn push_retire(&mut self, id: FrameId) {
        self.retire.push_back(id);
    }

    pub(crate) fn register(&mut self, id: FrameId, frame: Arc<Frame>) {
        self.registry.insert(id, frame);
    }

    pub(crate) fn registered(&self, id: FrameId) -> Option<&Arc<Frame>> {
        self.registry.get(&id)
    }

    pub(crate) fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// True when a worker has nothing to do and should keep sleeping.
    pub(crate) fn should_wait(&self) -> bool {
        !self.stop_requested && self.resume.is_empty() && self.retire.is_empty()
    }

    /// Pops the next job, preferring resumption over retirement.
    ///
    /// Retiring erases the registry entry here, under the lock; the caller
    /// frees the frame after releasing it. Returns `None` once both queues
    /// are empty, in which case the calling worker exits. The last worker to
    /// exit marks the executor stopped, so nothing can be queued behind it.
    pub(crate) fn next_job(&mut self) -> Option<Job> {
        if let Some(continuation) = self.resume.pop_front() {
            return Some(Job::Resume(continuation));
        }

        let Some(id) = self.retire.pop_front() else {
            self.live_workers = self.live_workers.saturating_sub(1);
            if self.live_workers == 0 {
                self.stopped = true;
            }
            return None;
        };
        let frame = self.registry.remove(&id);

        Some(Job::Retire(id, frame))
    }

    pub(crate) fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    /// Marks the executor as stopped and hands back whatever it still holds.
    ///
    /// Retirement requests are dropped: every registered frame is in
    /// `frames` anyway.
    pub(crate) fn finish_stop(&mut self) -> Leftovers {
        self.stopped = true;
        self.retire.clear();

        Leftovers {
            continuations: self.resume.drain(..).collect(),
            frames: self.registry.drain().map(|(_, frame)| frame).collect(),
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }
}
