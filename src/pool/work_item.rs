use crate::frame::Continuation;

/// A schedulable unit: a priority tag plus the continuation to resume.
///
/// The priority is carried for strategies that want it; the centralized
/// queue ignores it and keeps FIFO order.
#[derive(Debug)]
pub struct WorkItem {
    pub priority: i32,
    pub continuation: Continuation,
}

impl WorkItem {
    /// Creates a work item with the default priority of 0.
    pub fn new(continuation: Continuation) -> Self {
        Self::with_priority(0, continuation)
    }

    pub fn with_priority(priority: i32, continuation: Continuation) -> Self {
        Self {
            priority,
            continuation,
        }
    }

    /// Resumes the carried continuation on the current thread.
    pub fn run(self) {
        self.continuation.resume();
    }
}

impl From<Continuation> for WorkItem {
    fn from(continuation: Continuation) -> Self {
        Self::new(continuation)
    }
}
