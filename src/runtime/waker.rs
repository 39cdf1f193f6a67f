//! Waker implementation for suspended frames.
//!
//! The waker handed to a frame's future is the frame itself: waking it takes
//! the frame's wake path, which re-queues it on its bound executor or resumes
//! it inline when the frame has no executor.

use crate::frame::Frame;

use futures::task::{ArcWake, WakerRef, waker_ref};

use std::sync::Arc;

impl ArcWake for Frame {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.schedule();
    }
}

/// Borrows a [`Waker`](std::task::Waker) for `frame` without bumping its
/// reference count; clones taken by the future hold their own reference.
pub(crate) fn frame_waker(frame: &Arc<Frame>) -> WakerRef<'_> {
    waker_ref(frame)
}
