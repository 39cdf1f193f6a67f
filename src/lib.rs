//! Coroutine runtime: a fixed-size worker pool that resumes suspended
//! computations and safely retires their heap frames.
//!
//! A computation is a `Future` boxed into a heap frame. Frames are resumed by
//! worker threads, are never polled by two threads at once, and are destroyed
//! exactly once, whether the last owner is a handle, an executor registry or
//! an executor teardown.
//!
//! # Architecture
//!
//! - **Executor**: worker threads draining a resume queue and a retirement queue
//! - **ManagedCoroutine**: fire-and-forget computation owned by an executor once registered
//! - **SharedTask**: reference-counted result slot awaited by any number of computations
//! - **Continuation**: opaque handle resuming a suspended computation
//! - **Pool**: generic worker group built from a storage and a schedule strategy
//! - **ExecutorBuilder** / **PoolBuilder**: fluent construction with validation

mod builder;
mod error;
mod frame;
mod managed;
pub mod pool;
mod runtime;
mod task;

pub use builder::ExecutorBuilder;
pub use error::{BuildError, TaskError};
pub use frame::{Continuation, FrameId};
pub use managed::{ManagedCoroutine, ManagedState};
pub use runtime::{Executor, Schedule, spawn_managed, yield_now};
pub use task::{SharedTask, TaskAwait};
