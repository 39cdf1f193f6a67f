//! Executor subsystem modules.

pub(crate) mod context;
pub(crate) mod core;
pub(crate) mod queue;
pub(crate) mod waker;
pub mod yield_now;

pub use self::core::{Executor, spawn_managed};
pub use yield_now::{Schedule, yield_now};
