#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Upper bound for every wait in the test suite.
pub const WAIT: Duration = Duration::from_secs(5);

/// Countdown latch with a bounded wait.
pub struct Latch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        })
    }

    pub fn count_down(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock().unwrap()
    }

    /// Returns true if the count reached zero within [`WAIT`].
    pub fn wait(&self) -> bool {
        let count = self.count.lock().unwrap();
        let (count, _) = self
            .zero
            .wait_timeout_while(count, WAIT, |count| *count > 0)
            .unwrap();
        *count == 0
    }
}

/// Future wrapper counting how many times the wrapped computation is dropped.
///
/// The counter moves only when the frame holding the wrapper is freed, not
/// when the computation returns.
pub struct Tracked<F> {
    inner: Pin<Box<F>>,
    drops: Arc<AtomicUsize>,
}

impl<F: Future> Future for Tracked<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl<F> Drop for Tracked<F> {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn tracked<F: Future>(drops: &Arc<AtomicUsize>, future: F) -> Tracked<F> {
    Tracked {
        inner: Box::pin(future),
        drops: drops.clone(),
    }
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
