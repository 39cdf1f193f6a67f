use coro_executor::BuildError;
use coro_executor::pool::{RoundRobinStrategy, ScheduleStrategy};

use proptest::prelude::*;

use std::thread;

#[test]
fn sequential_calls_cycle_through_every_thread() {
    let strategy = RoundRobinStrategy::new(4).unwrap();
    let targets: Vec<_> = (0..9).map(|_| strategy.next_target()).collect();

    assert_eq!(targets, vec![0, 1, 2, 3, 0, 1, 2, 3, 0]);
    assert_eq!(strategy.position(), 1);
    assert_eq!(strategy.threads(), 4);
}

#[test]
fn zero_threads_is_rejected() {
    assert!(matches!(
        RoundRobinStrategy::new(0),
        Err(BuildError::ZeroThreads)
    ));
    assert!(matches!(
        RoundRobinStrategy::for_threads(0),
        Err(BuildError::ZeroThreads)
    ));
}

#[test]
fn concurrent_callers_land_on_the_expected_position() {
    const THREADS: usize = 7;
    const CALLERS: usize = 8;
    const CALLS: usize = 1_000;

    let strategy = RoundRobinStrategy::new(THREADS).unwrap();

    let per_caller: Vec<Vec<usize>> = thread::scope(|s| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| s.spawn(|| (0..CALLS).map(|_| strategy.next_target()).collect::<Vec<_>>()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(strategy.position(), (CALLERS * CALLS) % THREADS);

    // Every index handed out matches a distinct step of one shared counter.
    let mut histogram = [0usize; THREADS];
    for target in per_caller.into_iter().flatten() {
        assert!(target < THREADS);
        histogram[target] += 1;
    }
    let total = CALLERS * CALLS;
    for (index, count) in histogram.iter().enumerate() {
        let expected = total / THREADS + usize::from(index < total % THREADS);
        assert_eq!(*count, expected, "index {index}");
    }
}

proptest! {
    #[test]
    fn targets_repeat_with_period_n(threads in 1usize..32, calls in 0usize..256) {
        let strategy = RoundRobinStrategy::new(threads).unwrap();

        for step in 0..calls {
            prop_assert_eq!(strategy.next_target(), step % threads);
        }
        prop_assert_eq!(strategy.position(), calls % threads);
    }
}
