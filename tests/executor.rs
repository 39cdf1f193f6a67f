mod common;

use common::{Latch, init_tracing, tracked, wait_until};
use coro_executor::{BuildError, Executor, ManagedCoroutine, ManagedState, SharedTask, yield_now};

use futures::channel::oneshot;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[test]
fn single_worker_resumes_queued_continuation() {
    init_tracing();
    let executor = Executor::create(1).unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let set = flag.clone();

    let coroutine = ManagedCoroutine::new(async move {
        set.store(true, Ordering::SeqCst);
    });
    executor.queue_resume(coroutine.continuation());

    assert!(wait_until(|| flag.load(Ordering::SeqCst)));
    assert_eq!(coroutine.state(), ManagedState::Completed);
}

#[test]
fn four_workers_resume_twenty_continuations() {
    let executor = Executor::create(4).unwrap();
    let latch = Latch::new(20);

    let coroutines: Vec<_> = (0..20)
        .map(|_| {
            let latch = latch.clone();
            ManagedCoroutine::new(async move { latch.count_down() })
        })
        .collect();

    for coroutine in &coroutines {
        executor.queue_resume(coroutine.continuation());
    }

    assert!(latch.wait(), "{} continuations never ran", latch.count());
}

#[test]
fn zero_workers_is_rejected() {
    assert!(matches!(Executor::create(0), Err(BuildError::ZeroWorkers)));
    assert!(matches!(
        Executor::builder().worker_threads(0).build(),
        Err(BuildError::ZeroWorkers)
    ));
}

#[test]
fn continuations_resume_on_worker_threads() {
    let executor = Executor::builder()
        .worker_threads(2)
        .thread_name("io")
        .build()
        .unwrap();
    assert_eq!(executor.worker_count(), 2);
    assert!(!executor.on_worker_thread());

    let seen = Arc::new(Mutex::new(None));
    let record = seen.clone();
    let latch = Latch::new(1);
    let done = latch.clone();

    let coroutine = ManagedCoroutine::new(async move {
        let current = thread::current();
        *record.lock().unwrap() = Some((current.id(), current.name().map(str::to_owned)));
        done.count_down();
    });
    executor.queue_resume(coroutine.continuation());
    assert!(latch.wait());

    let (id, name) = seen.lock().unwrap().take().unwrap();
    assert_ne!(id, thread::current().id());
    assert!(name.unwrap().starts_with("io-"));
}

#[test]
fn schedule_moves_the_computation_onto_a_worker() {
    let executor = Executor::create(2).unwrap();
    let schedule = executor.schedule();

    let before = Arc::new(Mutex::new(None));
    let after = Arc::new(Mutex::new(None));
    let (b, a) = (before.clone(), after.clone());
    let latch = Latch::new(1);
    let done = latch.clone();

    let coroutine = ManagedCoroutine::new(async move {
        *b.lock().unwrap() = Some(thread::current().id());
        schedule.await;
        *a.lock().unwrap() = Some(thread::current().id());
        done.count_down();
    });

    coroutine.resume();
    assert!(latch.wait());

    assert_eq!(before.lock().unwrap().unwrap(), thread::current().id());
    assert_ne!(after.lock().unwrap().unwrap(), thread::current().id());
}

#[test]
fn schedule_on_a_stopped_executor_continues_inline() {
    let executor = Executor::create(1).unwrap();
    let schedule = executor.schedule();
    executor.stop();

    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let coroutine = ManagedCoroutine::new(async move {
        schedule.await;
        flag.store(true, Ordering::SeqCst);
    });

    coroutine.resume();
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn yielding_computation_is_requeued_until_done() {
    let executor = Executor::create(2).unwrap();
    let yields = Arc::new(AtomicUsize::new(0));
    let counter = yields.clone();
    let latch = Latch::new(1);
    let done = latch.clone();

    executor.add_managed(ManagedCoroutine::new(async move {
        for _ in 0..10 {
            yield_now().await;
            counter.fetch_add(1, Ordering::SeqCst);
        }
        done.count_down();
    }));

    assert!(latch.wait());
    assert_eq!(yields.load(Ordering::SeqCst), 10);
}

#[test]
fn panicking_computation_does_not_take_down_the_worker() {
    let executor = Executor::create(1).unwrap();

    let panicking = ManagedCoroutine::new(async { panic!("boom") });
    executor.queue_resume(panicking.continuation());

    let latch = Latch::new(1);
    let done = latch.clone();
    let healthy = ManagedCoroutine::new(async move { done.count_down() });
    executor.queue_resume(healthy.continuation());

    assert!(latch.wait());
    assert_eq!(panicking.state(), ManagedState::Completed);
}

#[test]
fn stop_is_idempotent_and_drops_later_work() {
    let executor = Executor::create(2).unwrap();
    assert!(!executor.is_stopped());

    executor.stop();
    executor.stop();
    assert!(executor.is_stopped());

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let coroutine = ManagedCoroutine::new(async move {
        flag.store(true, Ordering::SeqCst);
    });
    executor.queue_resume(coroutine.continuation());

    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(coroutine.state(), ManagedState::Created);
}

#[test]
fn stop_drains_queued_continuations_first() {
    let executor = Executor::create(1).unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let coroutines: Vec<_> = (0..50)
        .map(|_| {
            let count = count.clone();
            ManagedCoroutine::new(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for coroutine in &coroutines {
        executor.queue_resume(coroutine.continuation());
    }
    executor.stop();

    assert_eq!(count.load(Ordering::SeqCst), 50);
}

#[test]
fn concurrent_producers_share_one_executor() {
    let executor = Executor::create(4).unwrap();
    let latch = Latch::new(8 * 25);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..25 {
                    let latch = latch.clone();
                    executor.add_managed(ManagedCoroutine::new(async move {
                        yield_now().await;
                        latch.count_down();
                    }));
                }
            });
        }
    });

    assert!(latch.wait(), "{} coroutines never finished", latch.count());
}

fn thread_name() -> String {
    thread::current().name().unwrap_or_default().to_owned()
}

#[test]
fn schedule_moves_a_registered_computation_to_another_executor() {
    let a = Executor::builder().thread_name("exec-a").build().unwrap();
    let b = Executor::builder().thread_name("exec-b").build().unwrap();
    let to_b = b.schedule();

    let names = Arc::new(Mutex::new(Vec::new()));
    let record = names.clone();
    let drops = Arc::new(AtomicUsize::new(0));
    let latch = Latch::new(1);
    let done = latch.clone();

    a.add_managed(ManagedCoroutine::new(tracked(&drops, async move {
        record.lock().unwrap().push(thread_name());
        to_b.await;
        record.lock().unwrap().push(thread_name());
        yield_now().await;
        record.lock().unwrap().push(thread_name());
        done.count_down();
    })));

    assert!(latch.wait());
    assert_eq!(*names.lock().unwrap(), vec!["exec-a-0", "exec-b-0", "exec-b-0"]);

    // Retirement still goes through the registering executor.
    assert!(wait_until(|| drops.load(Ordering::SeqCst) == 1));
    assert!(wait_until(|| a.registered_count() == 0));
}

#[test]
fn wake_racing_stop_still_resumes_the_computation() {
    for _ in 0..200 {
        let executor = Executor::create(2).unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let polled = Arc::new(AtomicBool::new(false));
        let flag = polled.clone();

        let awaiter = SharedTask::new(async move {
            flag.store(true, Ordering::SeqCst);
            let _ = rx.await;
        });
        executor.queue_resume(awaiter.continuation());
        assert!(wait_until(|| polled.load(Ordering::SeqCst)));

        thread::scope(|s| {
            s.spawn(move || tx.send(()).unwrap());
            executor.stop();
        });

        assert!(wait_until(|| awaiter.is_ready()));
    }
}
