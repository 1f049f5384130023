use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use parking_lot::Mutex;

use super::*;
use crate::config::SchedulerConfig;
use crate::test::{self, Counter, FnFuture, Gate};

fn scheduler() -> AsyncScheduler {
    AsyncScheduler::new(&SchedulerConfig {
        workers: 2,
        thread_name: "pipeline-test".into(),
        ..Default::default()
    })
    .unwrap()
}

/// A value that counts how often it was dropped.
struct Droppable(Arc<AtomicUsize>);

impl Drop for Droppable {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn droppable_future(drops: &Arc<AtomicUsize>) -> SharedFuture {
    let drops = Arc::clone(drops);
    FnFuture::new("droppable", move || {
        Present::success(Droppable(Arc::clone(&drops)))
    })
}

#[test]
fn test_dispose_once_after_last_ref() {
    test::setup();
    let scheduler = scheduler();
    let drops = Arc::new(AtomicUsize::new(0));

    let record = AsyncRecord::new(scheduler.handle(), None, droppable_future(&drops));
    let first = AsyncRef::new(&record, "first");
    let second = first.clone();
    assert_eq!(record.refs(), 3);

    record.process_synchronously();
    assert_eq!(record.state(), AsyncState::Completed);
    // the execution reference was released after the (empty) notification
    assert_eq!(record.refs(), 2);
    assert!(first.wait().is_success());

    drop(first);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert!(second.present().is_some());

    drop(second);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(record.is_disposed());
    assert!(record.present().is_none());
}

#[test]
fn test_dispose_hook_runs_once() {
    test::setup();
    let scheduler = scheduler();
    let hooks = Arc::new(AtomicUsize::new(0));

    let record = AsyncRecord::new(
        scheduler.handle(),
        None,
        FnFuture::new("hooked", || Present::success(1_i64)),
    );
    let hook_count = Arc::clone(&hooks);
    record.set_dispose_hook(Box::new(move |record: &AsyncRecord| {
        assert!(record.is_disposed());
        hook_count.fetch_add(1, Ordering::SeqCst);
    }));

    let async_ref = AsyncRef::new(&record, "test");
    record.process_synchronously();
    assert_eq!(hooks.load(Ordering::SeqCst), 0);
    drop(async_ref);
    assert_eq!(hooks.load(Ordering::SeqCst), 1);
}

#[test]
#[should_panic(expected = "reference added after dispose")]
fn test_attach_after_dispose_panics() {
    let scheduler = scheduler();
    let record = AsyncRecord::new(
        scheduler.handle(),
        None,
        FnFuture::new("short-lived", || Present::success(())),
    );
    record.process_synchronously();
    assert!(record.is_disposed());

    let _ = AsyncRef::new(&record, "late");
}

#[test]
#[should_panic(expected = "last reference dropped before completion")]
fn test_dispose_before_completion_panics() {
    let scheduler = scheduler();
    let record = AsyncRecord::new(
        scheduler.handle(),
        None,
        FnFuture::new("never-run", || Present::success(())),
    );
    record.drop_ref();
}

#[test]
fn test_try_new_refuses_disposed() {
    let scheduler = scheduler();
    let record = AsyncRecord::new(
        scheduler.handle(),
        None,
        FnFuture::new("short-lived", || Present::success(())),
    );
    let async_ref = AsyncRef::try_new(&record, "first").unwrap();
    record.process_synchronously();
    drop(async_ref);

    assert!(AsyncRef::try_new(&record, "second").is_none());
}

#[test]
fn test_callbacks_fire_in_order_on_notifier() {
    test::setup();
    let scheduler = scheduler();
    let gate = Gate::new();
    let record = AsyncRecord::new(scheduler.handle(), None, gate.future("gated"));
    let (sender, receiver) = mpsc::channel();

    for i in 0..3 {
        let sender = sender.clone();
        record.add_callback(move |async_ref| {
            let thread = thread::current().name().map(String::from);
            // the present is readable while a callback holds its reference
            let success = async_ref.present().is_some_and(|p| p.is_success());
            sender.send((i, thread, success)).unwrap();
        });
    }

    scheduler.enqueue(&record);
    gate.open();

    let fired: Vec<_> = (0..3).map(|_| receiver.recv().unwrap()).collect();
    for (expected, (i, thread, success)) in fired.into_iter().enumerate() {
        assert_eq!(i, expected);
        assert_eq!(thread.as_deref(), Some("pipeline-test-notify"));
        assert!(success);
    }
}

#[test]
fn test_late_callback_runs_immediately() {
    test::setup();
    let scheduler = scheduler();
    let record = AsyncRecord::new(
        scheduler.handle(),
        None,
        FnFuture::new("done", || Present::success(5_i64)),
    );
    let async_ref = AsyncRef::new(&record, "test");
    record.process_synchronously();

    let caller = thread::current().id();
    let observed = Arc::new(Mutex::new(None));
    {
        let observed = Arc::clone(&observed);
        async_ref.add_callback(move |async_ref| {
            let value = async_ref.present().and_then(|p| p.downcast_ref::<i64>().copied());
            *observed.lock() = Some((thread::current().id(), value));
        });
    }

    assert_eq!(*observed.lock(), Some((caller, Some(5))));
    assert_eq!(record.refs(), 1);
}

#[test]
fn test_panicking_callback_does_not_stop_others() {
    test::setup();
    let scheduler = scheduler();
    let gate = Gate::new();
    let record = AsyncRecord::new(scheduler.handle(), None, gate.future("gated"));
    let (sender, receiver) = mpsc::channel();

    record.add_callback(|_| panic!("callback failed"));
    record.add_callback(move |_| sender.send(()).unwrap());

    scheduler.enqueue(&record);
    gate.open();
    receiver.recv().unwrap();
}

#[test]
fn test_synchronous_claim_loses_to_scheduler() {
    test::setup();
    let scheduler = AsyncScheduler::new(&SchedulerConfig {
        workers: 1,
        ..Default::default()
    })
    .unwrap();
    let gate = Gate::new();
    let blocker = AsyncRecord::new(scheduler.handle(), None, gate.future("blocker"));
    scheduler.enqueue(&blocker);
    gate.wait_entered();

    let realized = Counter::new();
    let record = AsyncRecord::new(scheduler.handle(), None, realized.future("contested"));
    let async_ref = AsyncRef::new(&record, "test");
    assert!(scheduler.enqueue(&record));

    // already claimed by the scheduler, so this returns without running
    record.process_synchronously();
    assert_eq!(realized.count(), 0);
    assert_eq!(record.state(), AsyncState::Queued);

    gate.open();
    assert_eq!(
        async_ref.wait().downcast_ref::<&str>(),
        Some(&"contested")
    );
    assert_eq!(realized.count(), 1);
}

#[test]
fn test_priority_is_frozen_after_completion() {
    let scheduler = scheduler();
    let record = AsyncRecord::new(
        scheduler.handle(),
        None,
        FnFuture::new("done", || Present::success(())),
    );
    let _async_ref = AsyncRef::new(&record, "test");

    record.change_priority(3);
    record.process_synchronously();
    record.change_priority(4);
    assert_eq!(record.priority(), 3);
}

#[test]
fn test_priority_saturates() {
    let scheduler = scheduler();
    let record = AsyncRecord::new(
        scheduler.handle(),
        None,
        FnFuture::new("extreme", || Present::success(())),
    );
    let _async_ref = AsyncRef::new(&record, "test");

    record.change_priority(i32::MAX);
    record.change_priority(1);
    assert_eq!(record.priority(), i32::MAX);

    record.change_priority(i32::MIN);
    record.change_priority(i32::MIN);
    assert_eq!(record.priority(), i32::MIN);

    record.process_synchronously();
}

#[test]
fn test_failure_is_shared() {
    test::setup();
    let scheduler = scheduler();
    let record = AsyncRecord::new(
        scheduler.handle(),
        None,
        FnFuture::new("broken", || {
            Present::failure(anyhow::anyhow!("no such document"))
        }),
    );
    let first = AsyncRef::new(&record, "first");
    let second = AsyncRef::new(&record, "second");
    record.process_synchronously();

    for async_ref in [&first, &second] {
        let err = async_ref.wait().into_result().unwrap_err();
        assert_eq!(err.to_string(), "computation failed: no such document");
    }
}

#[test]
fn test_asynchronizer_returns_ref() {
    test::setup();
    let scheduler = scheduler();
    let realized = Counter::new();
    let asynchronizer = Asynchronizer::new(scheduler.handle(), realized.future("inner"));

    let present = asynchronizer.realize("test");
    let async_ref = present.as_async_ref().unwrap();
    assert_eq!(async_ref.credit(), "Asynchronizer");
    assert_eq!(
        async_ref.wait().downcast_ref::<&str>(),
        Some(&"inner")
    );
    assert_eq!(realized.count(), 1);
}

#[test]
fn test_asynchronizer_hash() {
    let scheduler = scheduler();
    let inner = ConstantFuture::shared(5_i64);
    let asynchronizer = Asynchronizer::new(scheduler.handle(), Arc::clone(&inner));

    let key = asynchronizer.robust_hash();
    assert_ne!(key, inner.robust_hash());
    assert_eq!(
        key.metadata(),
        format!("Asynchronizer\ninner: {}\n", inner.robust_hash().hex())
    );

    // the scheduler is not part of the identity
    let other = scheduler_with_name("other");
    assert_eq!(
        key,
        Asynchronizer::new(other.handle(), inner).robust_hash()
    );
}

fn scheduler_with_name(name: &str) -> AsyncScheduler {
    AsyncScheduler::new(&SchedulerConfig {
        workers: 1,
        thread_name: name.into(),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_completion_resolves() {
    test::setup();
    let scheduler = scheduler();
    let gate = Gate::new();
    let asynchronizer = Asynchronizer::new(scheduler.handle(), gate.future("awaited"));

    let present = asynchronizer.realize("test");
    let async_ref = present.as_async_ref().unwrap().duplicate("awaiter");
    let completion = async_ref.completion();
    gate.open();

    let completed = completion.await.unwrap();
    assert_eq!(completed.credit(), "callback");
    assert!(completed.present().unwrap().is_success());
}
