use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use presently_service::pipeline::{AsyncState, Future};
use presently_test::{self as test, Counted, CountingFuture, GatedFuture};

use crate::utils::{default_package, package};

#[tokio::test(flavor = "multi_thread")]
async fn test_asynchronous_future_completes() {
    test::setup();
    let package = default_package();
    let future = CountingFuture::new("answer", 42);

    let present = package
        .get_asynchronous_future(future.shared())
        .realize("test");
    let async_ref = present.as_async_ref().unwrap();
    let completed = async_ref.completion().await.unwrap();

    assert_eq!(completed.record().state(), AsyncState::Completed);
    let value = completed.wait().into_typed::<Counted>().unwrap();
    assert_eq!(value.value, 42);
    assert_eq!(future.realized(), 1);
}

#[test]
fn test_asynchronous_futures_are_deduplicated() {
    test::setup();
    let package = default_package();
    let future = CountingFuture::new("answer", 42);

    let first = package.get_asynchronous_future(future.shared()).realize("first");
    let second = package.get_asynchronous_future(future.shared()).realize("second");
    let first = first.as_async_ref().unwrap();
    let second = second.as_async_ref().unwrap();

    assert!(Arc::ptr_eq(first.record(), second.record()));
    first.wait().into_typed::<Counted>().unwrap();
    assert_eq!(future.realized(), 1);

    // the asynchronous and synchronous paths share the realized document
    package.realize_synchronously(future.shared()).unwrap();
    assert_eq!(future.realized(), 1);
}

#[test]
fn test_higher_priority_runs_first() {
    test::setup();
    let package = package(1, None, None);
    let blocker = GatedFuture::new("blocker");
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let blocking = package.get_asynchronous_future(blocker.shared()).realize("blocker");
    blocker.wait_entered();

    let low = CountingFuture::new("low", 1);
    let high = CountingFuture::new("high", 2);
    let low = package.get_asynchronous_future(low.shared()).realize("low");
    let high = package.get_asynchronous_future(high.shared()).realize("high");
    let low = low.as_async_ref().unwrap();
    let high = high.as_async_ref().unwrap();
    high.change_priority(10);

    for (name, async_ref) in [("low", low), ("high", high)] {
        let order = order.clone();
        async_ref.add_callback(move |_| order.lock().push(name));
    }

    blocker.open();
    blocking.as_async_ref().unwrap().wait();
    low.wait();
    high.wait();

    test::eventually(|| order.lock().len() == 2);
    assert_eq!(*order.lock(), ["high", "low"]);
}

#[test]
fn test_callbacks_after_completion() {
    test::setup();
    let package = default_package();
    let future = CountingFuture::new("done", 1);

    let present = package.get_asynchronous_future(future.shared()).realize("test");
    let async_ref = present.as_async_ref().unwrap();
    async_ref.wait();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    async_ref.add_callback(move |completed| {
        assert!(completed.record().present().is_some());
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_queued_work_is_canceled_on_shutdown() {
    test::setup();
    let package = package(1, None, None);
    let blocker = GatedFuture::new("blocker");
    let blocking = package.get_asynchronous_future(blocker.shared()).realize("blocker");
    blocker.wait_entered();

    let queued = CountingFuture::new("queued", 1);
    let present = package.get_asynchronous_future(queued.shared()).realize("queued");

    let shutdown = std::thread::spawn({
        let blocker = blocker.clone();
        move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            blocker.open();
        }
    });
    package.shutdown();
    shutdown.join().unwrap();

    assert!(present.as_async_ref().unwrap().wait().is_canceled());
    assert!(blocking.as_async_ref().unwrap().wait().is_success());
    assert_eq!(queued.realized(), 0);
}
