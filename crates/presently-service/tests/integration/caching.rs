use std::sync::Arc;
use std::thread;

use presently_service::pipeline::{Future, Present};
use presently_test::{self as test, Counted, CountingFuture, DropCounter, FailingFuture, GatedFuture};

use crate::utils::{default_package, package};

#[test]
fn test_concurrent_realizations_share_one_computation() {
    test::setup();
    let package = default_package();
    let gated = GatedFuture::new("slow");
    let future = package.get_synchronous_future(gated.shared());

    let values = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| future.realize("test").into_typed::<&str>().unwrap()))
            .collect();
        gated.wait_entered();
        gated.open();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(gated.entered(), 1);
    assert!(values.iter().all(|value| Arc::ptr_eq(value, &values[0])));
}

#[test]
fn test_values_are_dropped_after_eviction() {
    test::setup();
    let package = package(1, Some(1), Some(1));
    let drops = DropCounter::new();
    let first = CountingFuture::new("first", 1).with_drops(&drops);
    let second = CountingFuture::new("second", 2).with_drops(&drops);

    let value = package.realize_synchronously(first.shared()).unwrap();
    assert_eq!(value.downcast_ref::<Counted>().unwrap().value, 1);
    drop(value);
    assert_eq!(drops.live(), 1);

    let value = package.realize_synchronously(second.shared()).unwrap();
    assert_eq!(value.downcast_ref::<Counted>().unwrap().value, 2);

    test::eventually(|| drops.dropped() == 1);
    assert_eq!(drops.live(), 1);
    test::eventually(|| !package.document_fetch_cache().contains(&first.robust_hash()));

    // evicted entries are computed again
    package.realize_synchronously(first.shared()).unwrap();
    assert_eq!(first.realized(), 2);
    assert_eq!(second.realized(), 1);
}

#[test]
fn test_shutdown_releases_everything() {
    test::setup();
    let package = default_package();
    let drops = DropCounter::new();

    for (name, value) in [("a", 1), ("b", 2), ("c", 3)] {
        let future = CountingFuture::new(name, value).with_drops(&drops);
        package.realize_synchronously(future.shared()).unwrap();
    }
    assert_eq!(package.document_fetch_cache().resident(), 3);
    assert_eq!(drops.live(), 3);

    package.shutdown();
    assert!(package.document_fetch_cache().is_empty());
    assert_eq!(drops.live(), 0);
}

#[test]
fn test_failures_are_cached() {
    test::setup();
    let package = default_package();
    let future = FailingFuture::shared("no such page");

    let err = package.realize_synchronously(future.clone()).unwrap_err();
    assert_eq!(err.to_string(), "computation failed: no such page");
    assert_eq!(package.document_fetch_cache().resident(), 1);

    let present = package.get_synchronous_future(future).realize("test");
    assert!(matches!(present, Present::Failure(_)));
}
