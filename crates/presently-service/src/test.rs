//! Helpers for the unit tests of this crate.
//!
//! Integration tests use the `presently-test` crate instead, which offers the same kind of
//! futures for the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use crate::pipeline::{Future, Present, RobustHash, SharedFuture};

/// Sets up logging so that all console output is captured by the test runner.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("presently_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Polls `condition` until it holds, panicking after a few seconds.
///
/// Used for effects that happen on the notification thread.
pub fn eventually(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// A future backed by a closure. Futures with the same name share the same key.
pub struct FnFuture<F> {
    name: &'static str,
    f: F,
}

impl FnFuture<()> {
    pub fn new<F>(name: &'static str, f: F) -> SharedFuture
    where
        F: Fn() -> Present + Send + Sync + 'static,
    {
        Arc::new(FnFuture { name, f })
    }
}

impl<F> Future for FnFuture<F>
where
    F: Fn() -> Present + Send + Sync,
{
    fn realize(&self, _tag: &str) -> Present {
        (self.f)()
    }

    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_tag("FnFuture");
        hash.accumulate_str("name", self.name);
    }
}

/// Counts how often the futures it creates were realized.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A future that increments the counter and realizes to its own name.
    pub fn future(&self, name: &'static str) -> SharedFuture {
        let count = Arc::clone(&self.0);
        FnFuture::new(name, move || {
            count.fetch_add(1, Ordering::SeqCst);
            Present::success(name)
        })
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct GateState {
    entered: usize,
    open: bool,
}

/// Blocks the futures it creates until it is opened.
#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<GateState>, Condvar)>);

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// A future that blocks until the gate opens, and then realizes to `()`.
    pub fn future(&self, name: &'static str) -> SharedFuture {
        let gate = self.clone();
        FnFuture::new(name, move || {
            let (state, condvar) = &*gate.0;
            let mut state = state.lock();
            state.entered += 1;
            condvar.notify_all();
            while !state.open {
                condvar.wait(&mut state);
            }
            Present::success(())
        })
    }

    /// Waits until at least one future is blocked on this gate.
    pub fn wait_entered(&self) {
        let (state, condvar) = &*self.0;
        let mut state = state.lock();
        while state.entered == 0 {
            condvar.wait(&mut state);
        }
    }

    pub fn open(&self) {
        let (state, condvar) = &*self.0;
        state.lock().open = true;
        condvar.notify_all();
    }
}
