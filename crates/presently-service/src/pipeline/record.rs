use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::async_ref::AsyncRef;
use super::future::SharedFuture;
use super::present::{ComputationError, Present};
use super::robust_hash::FutureKey;
use super::scheduler::{Notification, SchedulerHandle};

/// The lifecycle state of an [`AsyncRecord`]. States only ever advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AsyncState {
    /// Created, but not yet claimed by any execution path.
    Prequeued,
    /// Claimed for execution, either by the scheduler or by a synchronous caller.
    Queued,
    /// The present has been assigned.
    Completed,
}

/// A subscriber that is invoked exactly once when a record completes.
pub type CompleteCallback = Box<dyn FnOnce(AsyncRef) + Send + 'static>;

pub(crate) type DisposeHook = Box<dyn FnOnce(&AsyncRecord) + Send + 'static>;

struct RecordState {
    state: AsyncState,
    /// Set once `do_work` was committed to, after which the record can not be withdrawn.
    started: bool,
    withdrawn: bool,
    present: Option<Present>,
    priority: i32,
    refs: usize,
    disposed: bool,
    callbacks: Vec<CompleteCallback>,
    on_dispose: Option<DisposeHook>,
}

/// The execution and lifecycle wrapper around a single [`Future`](super::Future).
///
/// A record starts out holding one internal reference on behalf of whoever executes it. When the
/// record is notified, that reference is handed over to the notification, which releases it after
/// all callbacks ran. The present is disposed the moment the last reference is released.
pub struct AsyncRecord {
    id: u64,
    key: FutureKey,
    future: SharedFuture,
    cache_key_to_evict: Option<FutureKey>,
    scheduler: SchedulerHandle,
    inner: Mutex<RecordState>,
    completed: Condvar,
}

impl fmt::Display for AsyncRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncRecord:{}", self.key.debug_string())
    }
}

impl fmt::Debug for AsyncRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("AsyncRecord")
            .field("id", &self.id)
            .field("key", &self.key.debug_string())
            .field("state", &inner.state)
            .field("priority", &inner.priority)
            .field("refs", &inner.refs)
            .field("disposed", &inner.disposed)
            .finish()
    }
}

impl AsyncRecord {
    pub fn new(
        scheduler: SchedulerHandle,
        cache_key_to_evict: Option<FutureKey>,
        future: SharedFuture,
    ) -> Arc<Self> {
        let key = future.robust_hash();
        Self::with_key(scheduler, cache_key_to_evict, future, key)
    }

    pub(crate) fn with_key(
        scheduler: SchedulerHandle,
        cache_key_to_evict: Option<FutureKey>,
        future: SharedFuture,
        key: FutureKey,
    ) -> Arc<Self> {
        let record = Arc::new(Self {
            id: scheduler.next_record_id(),
            key,
            future,
            cache_key_to_evict,
            scheduler,
            inner: Mutex::new(RecordState {
                state: AsyncState::Prequeued,
                started: false,
                withdrawn: false,
                present: None,
                priority: 0,
                refs: 1,
                disposed: false,
                callbacks: Vec::new(),
                on_dispose: None,
            }),
            completed: Condvar::new(),
        });
        tracing::trace!(record = %record, "Created");
        record
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &FutureKey {
        &self.key
    }

    pub fn future(&self) -> &SharedFuture {
        &self.future
    }

    pub fn cache_key_to_evict(&self) -> Option<&FutureKey> {
        self.cache_key_to_evict.as_ref()
    }

    pub fn state(&self) -> AsyncState {
        self.inner.lock().state
    }

    pub fn priority(&self) -> i32 {
        self.inner.lock().priority
    }

    pub fn refs(&self) -> usize {
        self.inner.lock().refs
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Returns the present, if the record has completed and was not yet disposed.
    pub fn present(&self) -> Option<Present> {
        self.inner.lock().present.clone()
    }

    /// Registers a callback to be invoked once the record completes.
    ///
    /// If the record already completed, the callback runs immediately on the calling thread.
    /// Otherwise it is queued and later invoked on the scheduler's notification thread, in
    /// registration order.
    pub fn add_callback<F>(self: &Arc<Self>, callback: F)
    where
        F: FnOnce(AsyncRef) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        assert!(!inner.disposed, "{self}: callback added after dispose");
        if inner.present.is_some() {
            inner.refs += 1;
            drop(inner);
            callback(AsyncRef::adopt(Arc::clone(self), "AsyncRecord::add_callback"));
        } else {
            inner.callbacks.push(Box::new(callback));
        }
    }

    /// Adjusts the priority by `delta` and re-ranks the record if it is still queued.
    ///
    /// The priority saturates at the bounds of `i32`.
    ///
    /// This does nothing once the record has completed.
    pub fn change_priority(self: &Arc<Self>, delta: i32) {
        {
            let mut inner = self.inner.lock();
            if inner.state == AsyncState::Completed {
                return;
            }
            inner.priority = inner.priority.saturating_add(delta);
        }
        self.scheduler.reposition(self);
    }

    pub(crate) fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub(crate) fn add_ref(&self) {
        let mut inner = self.inner.lock();
        assert!(!inner.disposed, "{self}: reference added after dispose");
        inner.refs += 1;
    }

    /// Adds a reference unless the record was already disposed.
    pub(crate) fn try_add_ref(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return false;
        }
        inner.refs += 1;
        true
    }

    pub(crate) fn drop_ref(&self) {
        let (present, hook) = {
            let mut inner = self.inner.lock();
            assert!(!inner.disposed, "{self}: reference dropped after dispose");
            assert!(inner.refs > 0, "{self}: reference count below zero");
            inner.refs -= 1;
            if inner.refs > 0 {
                return;
            }
            assert_eq!(
                inner.state,
                AsyncState::Completed,
                "{self}: last reference dropped before completion"
            );
            inner.disposed = true;
            (inner.present.take(), inner.on_dispose.take())
        };

        tracing::trace!(record = %self, "Disposed");
        metric!(counter("records.disposed") += 1);
        // the value is released outside of the record lock, as it may itself hold references
        drop(present);
        if let Some(hook) = hook {
            hook(self);
        }
    }

    pub(crate) fn set_dispose_hook(&self, hook: DisposeHook) {
        let mut inner = self.inner.lock();
        assert!(!inner.disposed, "{self}: dispose hook set after dispose");
        inner.on_dispose = Some(hook);
    }

    /// Claims the record for execution.
    ///
    /// Succeeds only from [`AsyncState::Prequeued`], so that exactly one execution path wins.
    pub(crate) fn prepare_to_queue(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != AsyncState::Prequeued {
            return false;
        }
        inner.state = AsyncState::Queued;
        true
    }

    /// Commits to running `do_work`, unless the record was withdrawn in the meantime.
    pub(crate) fn begin_work(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.withdrawn {
            return false;
        }
        inner.started = true;
        true
    }

    /// Marks a record as withdrawn, which only succeeds if it has not started yet.
    pub(crate) fn withdraw(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.started || inner.withdrawn || inner.state == AsyncState::Completed {
            return false;
        }
        inner.withdrawn = true;
        true
    }

    /// Runs the record on the calling thread, unless another path already claimed it.
    ///
    /// In the latter case the caller is expected to wait for the present.
    pub fn process_synchronously(self: &Arc<Self>) {
        if !self.prepare_to_queue() {
            return;
        }
        if self.begin_work() {
            self.do_work();
        } else {
            self.dequeued();
        }
    }

    pub(crate) fn do_work(self: &Arc<Self>) {
        assert!(
            self.inner.lock().present.is_none(),
            "{self}: do_work on a completed record"
        );

        tracing::trace!(record = %self, "Realizing");
        let start = Instant::now();
        let present = panic::catch_unwind(AssertUnwindSafe(|| {
            self.future.realize("AsyncRecord::do_work")
        }))
        .unwrap_or_else(|payload| Present::Failure(ComputationError::from_panic(payload)));

        metric!(
            timer("records.realize") = start.elapsed(),
            "status" => present.status(),
        );
        match &present {
            Present::Failure(err @ ComputationError::Panicked(_)) => {
                tracing::error!(record = %self, error = err as &dyn std::error::Error, "Computation panicked");
            }
            Present::Failure(err) => {
                tracing::debug!(record = %self, error = %err, "Computation failed");
            }
            _ => {}
        }

        self.notify(present);
    }

    /// Completes a record that was withdrawn before it started, without realizing it.
    pub(crate) fn dequeued(self: &Arc<Self>) {
        tracing::trace!(record = %self, "DeQueued");
        self.notify(Present::Canceled);
    }

    fn notify(self: &Arc<Self>, present: Present) {
        let callbacks = {
            let mut inner = self.inner.lock();
            assert!(inner.present.is_none(), "{self}: notified twice");
            debug_assert_eq!(inner.state, AsyncState::Queued);
            inner.present = Some(present);
            inner.state = AsyncState::Completed;
            std::mem::take(&mut inner.callbacks)
        };
        self.completed.notify_all();

        // The execution reference is handed over to the notification.
        let notification_ref = AsyncRef::adopt(Arc::clone(self), "notification");
        if callbacks.is_empty() {
            drop(notification_ref);
        } else {
            self.scheduler
                .dispatch(Notification::new(notification_ref, callbacks));
        }
    }

    /// Blocks until the record completes and returns its present.
    ///
    /// The caller must hold a reference, which keeps the present from being disposed.
    pub(crate) fn wait(&self) -> Present {
        let warn_after = self.scheduler.sync_wait_warning();
        let start = Instant::now();
        let mut warned = false;

        let mut inner = self.inner.lock();
        while inner.state != AsyncState::Completed {
            let timed_out = self.completed.wait_for(&mut inner, warn_after).timed_out();
            if timed_out && !warned {
                warned = true;
                tracing::warn!(
                    record = %self,
                    waited = ?start.elapsed(),
                    "Still waiting for a synchronous computation",
                );
            }
        }

        match &inner.present {
            Some(present) => present.clone(),
            None => panic!("{self}: waited on a disposed record"),
        }
    }
}
