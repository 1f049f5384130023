use std::fmt;
use std::sync::Arc;

use futures::channel::oneshot;

use super::present::Present;
use super::record::AsyncRecord;
use super::robust_hash::FutureKey;

/// Resolves once the record behind an [`AsyncRef`] completed.
///
/// Created through [`AsyncRef::completion`]. Resolves to an error only if the notification was
/// lost, which happens when a callback panicked before the completion was delivered.
pub type Completion = oneshot::Receiver<AsyncRef>;

/// A counted reference to an [`AsyncRecord`].
///
/// Creating an `AsyncRef` increments the record's reference count, dropping it decrements the
/// count again. When the last reference to a completed record is dropped, the record disposes its
/// present. Cloning an `AsyncRef` acquires an additional reference.
pub struct AsyncRef {
    record: Arc<AsyncRecord>,
    credit: &'static str,
}

impl AsyncRef {
    /// Acquires a new reference to `record`.
    ///
    /// The `credit` labels the holder in trace logs.
    ///
    /// # Panics
    ///
    /// Panics if the record was already disposed.
    pub fn new(record: &Arc<AsyncRecord>, credit: &'static str) -> Self {
        record.add_ref();
        tracing::trace!(record = %record, credit, "AddRef");
        Self {
            record: Arc::clone(record),
            credit,
        }
    }

    /// Acquires a new reference, unless the record was already disposed.
    pub(crate) fn try_new(record: &Arc<AsyncRecord>, credit: &'static str) -> Option<Self> {
        record.try_add_ref().then(|| {
            tracing::trace!(record = %record, credit, "AddRef");
            Self {
                record: Arc::clone(record),
                credit,
            }
        })
    }

    /// Wraps a reference that was already counted.
    pub(crate) fn adopt(record: Arc<AsyncRecord>, credit: &'static str) -> Self {
        Self { record, credit }
    }

    /// Acquires another reference to the same record under a different credit.
    pub fn duplicate(&self, credit: &'static str) -> Self {
        Self::new(&self.record, credit)
    }

    pub fn record(&self) -> &Arc<AsyncRecord> {
        &self.record
    }

    pub fn key(&self) -> &FutureKey {
        self.record.key()
    }

    pub fn credit(&self) -> &'static str {
        self.credit
    }

    /// Returns the present if the record has completed.
    pub fn present(&self) -> Option<Present> {
        self.record.present()
    }

    /// Blocks the current thread until the record completes.
    pub fn wait(&self) -> Present {
        self.record.wait()
    }

    /// See [`AsyncRecord::add_callback`].
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(AsyncRef) + Send + 'static,
    {
        self.record.add_callback(callback)
    }

    /// See [`AsyncRecord::change_priority`].
    pub fn change_priority(&self, delta: i32) {
        self.record.change_priority(delta)
    }

    /// Returns a [`Completion`] that resolves once the record completed.
    pub fn completion(&self) -> Completion {
        let (sender, receiver) = oneshot::channel();
        self.add_callback(move |async_ref| {
            sender.send(async_ref).ok();
        });
        receiver
    }
}

impl Clone for AsyncRef {
    fn clone(&self) -> Self {
        Self::new(&self.record, self.credit)
    }
}

impl Drop for AsyncRef {
    fn drop(&mut self) {
        tracing::trace!(record = %self.record, credit = self.credit, "DropRef");
        self.record.drop_ref();
    }
}

impl fmt::Debug for AsyncRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRef")
            .field("record", &self.record.to_string())
            .field("credit", &self.credit)
            .finish()
    }
}
