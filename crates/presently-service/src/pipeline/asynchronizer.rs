use std::fmt;

use super::async_ref::AsyncRef;
use super::future::{Future, SharedFuture};
use super::present::Present;
use super::record::AsyncRecord;
use super::robust_hash::RobustHash;
use super::scheduler::SchedulerHandle;

/// Moves the realization of a future onto the scheduler's workers.
///
/// Realizing an `Asynchronizer` never blocks: it enqueues a record for the wrapped future and
/// returns an [`AsyncRef`] to that record as its successful value. Subscribe to the reference with
/// [`AsyncRef::add_callback`] or [`AsyncRef::completion`] to observe the actual result.
pub struct Asynchronizer {
    scheduler: SchedulerHandle,
    inner: SharedFuture,
}

impl fmt::Debug for Asynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Asynchronizer")
            .field("scheduler", &self.scheduler.name())
            .field("inner", &self.inner.robust_hash().debug_string())
            .finish()
    }
}

impl Asynchronizer {
    pub fn new(scheduler: SchedulerHandle, inner: SharedFuture) -> Self {
        Self { scheduler, inner }
    }

    pub fn inner(&self) -> &SharedFuture {
        &self.inner
    }
}

impl Future for Asynchronizer {
    fn realize(&self, _tag: &str) -> Present {
        let record = AsyncRecord::new(self.scheduler.clone(), None, self.inner.clone());
        let async_ref = AsyncRef::new(&record, "Asynchronizer");
        self.scheduler.enqueue(&record);
        Present::success(async_ref)
    }

    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_tag("Asynchronizer");
        hash.accumulate_future("inner", &*self.inner);
    }
}
