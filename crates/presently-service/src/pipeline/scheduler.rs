use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::io;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::config::SchedulerConfig;

use super::async_ref::AsyncRef;
use super::present::ComputationError;
use super::record::{AsyncRecord, CompleteCallback};

/// The position of a record inside the queue.
///
/// Ordered by descending priority first, and by ascending enqueue sequence second, so that records
/// of equal priority are dequeued first-in first-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<i32>,
    seq: u64,
}

#[derive(Default)]
struct Queue {
    entries: BTreeMap<QueueKey, Arc<AsyncRecord>>,
    positions: FxHashMap<u64, QueueKey>,
    next_seq: u64,
    shutdown: bool,
}

impl Queue {
    fn push(&mut self, record: Arc<AsyncRecord>) {
        let key = QueueKey {
            priority: Reverse(record.priority()),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.positions.insert(record.id(), key);
        self.entries.insert(key, record);
    }

    fn pop(&mut self) -> Option<Arc<AsyncRecord>> {
        let (_, record) = self.entries.pop_first()?;
        self.positions.remove(&record.id());
        Some(record)
    }

    fn remove(&mut self, record: &AsyncRecord) -> Option<Arc<AsyncRecord>> {
        let key = self.positions.remove(&record.id())?;
        self.entries.remove(&key)
    }

    /// Moves a queued record to the position matching its current priority.
    ///
    /// The record keeps its enqueue sequence, so its order relative to records of the same
    /// priority is preserved.
    fn rerank(&mut self, record: &AsyncRecord) -> bool {
        let Some(key) = self.positions.get_mut(&record.id()) else {
            return false;
        };
        let new_key = QueueKey {
            priority: Reverse(record.priority()),
            seq: key.seq,
        };
        if new_key != *key {
            let old_key = std::mem::replace(key, new_key);
            if let Some(record) = self.entries.remove(&old_key) {
                self.entries.insert(new_key, record);
            }
        }
        true
    }

    fn drain(&mut self) -> Vec<Arc<AsyncRecord>> {
        self.positions.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

/// The pending callbacks of a completed record, together with the reference that keeps the
/// record alive until all of them ran.
pub(crate) struct Notification {
    async_ref: AsyncRef,
    callbacks: Vec<CompleteCallback>,
}

impl Notification {
    pub(crate) fn new(async_ref: AsyncRef, callbacks: Vec<CompleteCallback>) -> Self {
        Self {
            async_ref,
            callbacks,
        }
    }

    fn fire(self) {
        let Self {
            async_ref,
            callbacks,
        } = self;
        for callback in callbacks {
            let callback_ref = async_ref.duplicate("callback");
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || callback(callback_ref)))
            {
                let err = ComputationError::from_panic(payload);
                tracing::error!(record = %async_ref.record(), error = %err, "Completion callback panicked");
            }
        }
    }
}

/// The dedicated thread on which completion callbacks run.
struct Notifier {
    sender: Mutex<Option<Sender<Notification>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Notifier {
    fn spawn(thread_name: &str) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Notification>();
        let thread = thread::Builder::new()
            .name(format!("{thread_name}-notify"))
            .spawn(move || {
                for notification in receiver {
                    notification.fire();
                }
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }

    fn dispatch(&self, notification: Notification) {
        let sender = self.sender.lock().clone();
        let notification = match sender {
            Some(sender) => match sender.send(notification) {
                Ok(()) => return,
                Err(err) => err.0,
            },
            None => notification,
        };
        tracing::warn!(
            record = %notification.async_ref.record(),
            "Notification thread is shut down, notifying inline"
        );
        notification.fire();
    }

    fn shutdown(&self) {
        // dropping the sender lets the thread drain all pending notifications and exit
        self.sender.lock().take();
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            tracing::error!("Notification thread panicked");
        }
    }
}

struct SchedulerShared {
    name: String,
    queue: Mutex<Queue>,
    available: Condvar,
    next_record_id: AtomicU64,
    sync_wait_warning: Duration,
    notifier: Notifier,
}

/// A cheap, cloneable handle to an [`AsyncScheduler`].
///
/// Every [`AsyncRecord`] holds one of these to reach its scheduler for re-ranking and
/// notification.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<SchedulerShared>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("name", &self.shared.name)
            .field("queued", &self.queue_len())
            .finish()
    }
}

impl SchedulerHandle {
    pub(crate) fn next_record_id(&self) -> u64 {
        self.shared.next_record_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn sync_wait_warning(&self) -> Duration {
        self.shared.sync_wait_warning
    }

    pub(crate) fn dispatch(&self, notification: Notification) {
        self.shared.notifier.dispatch(notification);
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The number of records waiting for a worker.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }

    /// Claims `record` and places it into the queue.
    ///
    /// Returns `false` if the record was already claimed by another execution path. If the
    /// scheduler was shut down, the record is claimed and immediately completed as canceled.
    pub fn enqueue(&self, record: &Arc<AsyncRecord>) -> bool {
        if !record.prepare_to_queue() {
            return false;
        }

        let accepted = {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                false
            } else {
                queue.push(Arc::clone(record));
                metric!(
                    gauge("scheduler.queue_depth") = queue.entries.len() as u64,
                    "scheduler" => &self.shared.name,
                );
                true
            }
        };

        if accepted {
            metric!(counter("scheduler.enqueued") += 1, "scheduler" => &self.shared.name);
            self.shared.available.notify_one();
        } else {
            tracing::debug!(record = %record, "Scheduler is shut down, canceling");
            record.dequeued();
        }
        true
    }

    /// Withdraws a record that has not started executing yet.
    ///
    /// The record completes as [`Canceled`](super::Present::Canceled) and is never realized. This
    /// includes records that were never enqueued. Returns `false` if the record already started or
    /// completed.
    pub fn cancel(&self, record: &Arc<AsyncRecord>) -> bool {
        if !record.withdraw() {
            return false;
        }
        metric!(counter("scheduler.canceled") += 1, "scheduler" => &self.shared.name);

        // Not claimed by any execution path yet, so nobody else would complete it.
        if record.prepare_to_queue() {
            record.dequeued();
            return true;
        }

        // If a worker popped the record already, it will observe the withdrawal instead.
        let removed = self.shared.queue.lock().remove(record);
        if let Some(record) = removed {
            record.dequeued();
        }
        true
    }

    /// Re-ranks a queued record after its priority changed.
    pub(crate) fn reposition(&self, record: &AsyncRecord) {
        self.shared.queue.lock().rerank(record);
    }
}

/// A priority work queue drained by a fixed pool of worker threads.
///
/// Records with a higher priority are executed first, records of equal priority in the order
/// they were enqueued. Dropping the scheduler shuts it down: workers finish the record they are
/// executing, and every record still in the queue completes as canceled.
pub struct AsyncScheduler {
    handle: SchedulerHandle,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for AsyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncScheduler")
            .field("handle", &self.handle)
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}

impl Deref for AsyncScheduler {
    type Target = SchedulerHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl AsyncScheduler {
    pub fn new(config: &SchedulerConfig) -> io::Result<Self> {
        let shared = Arc::new(SchedulerShared {
            name: config.thread_name.clone(),
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
            next_record_id: AtomicU64::new(0),
            sync_wait_warning: config.sync_wait_warning.max(Duration::from_millis(1)),
            notifier: Notifier::spawn(&config.thread_name)?,
        });

        // At least one worker, as the queue would never drain otherwise.
        let worker_count = config.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let shared = Arc::clone(&shared);
            let worker = thread::Builder::new()
                .name(format!("{}-{i}", config.thread_name))
                .spawn(move || worker_loop(shared))?;
            workers.push(worker);
        }

        tracing::debug!(name = %config.thread_name, workers = worker_count, "Started scheduler");

        Ok(Self {
            handle: SchedulerHandle { shared },
            workers: Mutex::new(workers),
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stops the workers and cancels every record still in the queue.
    ///
    /// Records that are currently executing run to completion. Calling this more than once is
    /// harmless.
    pub fn shutdown(&self) {
        let shared = &self.handle.shared;
        let drained = {
            let mut queue = shared.queue.lock();
            queue.shutdown = true;
            queue.drain()
        };
        shared.available.notify_all();

        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Canceling queued records on shutdown");
        }
        for record in drained {
            record.dequeued();
        }

        let current = thread::current().id();
        for worker in self.workers.lock().drain(..) {
            if worker.thread().id() != current && worker.join().is_err() {
                tracing::error!("Scheduler worker panicked");
            }
        }

        shared.notifier.shutdown();
    }
}

impl Drop for AsyncScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<SchedulerShared>) {
    loop {
        let record = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(record) = queue.pop() {
                    break record;
                }
                if queue.shutdown {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };

        if record.begin_work() {
            record.do_work();
        } else {
            record.dequeued();
        }
    }
}
