use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::MemCacheConfig;
use crate::pipeline::{
    AsyncRecord, AsyncRef, Future, FutureKey, Present, RobustHash, SchedulerHandle, SharedFuture,
};

use super::eviction::{EvictionCandidate, EvictionPolicy, policy_from_config};

/// How a newly inserted record is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// On the calling thread, right after the lookup.
    Inline,
    /// On the scheduler's workers.
    Scheduled,
}

struct Slot {
    record: Arc<AsyncRecord>,
    /// The reference that keeps the record alive while it is resident.
    ///
    /// Released on eviction, after which the slot stays around until the record is disposed.
    cache_ref: Option<AsyncRef>,
    last_used: u64,
    /// Selected as a victim, waiting for the displacing record to complete.
    evicting: bool,
}

impl Slot {
    fn is_resident(&self) -> bool {
        self.cache_ref.is_some() && !self.evicting
    }
}

#[derive(Default)]
struct CacheState {
    slots: FxHashMap<FutureKey, Slot>,
    clock: u64,
}

struct MemCacheInner {
    name: String,
    scheduler: SchedulerHandle,
    policy: Box<dyn EvictionPolicy>,
    state: Mutex<CacheState>,
}

/// A content-addressed, single-flight cache of [`AsyncRecord`]s.
///
/// Lookups are keyed by the [`FutureKey`] of the requested future. Concurrent lookups of equal
/// futures share a single record, so each computation runs at most once while it is cached.
///
/// The cache holds one reference to each resident record. Evicting an entry only releases that
/// reference: the entry stays visible to lookups until its last consumer dropped it, and is
/// removed from the map when the record is disposed.
///
/// Cloning a `MemCache` creates another handle to the same cache.
#[derive(Clone)]
pub struct MemCache {
    inner: Arc<MemCacheInner>,
}

impl fmt::Debug for MemCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemCache")
            .field("name", &self.inner.name)
            .field("policy", &self.inner.policy)
            .field("entries", &state.slots.len())
            .finish()
    }
}

impl MemCache {
    pub fn new(
        name: impl Into<String>,
        scheduler: SchedulerHandle,
        policy: Box<dyn EvictionPolicy>,
    ) -> Self {
        Self {
            inner: Arc::new(MemCacheInner {
                name: name.into(),
                scheduler,
                policy,
                state: Mutex::default(),
            }),
        }
    }

    pub fn from_config(
        name: impl Into<String>,
        scheduler: SchedulerHandle,
        config: &MemCacheConfig,
    ) -> Self {
        Self::new(name, scheduler, policy_from_config(config))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.inner.scheduler
    }

    /// The number of entries in the map, including evicted entries that are still in use.
    pub fn len(&self) -> usize {
        self.inner.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of entries the cache keeps alive on its own.
    pub fn resident(&self) -> usize {
        let state = self.inner.state.lock();
        state.slots.values().filter(|slot| slot.is_resident()).count()
    }

    pub fn contains(&self, key: &FutureKey) -> bool {
        self.inner.state.lock().slots.contains_key(key)
    }

    /// Looks up `future`, realizing it on the calling thread if nobody else did yet.
    ///
    /// The returned reference may still be pending if another thread is realizing the future.
    /// Use [`AsyncRef::wait`] to block until it completed.
    pub fn lookup(&self, future: &SharedFuture) -> AsyncRef {
        self.lookup_with(future, Execution::Inline, None)
    }

    /// Looks up `future`, scheduling its realization on a miss.
    pub fn lookup_async(&self, future: &SharedFuture) -> AsyncRef {
        self.lookup_with(future, Execution::Scheduled, None)
    }

    /// Looks up `future`, optionally naming the entry a newly inserted record displaces.
    ///
    /// An explicit `evict` key takes precedence over the eviction policy. It is ignored if the
    /// entry is not resident.
    pub fn lookup_with(
        &self,
        future: &SharedFuture,
        execution: Execution,
        evict: Option<FutureKey>,
    ) -> AsyncRef {
        let key = future.robust_hash();
        metric!(counter("caches.access") += 1, "cache" => self.name());

        let (async_ref, inserted) = self.inner.get_or_insert(key, future, evict);

        if inserted {
            metric!(counter("caches.computation") += 1, "cache" => self.name());
            tracing::debug!(cache = self.name(), record = %async_ref.record(), "Cache miss");

            if let Some(victim) = async_ref.record().cache_key_to_evict().cloned() {
                let cache = Arc::downgrade(&self.inner);
                async_ref.add_callback(move |_| {
                    if let Some(cache) = cache.upgrade() {
                        cache.release(&victim, true);
                    }
                });
            }
        } else {
            metric!(counter("caches.memory.hit") += 1, "cache" => self.name());
            tracing::debug!(cache = self.name(), record = %async_ref.record(), "Cache hit");
        }

        match execution {
            // A hit may still be unclaimed if the inserting thread did not get to it yet.
            Execution::Inline => async_ref.record().process_synchronously(),
            Execution::Scheduled if inserted => {
                self.inner.scheduler.enqueue(async_ref.record());
            }
            Execution::Scheduled => {}
        }

        async_ref
    }

    /// Releases the cache's reference to `key` right away.
    ///
    /// Returns `false` if the entry is unknown or was already evicted.
    pub fn evict(&self, key: &FutureKey) -> bool {
        self.inner.release(key, false)
    }

    /// Releases all of the cache's references.
    pub fn clear(&self) {
        let released: Vec<_> = {
            let mut state = self.inner.state.lock();
            state
                .slots
                .values_mut()
                .filter_map(|slot| slot.cache_ref.take())
                .collect()
        };
        tracing::debug!(cache = self.name(), count = released.len(), "Cleared cache");
        // dropped outside of the lock, as disposal removes the slots
        drop(released);
    }
}

impl MemCacheInner {
    fn get_or_insert(
        self: &Arc<Self>,
        key: FutureKey,
        future: &SharedFuture,
        evict: Option<FutureKey>,
    ) -> (AsyncRef, bool) {
        let mut state = self.state.lock();
        state.clock += 1;
        let now = state.clock;

        let mut withdrawn = None;
        if let Some(slot) = state.slots.get_mut(&key) {
            let canceled = slot.record.present().is_some_and(|present| present.is_canceled());
            if canceled {
                // A canceled record never realized its future, so it is replaced like a miss.
                tracing::debug!(cache = %self.name, record = %slot.record, "Replacing canceled entry");
                withdrawn = slot.cache_ref.take();
            } else if let Some(async_ref) = AsyncRef::try_new(&slot.record, "MemCache::lookup") {
                // A disposed record is on its way out, its dispose hook is waiting for the lock.
                slot.last_used = now;
                return (async_ref, false);
            }
        }

        let victim = match evict {
            Some(evict) => state
                .slots
                .get(&evict)
                .is_some_and(|slot| slot.is_resident())
                .then_some(evict),
            None => {
                let resident = state.slots.values().filter(|s| s.is_resident()).count() + 1;
                let mut candidates = state
                    .slots
                    .iter()
                    .filter(|(_, slot)| slot.is_resident())
                    .map(|(key, slot)| EvictionCandidate {
                        key,
                        last_used: slot.last_used,
                    });
                self.policy.select_victim(resident, &mut candidates)
            }
        };
        if let Some(slot) = victim.as_ref().and_then(|victim| state.slots.get_mut(victim)) {
            slot.evicting = true;
        }

        let record = AsyncRecord::with_key(self.scheduler.clone(), victim, future.clone(), key.clone());
        let cache = Arc::downgrade(self);
        record.set_dispose_hook(Box::new(move |record: &AsyncRecord| {
            remove_disposed(&cache, record)
        }));

        let cache_ref = AsyncRef::new(&record, "MemCache");
        let async_ref = AsyncRef::new(&record, "MemCache::lookup");
        let replaced = state.slots.insert(
            key,
            Slot {
                record,
                cache_ref: Some(cache_ref),
                last_used: now,
                evicting: false,
            },
        );
        drop(state);
        drop(replaced);
        drop(withdrawn);

        (async_ref, true)
    }

    /// Drops the cache's own reference to `key`.
    ///
    /// With `pending` set, only an entry that was selected as a victim is released.
    fn release(&self, key: &FutureKey, pending: bool) -> bool {
        let cache_ref = {
            let mut state = self.state.lock();
            let Some(slot) = state.slots.get_mut(key) else {
                return false;
            };
            if pending && !slot.evicting {
                return false;
            }
            slot.evicting = false;
            slot.cache_ref.take()
        };

        let Some(cache_ref) = cache_ref else {
            return false;
        };
        metric!(counter("caches.eviction") += 1, "cache" => self.name.as_str());
        tracing::debug!(cache = %self.name, record = %cache_ref.record(), "Evicted");
        drop(cache_ref);
        true
    }
}

fn remove_disposed(cache: &Weak<MemCacheInner>, record: &AsyncRecord) {
    let Some(cache) = cache.upgrade() else {
        return;
    };
    let removed = {
        let mut state = cache.state.lock();
        let is_current = state
            .slots
            .get(record.key())
            .is_some_and(|slot| std::ptr::eq(Arc::as_ptr(&slot.record), record));
        if is_current {
            state.slots.remove(record.key())
        } else {
            None
        }
    };
    if removed.is_some() {
        tracing::trace!(cache = %cache.name, record = %record, "Removed disposed entry");
    }
}

/// A future that realizes its inner future through a [`MemCache`].
///
/// Realizing it blocks until the cached record completed, and returns its present. The cache is
/// not part of the identity, so the key equals the key of the inner future.
pub struct MemCacheFuture {
    cache: MemCache,
    future: SharedFuture,
}

impl fmt::Debug for MemCacheFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemCacheFuture")
            .field("cache", &self.cache.name())
            .field("future", &self.future.robust_hash().debug_string())
            .finish()
    }
}

impl MemCacheFuture {
    pub fn new(cache: MemCache, future: SharedFuture) -> Self {
        Self { cache, future }
    }

    pub fn shared(cache: MemCache, future: SharedFuture) -> SharedFuture {
        Arc::new(Self::new(cache, future))
    }

    pub fn inner(&self) -> &SharedFuture {
        &self.future
    }
}

impl Future for MemCacheFuture {
    fn realize(&self, tag: &str) -> Present {
        let async_ref = self.cache.lookup(&self.future);
        tracing::trace!(cache = self.cache.name(), record = %async_ref.record(), tag, "Realize");
        async_ref.wait()
    }

    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        self.future.accumulate_robust_hash(hash);
    }
}
