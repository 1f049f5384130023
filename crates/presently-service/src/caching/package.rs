use std::io;
use std::sync::Arc;

use crate::config::Config;
use crate::pipeline::{
    Asynchronizer, AsyncScheduler, ComputationError, SharedFuture, Value,
};

use super::mem_cache::{MemCache, MemCacheFuture};

/// The set of caches and the scheduler that all computations share.
///
/// There is usually one `CachePackage` per process, created at startup and passed by reference to
/// everything that realizes futures.
///
/// Dropping the package shuts the scheduler down, canceling everything that is still queued.
#[derive(Debug)]
pub struct CachePackage {
    document_fetch_cache: MemCache,
    async_cache: MemCache,
    compute_scheduler: AsyncScheduler,
}

impl CachePackage {
    /// Starts the scheduler and creates the caches according to `config`.
    pub fn new(config: &Config) -> io::Result<Self> {
        let compute_scheduler = AsyncScheduler::new(&config.scheduler)?;
        let document_fetch_cache = MemCache::from_config(
            "document_fetch",
            compute_scheduler.handle(),
            &config.caches.document_fetch,
        );
        let async_cache = MemCache::from_config(
            "async_results",
            compute_scheduler.handle(),
            &config.caches.async_results,
        );

        Ok(Self {
            document_fetch_cache,
            async_cache,
            compute_scheduler,
        })
    }

    pub fn document_fetch_cache(&self) -> &MemCache {
        &self.document_fetch_cache
    }

    pub fn async_cache(&self) -> &MemCache {
        &self.async_cache
    }

    pub fn compute_scheduler(&self) -> &AsyncScheduler {
        &self.compute_scheduler
    }

    /// Wraps `future` so that realizing it goes through the document fetch cache.
    ///
    /// Realizing the result blocks until the present is available.
    pub fn get_synchronous_future(&self, future: SharedFuture) -> SharedFuture {
        MemCacheFuture::shared(self.document_fetch_cache.clone(), future)
    }

    /// Wraps `future` so that realizing it schedules the synchronous future on the workers.
    ///
    /// Realizing the result never blocks. Its present holds an
    /// [`AsyncRef`](crate::pipeline::AsyncRef) to the scheduled computation, shared by every
    /// caller asking for an equal future while it is cached.
    pub fn get_asynchronous_future(&self, future: SharedFuture) -> SharedFuture {
        let asynchronizer = Asynchronizer::new(
            self.compute_scheduler.handle(),
            self.get_synchronous_future(future),
        );
        MemCacheFuture::shared(self.async_cache.clone(), Arc::new(asynchronizer))
    }

    /// Realizes `future` through the document fetch cache on the calling thread.
    ///
    /// Failures and cancellations are returned as errors.
    pub fn realize_synchronously(&self, future: SharedFuture) -> Result<Value, ComputationError> {
        self.get_synchronous_future(future)
            .realize("CachePackage::realize_synchronously")
            .into_result()
    }

    /// Releases every cached entry and shuts the scheduler down.
    pub fn shutdown(&self) {
        self.async_cache.clear();
        self.document_fetch_cache.clear();
        self.compute_scheduler.shutdown();
    }
}
