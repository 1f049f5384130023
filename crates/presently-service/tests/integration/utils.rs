use presently_service::caching::CachePackage;
use presently_service::config::{CacheConfigs, Config, MemCacheConfig, SchedulerConfig};

/// Creates a package with `workers` compute threads and the given cache capacities.
pub fn package(workers: usize, document_fetch: Option<usize>, async_results: Option<usize>) -> CachePackage {
    let config = Config {
        scheduler: SchedulerConfig {
            workers,
            thread_name: "integration".into(),
            ..Default::default()
        },
        caches: CacheConfigs {
            document_fetch: MemCacheConfig {
                capacity: document_fetch,
            },
            async_results: MemCacheConfig {
                capacity: async_results,
            },
        },
        ..Default::default()
    };
    CachePackage::new(&config).unwrap()
}

/// A package with default capacities.
pub fn default_package() -> CachePackage {
    package(2, Some(64), Some(1024))
}
