use std::fmt;

use crate::config::MemCacheConfig;
use crate::pipeline::FutureKey;

/// A cache entry that may be chosen for eviction.
#[derive(Debug, Clone, Copy)]
pub struct EvictionCandidate<'a> {
    pub key: &'a FutureKey,
    /// A logical timestamp of the last lookup that returned this entry. Larger is more recent.
    pub last_used: u64,
}

/// Decides which entry of a [`MemCache`](super::MemCache) to displace when a new one is inserted.
///
/// The victim is not evicted right away. The cache drops its own reference to the victim once the
/// new entry has completed, and the victim leaves the cache when its last consumer lets go of it.
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// Selects the entry to displace after an insertion.
    ///
    /// `resident` is the number of entries the cache keeps alive on its own, including the entry
    /// that was just inserted. The `candidates` never contain the new entry, nor entries which
    /// are already awaiting eviction.
    fn select_victim(
        &self,
        resident: usize,
        candidates: &mut dyn Iterator<Item = EvictionCandidate<'_>>,
    ) -> Option<FutureKey>;
}

/// Never evicts anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn select_victim(
        &self,
        _resident: usize,
        _candidates: &mut dyn Iterator<Item = EvictionCandidate<'_>>,
    ) -> Option<FutureKey> {
        None
    }
}

/// Evicts the least recently used entry once the cache holds more than `capacity` entries.
#[derive(Debug, Clone, Copy)]
pub struct LruPolicy {
    capacity: usize,
}

impl LruPolicy {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl EvictionPolicy for LruPolicy {
    fn select_victim(
        &self,
        resident: usize,
        candidates: &mut dyn Iterator<Item = EvictionCandidate<'_>>,
    ) -> Option<FutureKey> {
        if resident <= self.capacity {
            return None;
        }
        candidates
            .min_by_key(|candidate| candidate.last_used)
            .map(|candidate| candidate.key.clone())
    }
}

/// Creates the policy matching the configured capacity.
pub fn policy_from_config(config: &MemCacheConfig) -> Box<dyn EvictionPolicy> {
    match config.capacity {
        Some(capacity) => Box::new(LruPolicy::new(capacity)),
        None => Box::new(Unbounded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(keys: &[(FutureKey, u64)]) -> impl Iterator<Item = EvictionCandidate<'_>> {
        keys.iter().map(|(key, last_used)| EvictionCandidate {
            key,
            last_used: *last_used,
        })
    }

    #[test]
    fn test_lru_picks_oldest() {
        let entries = [
            (FutureKey::for_testing("a"), 7),
            (FutureKey::for_testing("b"), 3),
            (FutureKey::for_testing("c"), 5),
        ];
        let policy = LruPolicy::new(3);

        assert_eq!(policy.select_victim(3, &mut candidates(&entries)), None);
        assert_eq!(
            policy.select_victim(4, &mut candidates(&entries)),
            Some(FutureKey::for_testing("b"))
        );
    }

    #[test]
    fn test_from_config() {
        let policy = policy_from_config(&MemCacheConfig { capacity: None });
        let entries = [(FutureKey::for_testing("a"), 1)];
        assert_eq!(policy.select_victim(1000, &mut candidates(&entries)), None);

        let policy = policy_from_config(&MemCacheConfig { capacity: Some(0) });
        assert_eq!(
            policy.select_victim(1, &mut candidates(&entries)),
            Some(FutureKey::for_testing("a"))
        );
    }
}
