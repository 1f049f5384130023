use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::present::Present;
use super::robust_hash::{FutureKey, RobustHash, RobustlyHashable};

/// A pure, re-entrant description of a computation.
///
/// Implementations must be immutable. A future may be realized any number of times and is
/// expected to produce equivalent results each time; the pipeline relies on this to deduplicate
/// realizations by [`FutureKey`].
pub trait Future: Send + Sync {
    /// Performs the computation.
    ///
    /// This may block on I/O or CPU work and may realize other futures, but it must not hold any
    /// external lock across the call. The `tag` names the call site and is only used for
    /// diagnostics.
    fn realize(&self, tag: &str) -> Present;

    /// Accumulates the identity of this future: its type tag, its parameters, and the keys of any
    /// nested futures.
    fn accumulate_robust_hash(&self, hash: &mut RobustHash);

    /// Computes the [`FutureKey`] of this future.
    fn robust_hash(&self) -> FutureKey {
        let mut hash = RobustHash::new();
        self.accumulate_robust_hash(&mut hash);
        hash.build()
    }
}

/// A shared handle to a type-erased [`Future`].
pub type SharedFuture = Arc<dyn Future>;

/// A future that realizes to a fixed value.
pub struct ConstantFuture<T> {
    value: Arc<T>,
}

impl<T> ConstantFuture<T>
where
    T: RobustlyHashable + Any + Send + Sync,
{
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    pub fn shared(value: T) -> SharedFuture {
        Arc::new(Self::new(value))
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for ConstantFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConstantFuture").field(&self.value).finish()
    }
}

impl<T> Future for ConstantFuture<T>
where
    T: RobustlyHashable + Any + Send + Sync,
{
    fn realize(&self, _tag: &str) -> Present {
        Present::Success(self.value.clone())
    }

    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_tag("Constant");
        self.value.accumulate_robust_hash(hash);
    }
}
