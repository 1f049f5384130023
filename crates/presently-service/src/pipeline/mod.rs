//! # The computation pipeline
//!
//! Expensive derived artifacts (fetched documents, decoded images, …) are described as
//! [`Future`]s: immutable, hashable descriptions of a computation. Realizing a future yields a
//! [`Present`], which is either a successful value, a failure, or a cancellation marker.
//!
//! ## Identity
//!
//! Every future accumulates its identity into a [`RobustHash`]: its type tag, its parameters, and
//! the keys of all the futures it depends on. The resulting [`FutureKey`] is a SHA-256 hash of
//! that human-readable metadata and is used to deduplicate computations.
//!
//! **NOTE**: Care must be taken to keep that metadata stable. It may not contain pointers,
//! timestamps, or anything else that differs between otherwise equal futures.
//!
//! ## Records
//!
//! An [`AsyncRecord`] tracks a single execution of a future. Its state only moves forward:
//!
//! - [`Prequeued`](AsyncState::Prequeued): created, but not claimed by anyone.
//! - [`Queued`](AsyncState::Queued): claimed either by the [`AsyncScheduler`] or by a synchronous
//!   caller. Claiming is an atomic check-and-set, so a record is executed by exactly one path.
//! - [`Completed`](AsyncState::Completed): the present was assigned. This happens exactly once,
//!   either by realizing the future, or by withdrawing the record before it started, which yields
//!   [`Present::Canceled`].
//!
//! Once completed, all registered callbacks are fired on the scheduler's notification thread,
//! never on the thread that completed the record. Callbacks registered later run immediately.
//!
//! ## Reference counting
//!
//! Holders of a record participate in its lifetime through [`AsyncRef`]s. The present is disposed
//! (dropped) the instant the last reference goes away, rather than whenever the last `Arc` of the
//! record happens to be dropped. A record holds one internal reference from creation until its
//! callbacks have run, so it can not be disposed before it completed.
//!
//! Reference count violations, notifying a record twice, or touching a disposed record are bugs in
//! the pipeline itself and cause a panic.
//!
//! ## Scheduling
//!
//! The [`AsyncScheduler`] drains a priority queue with a fixed number of worker threads. Higher
//! priorities are dequeued first, equal priorities in FIFO order. Priorities can be changed while
//! a record is queued, and queued records can be canceled. Priorities are a scheduling hint only,
//! there is no ordering guarantee between the completions of unrelated records.
//!
//! The [`Asynchronizer`] turns any future into one whose realization merely enqueues the wrapped
//! future and returns an [`AsyncRef`] to it, so the caller never blocks.

mod async_ref;
mod asynchronizer;
mod future;
mod present;
mod record;
mod robust_hash;
mod scheduler;

pub use async_ref::{AsyncRef, Completion};
pub use asynchronizer::Asynchronizer;
pub use future::{ConstantFuture, Future, SharedFuture};
pub use present::{ComputationError, Present, Value};
pub use record::{AsyncRecord, AsyncState, CompleteCallback};
pub use robust_hash::{FutureKey, RobustHash, RobustlyHashable};
pub use scheduler::{AsyncScheduler, SchedulerHandle};

#[cfg(test)]
mod tests;
