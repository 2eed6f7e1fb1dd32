//! Coordination primitives built on [`Deferred`](crate::Deferred).
//!
//! None of these block a thread: whenever a caller would have to wait, it
//! gets a deferred instead, which a task simply awaits.
//!
//! - [`MaxSizeQueue`]: FIFO with backpressure for producers.
//! - [`BacklogQueue`]: adds waiting consumers and an optional backlog cap.
//! - [`PrioritySemaphore`]: tokens granted by priority, then arrival.
//! - [`LazyMap`]: memoizing keyed loader that deduplicates in-flight loads.
//!
//! All of them are safe to share between threads. Internal state is
//! guarded by short critical sections and deferreds are always settled
//! after the lock is released.

mod lazymap;
mod queue;
mod semaphore;

pub use lazymap::LazyMap;
pub use queue::{BacklogQueue, MaxSizeQueue};
pub use semaphore::PrioritySemaphore;
