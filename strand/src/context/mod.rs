//! Execution context: scoped key/value snapshots that follow a logical
//! flow of work across suspensions, timers and thread hops.
//!
//! ```rust,ignore
//! use strand::context;
//!
//! let _outer = context::enter([("request", "r-17")]);
//! {
//!     let _inner = context::enter([("user", "ada")]);
//!     assert_eq!(context::get("request")?, "r-17");
//!     assert!(context::has("user"));
//! }
//! assert!(!context::has("user"));
//! ```
//!
//! Values entered inside a task stay with that task: the driver installs
//! the task's snapshot before each resume and takes it back afterwards, so
//! two interleaved tasks never observe each other's values.

mod continuation;
mod snapshot;
mod value;

pub use continuation::Continuation;
pub use snapshot::{Context, ContextGuard};
pub use value::Value;

use crate::error::Result;

use std::cell::RefCell;
use std::collections::BTreeMap;

thread_local! {
    /// Snapshot current on this thread. `None` stands for the root.
    pub(crate) static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// Enters a scope layered on the current snapshot.
///
/// The scope ends when the returned guard is dropped.
pub fn enter<I, K, V>(values: I) -> ContextGuard
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    Context::enter(values)
}

/// Looks up `key` in the current snapshot.
///
/// Fails with [`Error::KeyNotFound`](crate::Error::KeyNotFound) when no
/// enclosing scope defines it.
pub fn get(key: &str) -> Result<Value> {
    Context::current().get(key)
}

pub fn has(key: &str) -> bool {
    Context::current().has(key)
}

/// The merged mapping of the current snapshot.
pub fn all() -> BTreeMap<String, Value> {
    Context::current().all().clone()
}
