//! # Strand
//!
//! **Strand** is a small toolkit for writing cooperative, event-driven code
//! as straight-line coroutines. It is built around three pieces:
//!
//! - [`Deferred`]: a single-assignment result that is settled once and
//!   notifies its observers in order;
//! - the [`task`] driver: runs a coroutine, suspending it on every pending
//!   deferred it awaits and resuming it when that deferred settles, in
//!   constant stack space;
//! - the execution [`Context`]: scoped key/value snapshots that follow a
//!   task across suspensions and thread hand-offs.
//!
//! On top of those sit a bounded queue with waiting consumers, a priority
//! semaphore, a lazy map, timers and a retry driver. Nothing in Strand owns
//! a thread: timers and blocking work go through a [`host::Host`], either
//! the provided [`host::ThreadHost`] or your own event loop.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use strand::host::ThreadHost;
//! use strand::{Deferred, Inline, time};
//!
//! #[strand::coroutine]
//! async fn greet(host: std::sync::Arc<ThreadHost>, name: String) -> strand::Result<String> {
//!     let _scope = strand::context::enter([("user", name.as_str())]);
//!     time::sleep(&*host, Duration::from_millis(100)).await?;
//!     Ok(format!("hello {}", strand::context::get("user")?))
//! }
//!
//! let host = std::sync::Arc::new(ThreadHost::new());
//! let task_host = host.clone();
//! let greeting = host.block_on(move || match greet(task_host, "ada".into()) {
//!     Ok(inline) => inline.into_deferred(),
//!     Err(error) => strand::deferred::fail(error),
//! })?;
//! ```
//!
//! ## Modules
//!
//! - [`deferred`]: the single-assignment result and one-shot events
//! - [`context`]: scoped execution context
//! - [`task`]: the coroutine driver
//! - [`sync`]: queues, priority semaphore, lazy map
//! - [`time`]: sleep, timeout and backoff
//! - [`tools`]: the retry driver
//! - [`host`]: event loops that run timers and blocking work

mod error;

pub mod context;
pub mod deferred;
pub mod host;
pub mod sync;
pub mod task;
pub mod time;
pub mod tools;

pub use context::{Context, ContextGuard, Value};
pub use deferred::Deferred;
pub use error::{Error, Result};
pub use task::Inline;

pub use strand_macros::*;
