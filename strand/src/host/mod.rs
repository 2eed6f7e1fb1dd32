//! Hosts: the event loops that drive tasks.
//!
//! The task driver never blocks and never spawns threads. Everything that
//! has to happen *later* (a timer) or *elsewhere* (a blocking call) is
//! handed to a [`Host`] as a [`Continuation`], which carries the context
//! that was current at hand-off and reinstates it when it runs.
//!
//! Two hosts are provided:
//! - [`ThreadHost`]: a loop thread with a timer heap plus a worker pool.
//! - [`ManualHost`]: virtual time advanced by hand, for tests.

mod builder;
mod command;
mod manual;
mod pool;
mod thread;
mod timer;

pub use builder::HostBuilder;
pub use manual::ManualHost;
pub use thread::ThreadHost;
pub use timer::TimerHandle;

use crate::context::{Context, Continuation};
use crate::deferred::Deferred;
use crate::error::{Error, Result};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Work run on a host worker thread. Returns what the host then runs back
/// on its loop.
pub type Job = Box<dyn FnOnce() -> Continuation + Send>;

/// An event loop able to run continuations later and blocking work elsewhere.
pub trait Host: Send + Sync {
    /// Runs `continuation` on the loop once `delay` has elapsed.
    ///
    /// Fails with [`Error::HostShutdown`] if the host stopped.
    fn schedule_after(&self, delay: Duration, continuation: Continuation) -> Result<TimerHandle>;

    /// Runs `job` on a worker thread, then the continuation it returns on
    /// the loop.
    fn run_on_worker(&self, job: Job) -> Result<()>;

    /// The host's notion of the current time.
    fn now(&self) -> Instant;
}

impl<H: Host + ?Sized> Host for Arc<H> {
    fn schedule_after(&self, delay: Duration, continuation: Continuation) -> Result<TimerHandle> {
        (**self).schedule_after(delay, continuation)
    }

    fn run_on_worker(&self, job: Job) -> Result<()> {
        (**self).run_on_worker(job)
    }

    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Runs a blocking closure on a host worker.
///
/// The closure runs under the caller's context, and the returned deferred
/// settles back on the host loop under that same context. A panic inside
/// the closure rejects the deferred with [`Error::WorkerPanicked`].
///
/// Cancelling the deferred does not interrupt the closure; its result is
/// dropped.
///
/// # Arguments
/// * `host` - Host whose workers run `f` and whose loop settles the result
/// * `f` - The blocking closure
///
/// # Returns
/// A deferred settled with the closure's result, or rejected right away with
/// [`Error::HostShutdown`] if the host no longer accepts work.
///
/// ```rust,ignore
/// let contents = host::defer_to_worker(&host, move || {
///     std::fs::read_to_string(path).map_err(Error::failure)
/// });
/// ```
pub fn defer_to_worker<H, T, F>(host: &H, f: F) -> Deferred<T>
where
    H: Host + ?Sized,
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let deferred = Deferred::new();
    let target = deferred.clone();
    let context = Context::current();

    let job: Job = Box::new(move || {
        let result = match panic::catch_unwind(AssertUnwindSafe(|| context.scope(f))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(%message, "worker job panicked");
                Err(Error::WorkerPanicked(message))
            }
        };

        Continuation::with_context(context, move || {
            let _ = target.offer(result);
        })
    });

    if let Err(error) = host.run_on_worker(job) {
        let _ = deferred.offer(Err(error));
    }

    deferred
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
