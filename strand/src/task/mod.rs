//! The task driver: runs coroutines that suspend on [`Deferred`]s.
//!
//! A task resumes its coroutine, and every time the coroutine awaits a
//! deferred the driver registers itself on it and steps again once it
//! settles. Deferreds that are already settled are unrolled in a loop, so
//! long chains of immediate results never grow the stack.
//!
//! Each task carries its own [`Context`](crate::Context) snapshot: it is
//! installed around every resume and saved back afterwards, whichever
//! thread the resume happens on. The task's result settles under the
//! snapshot that was current when the task was created.
//!
//! # Examples
//!
//! ```rust,ignore
//! use strand::task;
//!
//! let total = task::inline(async move {
//!     let a = first.await?;
//!     let b = second.await?;
//!     Ok(a + b)
//! })?;
//!
//! match total {
//!     Inline::Ready(v) => println!("finished synchronously: {v}"),
//!     Inline::Pending(d) => d.on_complete(|v| println!("{v}"), |e| eprintln!("{e}")),
//! }
//! ```

mod core;
mod handle;
pub(crate) mod inline;
mod state;
mod step;

pub use handle::Task;
pub use inline::AsyncStep;
pub use state::TaskState;
pub use step::{Coroutine, FromFn, Resume, Step, from_fn};

use crate::deferred::Deferred;
use crate::error::Result;

use std::future::{Future, IntoFuture};
use std::sync::Arc;

/// The outcome of [`run`]: either available right away, or pending.
#[derive(Debug, Clone)]
pub enum Inline<T> {
    /// The coroutine finished without ever truly suspending.
    Ready(T),
    /// The coroutine suspended; the deferred settles with its result.
    Pending(Deferred<T>),
}

impl<T: Clone + Send + 'static> Inline<T> {
    /// Returns `true` if the value was available without suspending.
    pub fn is_ready(&self) -> bool {
        matches!(self, Inline::Ready(_))
    }

    /// The value, if it was available synchronously.
    ///
    /// # Returns
    /// `None` for a pending result. The deferred is dropped, which does not
    /// cancel the work behind it.
    pub fn ready(self) -> Option<T> {
        match self {
            Inline::Ready(value) => Some(value),
            Inline::Pending(_) => None,
        }
    }

    /// Converts into a deferred, wrapping a ready value in a resolved one.
    pub fn into_deferred(self) -> Deferred<T> {
        match self {
            Inline::Ready(value) => Deferred::resolved(value),
            Inline::Pending(deferred) => deferred,
        }
    }
}

impl<T: Clone + Send + 'static> From<Inline<T>> for Deferred<T> {
    fn from(inline: Inline<T>) -> Self {
        inline.into_deferred()
    }
}

impl<T: Clone + Send + 'static> IntoFuture for Inline<T> {
    type Output = Result<T>;
    type IntoFuture = Deferred<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.into_deferred()
    }
}

/// Starts a task and returns a handle to it.
///
/// The coroutine runs synchronously on the calling thread up to its first
/// genuine suspension before `start` returns.
pub fn start<C: Coroutine>(coroutine: C) -> Task<C::Output> {
    let core = core::TaskCore::start(coroutine);
    let result = core.result().clone();

    Task {
        control: core as Arc<dyn core::TaskControl>,
        result,
    }
}

/// Starts a task and returns the deferred settled with its result.
pub fn spawn<C: Coroutine>(coroutine: C) -> Deferred<C::Output> {
    start(coroutine).into_deferred()
}

/// Starts a task, returning its result directly when it is available
/// without suspending.
///
/// A coroutine that fails before suspending returns `Err` right away.
pub fn run<C: Coroutine>(coroutine: C) -> Result<Inline<C::Output>> {
    let deferred = spawn(coroutine);

    match deferred.result() {
        Some(Ok(value)) => Ok(Inline::Ready(value)),
        Some(Err(error)) => Err(error),
        None => Ok(Inline::Pending(deferred)),
    }
}

/// Runs an `async` block as a task; see [`run`].
///
/// Inside the block, `.await` on a [`Deferred`] suspends the task, and
/// cancelling the task cancels the deferred being awaited.
pub fn inline<F, T>(future: F) -> Result<Inline<T>>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Clone + Send + 'static,
{
    run(AsyncStep::new(future))
}
