use crate::deferred::Deferred;
use crate::error::{Error, Result};

use std::marker::PhantomData;

/// A resumable computation driven by the task driver.
///
/// Each call to [`resume`](Coroutine::resume) runs the computation up to
/// its next suspension point and reports what happened as a [`Step`]. The
/// driver feeds the outcome of every awaited deferred back through the
/// next `resume` call.
///
/// Most code never implements this by hand: `async` blocks are adapted by
/// [`inline`](super::inline) and the `#[strand::coroutine]` attribute.
/// Hand-written state machines are useful when a computation must
/// suspend on deferreds of a single known type without boxing a future.
pub trait Coroutine: Send + 'static {
    /// Type produced by the deferreds this coroutine awaits.
    type Value: Clone + Send + 'static;

    /// Type of the final result.
    type Output: Clone + Send + 'static;

    /// Runs until the next suspension point.
    fn resume(&mut self, input: Resume<Self::Value>) -> Step<Self::Value, Self::Output>;

    /// Label used in logs and by [`Deferred::describe`].
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// What a coroutine reports after running one step.
#[derive(Debug)]
pub enum Step<V, T> {
    /// Finished with a value.
    Done(T),
    /// Finished with an error.
    Failed(Error),
    /// Suspended until the deferred settles.
    Await(Deferred<V>),
}

impl<V, T> From<Result<T>> for Step<V, T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Step::Done(value),
            Err(error) => Step::Failed(error),
        }
    }
}

/// What a coroutine is resumed with.
#[derive(Debug, Clone)]
pub enum Resume<V> {
    /// First resume.
    Start,
    /// The awaited deferred resolved.
    Value(V),
    /// The awaited deferred was rejected.
    Error(Error),
}

impl<V> Resume<V> {
    /// The outcome of the previous await, `None` on the first resume.
    pub fn into_result(self) -> Option<Result<V>> {
        match self {
            Resume::Start => None,
            Resume::Value(value) => Some(Ok(value)),
            Resume::Error(error) => Some(Err(error)),
        }
    }
}

impl<V> From<Result<V>> for Resume<V> {
    fn from(result: Result<V>) -> Self {
        match result {
            Ok(value) => Resume::Value(value),
            Err(error) => Resume::Error(error),
        }
    }
}

/// A coroutine backed by a closure. Created by [`from_fn`].
pub struct FromFn<F, V, T> {
    name: &'static str,
    f: F,
    _marker: PhantomData<fn() -> (V, T)>,
}

/// Builds a coroutine from a closure called on every resume.
///
/// ```rust,ignore
/// let source = Deferred::<u32>::new();
/// let coroutine = task::from_fn("double", move |input: Resume<u32>| match input.into_result() {
///     None => Step::Await(source.clone()),
///     Some(Ok(n)) => Step::Done(n * 2),
///     Some(Err(e)) => Step::Failed(e),
/// });
/// ```
pub fn from_fn<F, V, T>(name: &'static str, f: F) -> FromFn<F, V, T>
where
    F: FnMut(Resume<V>) -> Step<V, T> + Send + 'static,
    V: Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    FromFn {
        name,
        f,
        _marker: PhantomData,
    }
}

impl<F, V, T> Coroutine for FromFn<F, V, T>
where
    F: FnMut(Resume<V>) -> Step<V, T> + Send + 'static,
    V: Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    type Value = V;
    type Output = T;

    fn resume(&mut self, input: Resume<V>) -> Step<V, T> {
        (self.f)(input)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
