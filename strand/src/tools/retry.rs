use crate::deferred::Deferred;
use crate::error::{Error, Result};
use crate::task::{self, Coroutine, Resume, Step};
use crate::time::Sleeper;

/// Calls `operation` until it succeeds or `classifier` rejects a failure.
///
/// After each failure, `classifier` decides: `Ok(())` means the failure is
/// transient, so the driver waits on `sleeper` and calls `operation` again;
/// `Err(e)` ends the retry, rejecting the returned deferred with `e`.
/// There is no attempt limit: bound it in the classifier if needed.
///
/// Cancelling the returned deferred cancels the attempt or the sleep in
/// progress.
///
/// # Examples
///
/// ```rust,ignore
/// let sleeper = Backoff::new(secs(1), secs(60), secs(5)).sleeper(host.clone());
///
/// let body = tools::retry(
///     move || client.fetch(&url),
///     |error| match error.downcast_ref::<HttpError>() {
///         Some(e) if e.is_transient() => Ok(()),
///         _ => Err(error.clone()),
///     },
///     sleeper,
/// );
/// ```
pub fn retry<T, O, C, S>(operation: O, classifier: C, sleeper: S) -> Deferred<T>
where
    T: Clone + Send + 'static,
    O: FnMut() -> Deferred<T> + Send + 'static,
    C: FnMut(&Error) -> Result<()> + Send + 'static,
    S: Sleeper + 'static,
{
    task::spawn(Retry::new(operation, classifier, sleeper))
}

/// The coroutine behind [`retry`].
pub struct Retry<O, C, S> {
    operation: O,
    classifier: C,
    sleeper: S,
    attempts: u32,
    sleeping: bool,
}

/// What a [`Retry`] waits on.
#[derive(Debug, Clone)]
pub enum Attempt<T> {
    /// The operation succeeded.
    Succeeded(T),
    /// The pause between attempts is over.
    Slept,
}

impl<O, C, S> Retry<O, C, S> {
    pub fn new(operation: O, classifier: C, sleeper: S) -> Self {
        Self {
            operation,
            classifier,
            sleeper,
            attempts: 0,
            sleeping: false,
        }
    }

    /// Number of times the operation was called so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl<T, O, C, S> Retry<O, C, S>
where
    T: Clone + Send + 'static,
    O: FnMut() -> Deferred<T> + Send + 'static,
    S: Sleeper + 'static,
{
    fn attempt(&mut self) -> Step<Attempt<T>, T> {
        self.attempts += 1;
        self.sleeping = false;
        tracing::debug!(attempt = self.attempts, "calling retried operation");

        Step::Await((self.operation)().map(Attempt::Succeeded))
    }
}

impl<T, O, C, S> Coroutine for Retry<O, C, S>
where
    T: Clone + Send + 'static,
    O: FnMut() -> Deferred<T> + Send + 'static,
    C: FnMut(&Error) -> Result<()> + Send + 'static,
    S: Sleeper + 'static,
{
    type Value = Attempt<T>;
    type Output = T;

    fn resume(&mut self, input: Resume<Attempt<T>>) -> Step<Attempt<T>, T> {
        match input {
            Resume::Start | Resume::Value(Attempt::Slept) => self.attempt(),
            Resume::Value(Attempt::Succeeded(value)) => Step::Done(value),
            Resume::Error(error) if self.sleeping => Step::Failed(error),
            Resume::Error(error) => match (self.classifier)(&error) {
                Ok(()) => {
                    tracing::debug!(attempt = self.attempts, %error, "attempt failed, will retry");
                    self.sleeping = true;
                    Step::Await(self.sleeper.sleep().map(|()| Attempt::Slept))
                }
                Err(error) => {
                    tracing::debug!(attempt = self.attempts, %error, "attempt failed for good");
                    Step::Failed(error)
                }
            },
        }
    }

    fn name(&self) -> &'static str {
        "retry"
    }
}
