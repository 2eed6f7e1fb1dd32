use crate::error::{Error, Result};
use crate::task::inline;

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

type Observer<T> = Box<dyn FnOnce(Result<T>) + Send>;
type Canceller<T> = Box<dyn FnOnce(&Deferred<T>) + Send>;
type Describer = Arc<dyn Fn() -> String + Send + Sync>;

/// A single-assignment asynchronous result.
///
/// A `Deferred<T>` starts out pending and is settled exactly once, either
/// resolved with a `T` or rejected with an [`Error`]. Observers registered
/// while pending are invoked in registration order when it settles, and
/// are released right after. Observers registered after settlement are
/// invoked immediately on the calling thread.
///
/// Cloning a `Deferred` produces another handle to the same slot: the
/// producer keeps one handle to settle it, every awaiter keeps one to
/// observe it.
///
/// Every observer receives its own copy of the result, hence the `Clone`
/// bound on most methods; wrap non-cloneable payloads in an `Arc`.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

/// Weak handle used by cancellers and describers to avoid reference cycles.
pub(crate) struct WeakDeferred<T> {
    inner: Weak<Inner<T>>,
}

struct Inner<T> {
    /// Mutable state, never held while user callbacks run.
    state: Mutex<State<T>>,

    /// Creation time, reported by [`Deferred::describe`].
    created: Instant,
}

struct State<T> {
    /// `None` while pending.
    result: Option<Result<T>>,

    /// Callbacks waiting for the result, in registration order.
    observers: Vec<Observer<T>>,

    /// Turns a cancellation request into a settlement.
    canceller: Option<Canceller<T>>,

    /// Produces the label used by [`Deferred::describe`].
    describer: Option<Describer>,

    /// Set once `cancel` was requested on a pending deferred. From then on
    /// the first settlement wins and later ones are ignored instead of
    /// faulting, since the producer cannot know it lost the race.
    cancel_requested: bool,
}

impl<T> Deferred<T> {
    /// Creates a pending deferred with no canceller.
    pub fn new() -> Self {
        Self::from_state(State {
            result: None,
            observers: Vec::new(),
            canceller: None,
            describer: None,
            cancel_requested: false,
        })
    }

    /// Creates a pending deferred whose cancellation is handled by `canceller`.
    ///
    /// The canceller runs at most once, only if [`cancel`](Self::cancel) is
    /// called while the deferred is still pending. If it does not settle the
    /// deferred itself, the deferred is rejected with [`Error::Cancelled`]
    /// right after it returns.
    pub fn with_canceller<F>(canceller: F) -> Self
    where
        F: FnOnce(&Deferred<T>) + Send + 'static,
    {
        let deferred = Self::new();
        deferred.inner.state.lock().canceller = Some(Box::new(canceller));
        deferred
    }

    fn from_state(state: State<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                created: Instant::now(),
            }),
        }
    }

    /// Replaces the canceller of a pending deferred.
    ///
    /// Has no effect once the deferred is settled.
    pub fn set_canceller<F>(&self, canceller: F)
    where
        F: FnOnce(&Deferred<T>) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.result.is_none() {
            state.canceller = Some(Box::new(canceller));
        }
    }

    /// Sets the label producer used by [`describe`](Self::describe).
    pub fn set_describer<F>(&self, describer: F)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.inner.state.lock().describer = Some(Arc::new(describer));
    }

    /// Returns `true` once the deferred is resolved or rejected.
    pub fn is_settled(&self) -> bool {
        self.inner.state.lock().result.is_some()
    }

    /// Returns `true` if cancellation was requested while the deferred was pending.
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancel_requested
    }

    /// Time elapsed since the deferred was created.
    pub fn elapsed(&self) -> Duration {
        self.inner.created.elapsed()
    }

    /// Returns `true` if both handles point at the same slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakDeferred<T> {
        WeakDeferred {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Requests cancellation.
    ///
    /// No-op on a settled deferred. Otherwise the canceller (if any) runs,
    /// and the deferred is rejected with [`Error::Cancelled`] if it is still
    /// pending afterwards, so a cancelled deferred never stays pending.
    pub fn cancel(&self) {
        let canceller = {
            let mut state = self.inner.state.lock();
            if state.result.is_some() {
                return;
            }
            state.cancel_requested = true;
            state.canceller.take()
        };

        if let Some(canceller) = canceller {
            canceller(self);
        }

        let fired = {
            let mut state = self.inner.state.lock();
            if state.result.is_some() {
                None
            } else {
                state.result = Some(Err(Error::Cancelled));
                Some(mem::take(&mut state.observers))
            }
        };

        if let Some(observers) = fired {
            tracing::trace!(observers = observers.len(), "deferred cancelled");
            for observer in observers {
                observer(Err(Error::Cancelled));
            }
        }
    }

    /// Describes the deferred for stuck-task introspection.
    ///
    /// The format is `[elapsed] label`, with a `*` before the label once the
    /// deferred is settled. Tasks install a describer naming their coroutine
    /// and the deferred they currently wait on.
    pub fn describe(&self) -> String {
        let (settled, describer) = {
            let state = self.inner.state.lock();
            (state.result.is_some(), state.describer.clone())
        };

        let label = match describer {
            Some(describer) => describer(),
            None => format!("Deferred({:x})", Arc::as_ptr(&self.inner) as *const () as usize),
        };

        format!(
            "[{:.1}s] {}{}",
            self.elapsed().as_secs_f64(),
            if settled { "*" } else { "" },
            label
        )
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Creates a deferred already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let deferred = Self::new();
        deferred.inner.state.lock().result = Some(Ok(value));
        deferred
    }

    /// Creates a deferred already rejected with `error`.
    pub fn rejected(error: Error) -> Self {
        let deferred = Self::new();
        deferred.inner.state.lock().result = Some(Err(error));
        deferred
    }

    /// Resolves the deferred, firing every observer in registration order.
    ///
    /// # Panics
    ///
    /// Panics with [`Error::DoubleResolution`] if the deferred is already
    /// settled (unless it lost a race against [`cancel`](Self::cancel)).
    #[track_caller]
    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    /// Rejects the deferred, firing every observer in registration order.
    ///
    /// # Panics
    ///
    /// Panics with [`Error::DoubleResolution`] if the deferred is already settled.
    #[track_caller]
    pub fn reject(&self, error: Error) {
        self.settle(Err(error));
    }

    /// Settles the deferred with `result`.
    ///
    /// # Panics
    ///
    /// Panics with [`Error::DoubleResolution`] if the deferred is already settled.
    #[track_caller]
    pub fn settle(&self, result: Result<T>) {
        if let Err(error) = self.try_settle(result) {
            panic!("{error}");
        }
    }

    /// Non-panicking counterpart of [`resolve`](Self::resolve).
    pub fn try_resolve(&self, value: T) -> Result<()> {
        self.try_settle(Ok(value))
    }

    /// Non-panicking counterpart of [`reject`](Self::reject).
    pub fn try_reject(&self, error: Error) -> Result<()> {
        self.try_settle(Err(error))
    }

    /// Non-panicking counterpart of [`settle`](Self::settle).
    ///
    /// A settlement arriving after a cancellation already settled the
    /// deferred is ignored and reported as success.
    pub fn try_settle(&self, result: Result<T>) -> Result<()> {
        match self.offer(result) {
            Offer::Accepted | Offer::Ignored => Ok(()),
            Offer::AlreadySettled => Err(Error::DoubleResolution),
        }
    }

    /// Settles the deferred and reports what happened to the result.
    pub(crate) fn offer(&self, result: Result<T>) -> Offer {
        let observers = {
            let mut state = self.inner.state.lock();
            if state.result.is_some() {
                if state.cancel_requested {
                    tracing::trace!("late settlement of a cancelled deferred ignored");
                    return Offer::Ignored;
                }
                return Offer::AlreadySettled;
            }

            state.result = Some(result.clone());
            state.canceller = None;
            mem::take(&mut state.observers)
        };

        fire(observers, result);
        Offer::Accepted
    }

    /// Registers an observer receiving the terminal result.
    ///
    /// Runs `observer` immediately when the deferred is already settled.
    pub fn on_settled<F>(&self, observer: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let ready = {
            let mut state = self.inner.state.lock();
            match &state.result {
                Some(result) => result.clone(),
                None => {
                    state.observers.push(Box::new(observer));
                    return;
                }
            }
        };

        observer(ready);
    }

    /// Registers a success/error observer pair as a single entry.
    pub fn on_complete<S, E>(&self, on_success: S, on_error: E)
    where
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        self.on_settled(move |result| match result {
            Ok(value) => on_success(value),
            Err(error) => on_error(error),
        });
    }

    /// Returns a copy of the terminal result, or `None` while pending.
    pub fn result(&self) -> Option<Result<T>> {
        self.inner.state.lock().result.clone()
    }

    /// Derives a deferred settled with `f(result)`.
    ///
    /// Cancelling the derived deferred cancels `self`.
    pub fn then<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T>) -> Result<U> + Send + 'static,
    {
        let source = self.downgrade();
        let derived = Deferred::with_canceller(move |_: &Deferred<U>| {
            if let Some(source) = source.upgrade() {
                source.cancel();
            }
        });

        let target = derived.clone();
        self.on_settled(move |result| {
            let _ = target.offer(f(result));
        });

        derived
    }

    /// Derives a deferred resolved with `f(value)`; errors pass through.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |result| result.map(f))
    }

    /// Derives a deferred whose rejection is rewritten by `f`.
    pub fn map_err<F>(&self, f: F) -> Deferred<T>
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        self.then(move |result| result.map_err(f))
    }

    /// Forwards this deferred's result into `target` once settled.
    ///
    /// # Panics
    ///
    /// The settlement panics with [`Error::DoubleResolution`] if `target`
    /// was settled by other means. A `target` that was cancelled first
    /// ignores the result.
    pub fn chain(&self, target: &Deferred<T>) {
        let target = target.clone();
        self.on_settled(move |result| target.settle(result));
    }

    /// Derives a `Deferred<()>` that settles when `self` does, with the same
    /// error, and whose cancellation is forwarded to `self`.
    pub fn signal(&self) -> Deferred<()> {
        self.then(|result| result.map(|_| ()))
    }

    /// Blocks the calling OS thread until the deferred settles.
    ///
    /// Must not be called from the thread expected to settle it.
    pub fn wait(&self) -> Result<T> {
        let (transmitter, receiver) = mpsc::channel();

        self.on_settled(move |result| {
            let _ = transmitter.send(result);
        });

        receiver.recv().unwrap_or(Err(Error::Cancelled))
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let (transmitter, receiver) = mpsc::channel();

        self.on_settled(move |result| {
            let _ = transmitter.send(result);
        });

        receiver.recv_timeout(timeout).ok()
    }
}

/// What happened to a settlement offered to a deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// The deferred took the result.
    Accepted,
    /// The deferred was cancelled first; the result was dropped.
    Ignored,
    /// Settling twice: a programming fault.
    AlreadySettled,
}

fn fire<T: Clone>(observers: Vec<Observer<T>>, result: Result<T>) {
    if observers.is_empty() {
        return;
    }

    tracing::trace!(observers = observers.len(), ok = result.is_ok(), "deferred settled");

    let mut observers = observers.into_iter();
    let last = observers.next_back();

    for observer in observers {
        observer(result.clone());
    }

    if let Some(last) = last {
        last(result);
    }
}

impl<T> WeakDeferred<T> {
    pub(crate) fn upgrade(&self) -> Option<Deferred<T>> {
        self.inner.upgrade().map(|inner| Deferred { inner })
    }
}

impl<T> Clone for WeakDeferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl<T: Clone + Send + 'static> Future for Deferred<T> {
    type Output = Result<T>;

    /// Polls the deferred.
    ///
    /// Registers the waker as an observer while pending. When polled from
    /// inside the task driver, also records this deferred as the one being
    /// awaited so that cancelling the task reaches it.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.result() {
            return Poll::Ready(result);
        }

        inline::track(&*self);

        let waker = cx.waker().clone();
        self.on_settled(move |_| waker.wake());

        match self.result() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

/// Returns a deferred already resolved with `value`.
pub fn succeed<T: Clone + Send + 'static>(value: T) -> Deferred<T> {
    Deferred::resolved(value)
}

/// Returns a deferred already rejected with `error`.
pub fn fail<T: Clone + Send + 'static>(error: Error) -> Deferred<T> {
    Deferred::rejected(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone + Send + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |entry: &str| sink.lock().push(entry.to_owned()))
    }

    #[test]
    fn observers_fire_in_registration_order() {
        let (log, push) = recorder();
        let deferred = Deferred::<u32>::new();

        for name in ["a", "b", "c"] {
            let push = push.clone();
            deferred.on_settled(move |r| push(&format!("{name}={}", r.unwrap())));
        }

        assert!(log.lock().is_empty());
        deferred.resolve(7);
        assert_eq!(*log.lock(), vec!["a=7", "b=7", "c=7"]);
    }

    #[test]
    fn late_observer_runs_immediately() {
        let deferred = Deferred::resolved(3);
        let (log, push) = recorder();

        deferred.on_complete(move |v| push(&v.to_string()), |_| unreachable!());

        assert_eq!(*log.lock(), vec!["3"]);
    }

    #[test]
    fn double_resolution_is_reported() {
        let deferred = Deferred::new();
        deferred.resolve(1);

        assert_eq!(deferred.try_resolve(2), Err(Error::DoubleResolution));
        assert_eq!(deferred.try_reject(Error::Cancelled), Err(Error::DoubleResolution));
        assert_eq!(deferred.result(), Some(Ok(1)));
    }

    #[test]
    #[should_panic(expected = "already settled")]
    fn double_resolution_panics() {
        let deferred = Deferred::new();
        deferred.resolve(1);
        deferred.resolve(2);
    }

    #[test]
    fn cancel_without_canceller_rejects() {
        let deferred = Deferred::<u8>::new();
        deferred.cancel();

        assert_eq!(deferred.result(), Some(Err(Error::Cancelled)));
        assert!(deferred.is_cancelled());
    }

    #[test]
    fn canceller_may_resolve() {
        let deferred = Deferred::with_canceller(|d: &Deferred<&'static str>| d.resolve("stopped"));
        deferred.cancel();

        assert_eq!(deferred.result(), Some(Ok("stopped")));
    }

    #[test]
    fn late_settlement_after_cancel_is_ignored() {
        let deferred = Deferred::<u8>::new();
        deferred.cancel();

        assert_eq!(deferred.try_resolve(1), Ok(()));
        assert_eq!(deferred.result(), Some(Err(Error::Cancelled)));
    }

    #[test]
    fn cancel_on_settled_is_noop() {
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let deferred = Deferred::with_canceller(move |_: &Deferred<u8>| *flag.lock() = true);

        deferred.resolve(1);
        deferred.cancel();

        assert!(!*called.lock());
        assert_eq!(deferred.result(), Some(Ok(1)));
    }

    #[test]
    fn map_and_cancel_propagate() {
        let source = Deferred::<u32>::new();
        let doubled = source.map(|v| v * 2);

        source.resolve(21);
        assert_eq!(doubled.result(), Some(Ok(42)));

        let source = Deferred::<u32>::new();
        let derived = source.map(|v| v + 1);
        derived.cancel();

        assert_eq!(source.result(), Some(Err(Error::Cancelled)));
        assert_eq!(derived.result(), Some(Err(Error::Cancelled)));
    }

    #[test]
    fn observers_are_released_after_firing() {
        let payload = Arc::new(());
        let deferred = Deferred::<u8>::new();

        let held = payload.clone();
        deferred.on_settled(move |_| drop(held));
        assert_eq!(Arc::strong_count(&payload), 2);

        deferred.resolve(0);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn wait_blocks_until_settled_elsewhere() {
        let deferred = Deferred::<u64>::new();
        let producer = deferred.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.resolve(99);
        });

        assert_eq!(deferred.wait(), Ok(99));
        handle.join().unwrap();
    }

    #[test]
    fn describe_marks_settlement() {
        let deferred = Deferred::<u8>::new();
        deferred.set_describer(|| "loader".to_owned());

        assert!(deferred.describe().ends_with("] loader"));
        deferred.resolve(1);
        assert!(deferred.describe().ends_with("] *loader"));
    }
}
