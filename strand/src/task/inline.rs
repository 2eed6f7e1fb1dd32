use super::step::{Coroutine, Resume, Step};
use crate::deferred::Deferred;
use crate::error::Result;

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

type Cancel = Box<dyn FnOnce() + Send>;
type Label = Box<dyn Fn() -> Option<String> + Send + Sync>;

/// Deferreds polled during one `AsyncStep::resume`.
#[derive(Default)]
struct Tracked {
    cancels: Vec<Cancel>,
    labels: Vec<Label>,
}

thread_local! {
    /// What the async step being polled on this thread waits on. `None`
    /// outside of a resume.
    static TRACKED: RefCell<Option<Tracked>> = const { RefCell::new(None) };
}

/// Records `deferred` as awaited by the async step being polled on this
/// thread, so that cancelling the task cancels it and describing the task
/// describes it.
pub(crate) fn track<T: Clone + Send + 'static>(deferred: &Deferred<T>) {
    TRACKED.with(|tracked| {
        if let Some(tracked) = tracked.borrow_mut().as_mut() {
            let weak = deferred.downgrade();
            tracked.cancels.push(Box::new(move || {
                if let Some(deferred) = weak.upgrade() {
                    deferred.cancel();
                }
            }));

            let weak = deferred.downgrade();
            tracked
                .labels
                .push(Box::new(move || weak.upgrade().map(|deferred| deferred.describe())));
        }
    });
}

/// Adapts a `Future` into a [`Coroutine`].
///
/// Each resume polls the future once. When it returns `Pending` the step
/// awaits a fresh signal deferred that the future's waker resolves, so the
/// driver resumes the coroutine on whichever thread wakes it. Cancelling
/// the signal cancels every [`Deferred`] the future was waiting on during
/// that poll, and describing it describes them.
pub struct AsyncStep<T> {
    name: &'static str,
    future: Pin<Box<dyn Future<Output = Result<T>> + Send>>,
}

impl<T> AsyncStep<T> {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self::named("inline", future)
    }

    pub fn named<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name,
            future: Box::pin(future),
        }
    }
}

impl<T: Clone + Send + 'static> Coroutine for AsyncStep<T> {
    type Value = ();
    type Output = T;

    fn resume(&mut self, _input: Resume<()>) -> Step<(), T> {
        let signal = Deferred::new();
        let waker = Waker::from(Arc::new(Signal(signal.clone())));
        let mut cx = Context::from_waker(&waker);

        let outer = TRACKED.with(|tracked| tracked.replace(Some(Tracked::default())));
        let poll = panic::catch_unwind(AssertUnwindSafe(|| self.future.as_mut().poll(&mut cx)));
        let tracked = TRACKED.with(|tracked| tracked.replace(outer)).unwrap_or_default();

        let poll = match poll {
            Ok(poll) => poll,
            Err(payload) => panic::resume_unwind(payload),
        };

        match poll {
            Poll::Ready(result) => result.into(),
            Poll::Pending => {
                let Tracked { cancels, labels } = tracked;

                signal.set_describer(move || {
                    let awaited: Vec<String> = labels.iter().filter_map(|label| label()).collect();
                    match awaited.as_slice() {
                        [] => "await".to_owned(),
                        _ => format!("await {}", awaited.join(", ")),
                    }
                });
                signal.set_canceller(move |_| {
                    for cancel in cancels {
                        cancel();
                    }
                });
                Step::Await(signal)
            }
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for AsyncStep<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncStep").field("name", &self.name).finish()
    }
}

struct Signal(Deferred<()>);

impl Wake for Signal {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        // Later wakes of an already-signalled step are irrelevant.
        let _ = self.0.offer(Ok(()));
    }
}
