use super::state::TaskState;
use super::step::{Coroutine, Resume, Step};
use crate::context::Context;
use crate::deferred::Deferred;
use crate::error::{Error, Result};
use crate::host::panic_message;

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Type-erased view of a running task, used by the public handle.
pub(crate) trait TaskControl: Send + Sync {
    fn id(&self) -> u64;
    fn name(&self) -> &'static str;
    fn state(&self) -> TaskState;
    fn is_suspended(&self) -> bool;
}

/// The driver of one coroutine.
///
/// The driver is a trampoline: awaited deferreds that are already settled
/// (or settle while the driver is still registering on them) are fed back
/// into the coroutine by looping, not by recursing, so any number of
/// immediate results runs in constant stack space.
pub(crate) struct TaskCore<C: Coroutine> {
    id: u64,
    name: &'static str,

    /// Trampoline state. Never held while the coroutine runs.
    control: Mutex<Control<C::Value>>,

    /// `None` once the task finished or was cancelled.
    coroutine: Mutex<Option<C>>,

    /// The task's own snapshot, installed around every resume.
    context: Mutex<Context>,

    /// Snapshot current when the task was created. The result settles
    /// under it.
    creation: Context,

    result: Deferred<C::Output>,
}

/// How a run of the trampoline ended.
enum Exit<T> {
    Finished(Result<T>),
    Suspended,
    Cancelled,
}

struct Control<V> {
    state: TaskState,

    /// Deferred the suspended task waits on.
    current: Option<Deferred<V>>,

    /// Result that arrived while the driver was still registering.
    pending: Option<Result<V>>,
}

impl<C: Coroutine> TaskCore<C> {
    /// Creates the task and drives it up to its first real suspension.
    pub(crate) fn start(coroutine: C) -> Arc<Self> {
        let creation = Context::current();
        let result = Deferred::new();

        let core = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            name: coroutine.name(),
            control: Mutex::new(Control {
                state: TaskState::Normal,
                current: None,
                pending: None,
            }),
            coroutine: Mutex::new(Some(coroutine)),
            context: Mutex::new(creation.clone()),
            creation,
            result: result.clone(),
        });

        let weak = Arc::downgrade(&core);
        result.set_canceller(move |_| {
            if let Some(core) = weak.upgrade() {
                core.interrupt();
            }
        });

        let weak: Weak<Self> = Arc::downgrade(&core);
        result.set_describer(move || match weak.upgrade() {
            Some(core) => core.describe(),
            None => "<dropped task>".to_owned(),
        });

        tracing::debug!(id = core.id, name = core.name, "task started");
        core.step(Resume::Start);
        core
    }

    pub(crate) fn result(&self) -> &Deferred<C::Output> {
        &self.result
    }

    /// Runs the coroutine until it finishes, fails or truly suspends.
    fn step(self: &Arc<Self>, input: Resume<C::Value>) {
        let mut slot = self.coroutine.lock();
        let exit = self.drive(&mut slot, input);

        let coroutine = match exit {
            Exit::Suspended => None,
            Exit::Finished(_) | Exit::Cancelled => slot.take(),
        };
        drop(slot);

        match exit {
            Exit::Finished(result) => self.finish(coroutine, result),
            Exit::Cancelled => self.dispose(coroutine),
            Exit::Suspended => self.dispose_if_cancelled(),
        }
    }

    /// The trampoline. `slot` stays locked for the whole run.
    fn drive(self: &Arc<Self>, slot: &mut Option<C>, mut input: Resume<C::Value>) -> Exit<C::Output> {
        loop {
            if self.control.lock().state == TaskState::Cancelled {
                return Exit::Cancelled;
            }

            let Some(coroutine) = slot.as_mut() else {
                return Exit::Cancelled;
            };

            let step = {
                let span = tracing::trace_span!("task", id = self.id, name = self.name);
                let _span = span.enter();

                let _guard = self.context.lock().clone().install();
                let step = match panic::catch_unwind(AssertUnwindSafe(|| coroutine.resume(input))) {
                    Ok(step) => step,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::warn!(id = self.id, name = self.name, %message, "task panicked");
                        Step::Failed(Error::Panicked(message))
                    }
                };
                *self.context.lock() = Context::current();
                step
            };

            let deferred = match step {
                Step::Done(value) => return Exit::Finished(Ok(value)),
                Step::Failed(error) => return Exit::Finished(Err(error)),
                Step::Await(deferred) => deferred,
            };

            {
                let mut control = self.control.lock();
                if control.state == TaskState::Cancelled {
                    drop(control);
                    deferred.cancel();
                    return Exit::Cancelled;
                }
                control.state = TaskState::Waiting;
            }

            let task = Arc::clone(self);
            deferred.on_settled(move |result| task.handle_result(result));

            let mut control = self.control.lock();
            match control.state {
                TaskState::Waiting => {
                    control.state = TaskState::Normal;
                    control.current = Some(deferred);
                    tracing::trace!(id = self.id, name = self.name, "task suspended");
                    return Exit::Suspended;
                }
                TaskState::Normal => match control.pending.take() {
                    Some(result) => input = result.into(),
                    None => return Exit::Suspended,
                },
                TaskState::Cancelled => {
                    // Cancelled while registering: `interrupt` found no current
                    // deferred to forward to.
                    drop(control);
                    deferred.cancel();
                    return Exit::Cancelled;
                }
                TaskState::Finished => return Exit::Suspended,
            }
        }
    }

    /// Disposes a coroutine that `interrupt` could not reach because a step
    /// was still holding it.
    fn dispose_if_cancelled(&self) {
        if self.control.lock().state == TaskState::Cancelled {
            let coroutine = self.coroutine.lock().take();
            self.dispose(coroutine);
        }
    }

    /// Observer registered on every awaited deferred.
    fn handle_result(self: Arc<Self>, result: Result<C::Value>) {
        {
            let mut control = self.control.lock();
            match control.state {
                TaskState::Waiting => {
                    control.state = TaskState::Normal;
                    control.pending = Some(result);
                    return;
                }
                TaskState::Normal => {
                    control.current = None;
                }
                TaskState::Cancelled | TaskState::Finished => return,
            }
        }

        self.step(result.into());
    }

    fn finish(&self, coroutine: Option<C>, result: Result<C::Output>) {
        {
            let mut control = self.control.lock();
            if control.state == TaskState::Cancelled {
                drop(control);
                self.dispose(coroutine);
                return;
            }
            control.state = TaskState::Finished;
            control.current = None;
        }

        self.dispose(coroutine);

        tracing::debug!(id = self.id, name = self.name, ok = result.is_ok(), "task finished");
        let _ = self.creation.scope(|| self.result.offer(result));
    }

    /// Cancels the task: stops driving it and cancels what it waits on.
    fn interrupt(&self) {
        let current = {
            let mut control = self.control.lock();
            if control.state.is_terminal() {
                return;
            }
            control.state = TaskState::Cancelled;
            control.pending = None;
            control.current.take()
        };

        tracing::debug!(id = self.id, name = self.name, "task cancelled");

        if let Some(current) = current {
            current.cancel();
        }

        // Fails while a step holds the coroutine; that step disposes it on exit.
        let coroutine = self.coroutine.try_lock().and_then(|mut slot| slot.take());
        self.dispose(coroutine);
    }

    /// Drops the coroutine under the task's own snapshot, so scopes it
    /// still holds unwind into the task rather than the calling thread.
    fn dispose(&self, coroutine: Option<C>) {
        if let Some(coroutine) = coroutine {
            let context = self.context.lock().clone();
            context.scope(move || drop(coroutine));
        }
    }

    fn describe(&self) -> String {
        let (state, current) = {
            let control = self.control.lock();
            (control.state, control.current.clone())
        };

        match current {
            Some(current) => format!("{}:{} -> {}", self.name, state, current.describe()),
            None => format!("{}:{}", self.name, state),
        }
    }
}

impl<C: Coroutine> TaskControl for TaskCore<C> {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn state(&self) -> TaskState {
        self.control.lock().state
    }

    fn is_suspended(&self) -> bool {
        self.control.lock().current.is_some()
    }
}

impl<C: Coroutine> Drop for TaskCore<C> {
    fn drop(&mut self) {
        let coroutine = self.coroutine.get_mut().take();
        self.dispose(coroutine);
    }
}
