use super::core::TaskControl;
use super::state::TaskState;
use crate::deferred::Deferred;

use std::fmt;
use std::sync::Arc;

/// A handle to a task started with [`start`](super::start).
///
/// Dropping the handle does **not** cancel the task; the task keeps
/// running for as long as something it waits on can still wake it.
pub struct Task<T> {
    pub(crate) control: Arc<dyn TaskControl>,
    pub(crate) result: Deferred<T>,
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Process-unique task id, also recorded on the `task` tracing span.
    pub fn id(&self) -> u64 {
        self.control.id()
    }

    pub fn name(&self) -> &'static str {
        self.control.name()
    }

    pub fn state(&self) -> TaskState {
        self.control.state()
    }

    /// Returns `true` while the task waits on a deferred.
    pub fn is_suspended(&self) -> bool {
        self.control.is_suspended()
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_settled()
    }

    /// Cancels the task.
    ///
    /// The deferred the task waits on is cancelled, the coroutine is never
    /// resumed again and the task's result is rejected with
    /// [`Error::Cancelled`](crate::Error::Cancelled). No-op once finished.
    pub fn cancel(&self) {
        self.result.cancel();
    }

    /// The deferred settled with the task's result.
    pub fn deferred(&self) -> Deferred<T> {
        self.result.clone()
    }

    pub fn into_deferred(self) -> Deferred<T> {
        self.result
    }

    /// `name:state -> [elapsed] awaited`, for finding stuck tasks.
    pub fn describe(&self) -> String {
        self.result.describe()
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.control.id())
            .field("name", &self.control.name())
            .field("state", &self.control.state())
            .finish()
    }
}
