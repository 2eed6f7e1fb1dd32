use std::fmt;

/// Lifecycle state of a [`Task`](super::Task).
///
/// ```text
/// Normal -> Waiting -> Normal -> ... -> Finished
///    \         \
///     `---------`--> Cancelled
/// ```
///
/// `Waiting` only lasts while the driver registers its handler on a freshly
/// awaited deferred. A task that genuinely suspended is back in `Normal`
/// with a deferred in flight; see [`Task::is_suspended`](super::Task::is_suspended).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Normal,
    Waiting,
    Cancelled,
    Finished,
}

impl TaskState {
    /// Returns `true` once the task will never resume again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Cancelled | TaskState::Finished)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskState::Normal => "normal",
            TaskState::Waiting => "waiting",
            TaskState::Cancelled => "cancelled",
            TaskState::Finished => "finished",
        })
    }
}
