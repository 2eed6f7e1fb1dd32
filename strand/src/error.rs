use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result type used throughout strand.
pub type Result<T> = std::result::Result<T, Error>;

/// The error a [`Deferred`](crate::Deferred) is rejected with.
///
/// Every observer of a rejected deferred receives its own copy, so the
/// type is cheap to clone: user errors are stored behind an `Arc` and keep
/// their concrete type, which [`Error::downcast_ref`] recovers.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The operation was explicitly cancelled.
    #[error("operation was cancelled")]
    Cancelled,

    /// A timer won the race against the operation.
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),

    /// A consumer tried to wait on an empty queue whose backlog is full.
    #[error("queue underflow: consumer backlog is full")]
    QueueUnderflow,

    /// A producer tried to push into a full queue without waiting.
    #[error("queue overflow: queue is at capacity")]
    QueueOverflow,

    /// A context lookup missed in the whole scope chain.
    #[error("context key not found: {0}")]
    KeyNotFound(String),

    /// FATAL: a deferred was settled twice.
    #[error("FATAL: deferred was already settled")]
    DoubleResolution,

    /// FATAL: a semaphore was released more times than it was acquired.
    #[error("FATAL: semaphore released without a matching acquire")]
    ReleaseWithoutAcquire,

    /// The host no longer accepts work.
    #[error("host is shut down")]
    HostShutdown,

    /// A closure handed to a worker thread panicked.
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    /// A coroutine panicked while the task driver was resuming it.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// An error raised by user code, carried opaquely.
    #[error("{0}")]
    Failure(Arc<dyn StdError + Send + Sync>),
}

impl Error {
    /// Wraps a user error so it can travel through deferreds.
    pub fn failure<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Failure(Arc::new(error))
    }

    /// Wraps a plain message as a user error.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::failure(Message(message.into()))
    }

    /// Returns the wrapped user error if it has type `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match self {
            Error::Failure(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Returns `true` if this is a user error of type `E`.
    pub fn is<E>(&self) -> bool
    where
        E: StdError + 'static,
    {
        self.downcast_ref::<E>().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Programming faults: a broken caller contract rather than a runtime condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DoubleResolution | Error::ReleaseWithoutAcquire)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Cancelled, Self::Cancelled) => true,
            (Self::TimedOut(a), Self::TimedOut(b)) => a == b,
            (Self::QueueUnderflow, Self::QueueUnderflow) => true,
            (Self::QueueOverflow, Self::QueueOverflow) => true,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::DoubleResolution, Self::DoubleResolution) => true,
            (Self::ReleaseWithoutAcquire, Self::ReleaseWithoutAcquire) => true,
            (Self::HostShutdown, Self::HostShutdown) => true,
            (Self::WorkerPanicked(a), Self::WorkerPanicked(b)) => a == b,
            (Self::Panicked(a), Self::Panicked(b)) => a == b,
            (Self::Failure(a), Self::Failure(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}
