use crate::context::Continuation;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

/// Requests sent to the loop thread of a [`ThreadHost`](super::ThreadHost).
pub(crate) enum Command {
    /// Run as soon as possible.
    Call(Continuation),
    SetTimer {
        deadline: Instant,
        continuation: Continuation,
        cancelled: Arc<AtomicBool>,
    },
    Shutdown,
}
