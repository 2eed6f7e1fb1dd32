use super::Context;

use std::fmt;

/// A callback bundled with the context it must run under.
///
/// Every hand-off to a host (timer, worker thread, loop thread) goes
/// through a `Continuation`: it captures the snapshot current at hand-off
/// time and [`run`](Self::run) reinstates it around the callback, then
/// restores whatever the running thread had before.
pub struct Continuation {
    context: Context,
    callback: Box<dyn FnOnce() + Send>,
}

impl Continuation {
    /// Captures the current context.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_context(Context::current(), callback)
    }

    pub fn with_context<F>(context: Context, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            context,
            callback: Box::new(callback),
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Runs the callback under the captured context.
    pub fn run(self) {
        let Continuation { context, callback } = self;
        context.scope(callback);
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
