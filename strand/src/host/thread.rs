use super::command::Command;
use super::pool::Pool;
use super::timer::{TimerHandle, TimerHeap};
use super::{Host, HostBuilder, Job};
use crate::context::Continuation;
use crate::deferred::Deferred;
use crate::error::{Error, Result};

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A host backed by OS threads.
///
/// One loop thread runs every continuation, in order, and owns the timer
/// heap; a pool of worker threads runs blocking jobs handed over with
/// [`Host::run_on_worker`]. Tasks driven by continuations therefore run on
/// the loop thread, one at a time.
///
/// Dropping the host stops accepting work, drops pending timers and joins
/// every thread.
pub struct ThreadHost {
    sender: Sender<Command>,
    pool: Arc<Pool>,
    shutdown: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadHost {
    /// Starts a host with the default configuration; see [`HostBuilder`].
    pub fn new() -> Self {
        HostBuilder::new().build()
    }

    /// Returns a [`HostBuilder`] to configure the thread count and names.
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    pub(crate) fn start(worker_threads: usize, name: &str) -> Self {
        let (sender, receiver) = mpsc::channel();
        let pool = Arc::new(Pool::new());
        let mut threads = Vec::with_capacity(worker_threads + 1);

        threads.push(
            thread::Builder::new()
                .name(format!("{name}-loop"))
                .spawn(move || run_loop(receiver))
                .expect("failed to spawn the host loop thread"),
        );

        for id in 0..worker_threads {
            let pool = Arc::clone(&pool);
            let sender = sender.clone();
            threads.push(
                thread::Builder::new()
                    .name(format!("{name}-worker-{id}"))
                    .spawn(move || pool.work(id, sender))
                    .expect("failed to spawn a host worker thread"),
            );
        }

        tracing::debug!(worker_threads, name, "host started");

        Self {
            sender,
            pool,
            shutdown: AtomicBool::new(false),
            threads: Mutex::new(threads),
        }
    }

    /// Runs `f` on the loop thread under the caller's context.
    ///
    /// Calls run in the order they were made. A panic in `f` is logged and
    /// does not stop the loop.
    ///
    /// # Returns
    /// [`Error::HostShutdown`] once [`shutdown`](Self::shutdown) was called.
    pub fn call_soon<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Command::Call(Continuation::new(f)))
    }

    /// Runs `f` on the loop thread and blocks until the deferred it returns
    /// settles.
    ///
    /// This is the synchronous entry point for programs and tests: tasks
    /// started inside `f` are driven by the loop thread.
    ///
    /// # Arguments
    /// * `f` - Builds the deferred to wait on; runs on the loop thread
    ///
    /// # Returns
    /// The deferred's result, or [`Error::HostShutdown`] if the host stopped
    /// before it settled.
    ///
    /// Calling it from the loop thread itself deadlocks.
    ///
    /// ```rust,ignore
    /// let host = ThreadHost::new();
    /// let value = host.block_on(|| task::spawn(fetch()))?;
    /// ```
    pub fn block_on<T, F>(&self, f: F) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Deferred<T> + Send + 'static,
    {
        let (transmitter, receiver) = mpsc::channel();

        self.call_soon(move || {
            f().on_settled(move |result| {
                let _ = transmitter.send(result);
            });
        })?;

        receiver.recv().unwrap_or(Err(Error::HostShutdown))
    }

    /// Stops the host and joins its threads.
    ///
    /// Continuations already queued on the loop thread may still run;
    /// pending timers never fire.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::debug!("host shutting down");
        self.pool.shutdown();
        let _ = self.sender.send(Command::Shutdown);

        let current = thread::current().id();
        for handle in self.threads.lock().drain(..) {
            // Shutting down from one of the host's own threads must not self-join.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::HostShutdown);
        }
        self.sender.send(command).map_err(|_| Error::HostShutdown)
    }
}

impl Host for ThreadHost {
    fn schedule_after(&self, delay: Duration, continuation: Continuation) -> Result<TimerHandle> {
        let handle = TimerHandle::new();
        self.send(Command::SetTimer {
            deadline: Instant::now() + delay,
            continuation,
            cancelled: handle.flag(),
        })?;
        Ok(handle)
    }

    fn run_on_worker(&self, job: Job) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::HostShutdown);
        }
        self.pool.push(job);
        Ok(())
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl Default for ThreadHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of the loop thread.
fn run_loop(receiver: Receiver<Command>) {
    let mut timers = TimerHeap::new();

    loop {
        let now = Instant::now();
        while let Some(entry) = timers.pop_due(now) {
            tracing::trace!(seq = entry.seq, "timer fired");
            run_guarded(entry.continuation);
        }

        let command = match timers.next_deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(wait) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Call(continuation) => run_guarded(continuation),
            Command::SetTimer {
                deadline,
                continuation,
                cancelled,
            } => timers.push(deadline, continuation, cancelled),
            Command::Shutdown => break,
        }
    }

    tracing::debug!(dropped_timers = timers.armed(), "host loop stopped");
}

fn run_guarded(continuation: Continuation) {
    if panic::catch_unwind(AssertUnwindSafe(|| continuation.run())).is_err() {
        tracing::warn!("continuation panicked on the host loop");
    }
}
