use super::Job;
use super::command::Command;

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

/// Jobs waiting for a worker thread.
pub(crate) struct Pool {
    queue: Mutex<VecDeque<Job>>,

    /// Signalled when a job is pushed or on shutdown.
    condvar: Condvar,

    shutdown: AtomicBool,
}

impl Pool {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn push(&self, job: Job) {
        self.queue.lock().push_back(job);
        self.condvar.notify_one();
    }

    /// Wakes every worker so it can observe the shutdown.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _queue = self.queue.lock();
        self.condvar.notify_all();
    }

    /// Blocks until a job is available. `None` once shut down.
    fn next(&self) -> Option<Job> {
        let mut queue = self.queue.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(job) = queue.pop_front() {
                return Some(job);
            }
            self.condvar.wait(&mut queue);
        }
    }

    /// Worker loop: runs jobs and hands their continuations to the loop thread.
    pub(crate) fn work(&self, id: usize, loop_thread: Sender<Command>) {
        tracing::debug!(worker = id, "host worker started");

        while let Some(job) = self.next() {
            match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(continuation) => {
                    if loop_thread.send(Command::Call(continuation)).is_err() {
                        break;
                    }
                }
                Err(_) => tracing::warn!(worker = id, "host job panicked"),
            }
        }

        tracing::debug!(worker = id, "host worker stopped");
    }
}
