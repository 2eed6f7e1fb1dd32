use super::ThreadHost;

use std::thread;

/// Builder for configuring and creating a [`ThreadHost`].
///
/// # Examples
///
/// ```rust,ignore
/// let host = HostBuilder::new()
///     .worker_threads(4)
///     .thread_name("ingest")
///     .build();
/// ```
pub struct HostBuilder {
    /// Number of threads running blocking jobs.
    worker_threads: usize,

    /// Prefix of the names given to the host's threads.
    thread_name: String,
}

impl HostBuilder {
    /// Creates a builder with default configuration.
    ///
    /// By default, the number of worker threads is the number of available
    /// logical CPUs, falling back to `1` if unavailable.
    pub fn new() -> Self {
        let worker_threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            worker_threads,
            thread_name: "strand".to_owned(),
        }
    }

    /// Sets the number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn worker_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_threads must be > 0");

        self.worker_threads = n;
        self
    }

    /// Sets the thread name prefix: the loop thread is `{prefix}-loop` and
    /// workers are `{prefix}-worker-{n}`.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Starts the host threads.
    ///
    /// # Panics
    ///
    /// Panics if the operating system refuses to spawn a thread.
    pub fn build(self) -> ThreadHost {
        ThreadHost::start(self.worker_threads, &self.thread_name)
    }
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}
