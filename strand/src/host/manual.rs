use super::timer::{TimerHandle, TimerHeap};
use super::{Host, Job};
use crate::context::Continuation;
use crate::error::Result;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A deterministic host driven by hand.
///
/// Time only moves when [`advance`](Self::advance) is called, and nothing
/// runs in the background: worker jobs run inline on the calling thread
/// and every continuation runs on the thread calling `advance` or
/// [`run_until_idle`](Self::run_until_idle). Used to test timing logic
/// without waiting on the wall clock.
///
/// ```rust,ignore
/// let host = ManualHost::new();
/// let done = time::sleep(&host, Duration::from_secs(60));
///
/// host.advance(Duration::from_secs(59));
/// assert!(!done.is_settled());
/// host.advance(Duration::from_secs(1));
/// assert!(done.is_settled());
/// ```
pub struct ManualHost {
    origin: Instant,
    state: Mutex<State>,
}

struct State {
    /// Virtual time elapsed since `origin`.
    elapsed: Duration,
    timers: TimerHeap,
    ready: VecDeque<Continuation>,
}

impl ManualHost {
    /// Creates a host whose virtual clock starts at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(State {
                elapsed: Duration::ZERO,
                timers: TimerHeap::new(),
                ready: VecDeque::new(),
            }),
        }
    }

    /// Virtual time elapsed since the host was created.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Number of timers that are still armed.
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.armed()
    }

    /// Moves virtual time forward by `by`, firing every timer that falls
    /// due along the way in deadline order.
    ///
    /// Timers scheduled while advancing fire too if they fall due before
    /// the target time. While a timer fires, [`Host::now`] reports its
    /// deadline.
    ///
    /// # Arguments
    /// * `by` - How far to move the clock; `Duration::ZERO` only runs what
    ///   is already due
    pub fn advance(&self, by: Duration) {
        let target = self.origin + self.state.lock().elapsed + by;

        loop {
            self.run_until_idle();

            let entry = {
                let mut state = self.state.lock();
                let Some(entry) = state.timers.pop_due(target) else {
                    break;
                };
                state.elapsed = state.elapsed.max(entry.deadline - self.origin);
                entry
            };

            tracing::trace!(seq = entry.seq, "virtual timer fired");
            entry.continuation.run();
        }

        let mut state = self.state.lock();
        state.elapsed = target - self.origin;
    }

    /// Runs queued continuations and timers due at the current virtual
    /// time, until none are left.
    pub fn run_until_idle(&self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                let now = self.origin + state.elapsed;
                match state.ready.pop_front() {
                    Some(continuation) => continuation,
                    None => match state.timers.pop_due(now) {
                        Some(entry) => entry.continuation,
                        None => return,
                    },
                }
            };

            next.run();
        }
    }
}

impl Host for ManualHost {
    fn schedule_after(&self, delay: Duration, continuation: Continuation) -> Result<TimerHandle> {
        let handle = TimerHandle::new();
        let mut state = self.state.lock();

        let deadline = self.origin + state.elapsed + delay;
        state.timers.push(deadline, continuation, handle.flag());
        Ok(handle)
    }

    fn run_on_worker(&self, job: Job) -> Result<()> {
        let continuation = job();
        self.state.lock().ready.push_back(continuation);
        Ok(())
    }

    fn now(&self) -> Instant {
        self.origin + self.state.lock().elapsed
    }
}

impl Default for ManualHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Continuation) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |n| {
            let sink = sink.clone();
            Continuation::new(move || sink.lock().push(n))
        })
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let host = ManualHost::new();
        let (log, record) = recorder();

        host.schedule_after(Duration::from_secs(3), record(3)).unwrap();
        host.schedule_after(Duration::from_secs(1), record(1)).unwrap();
        host.schedule_after(Duration::from_secs(2), record(2)).unwrap();
        host.schedule_after(Duration::from_secs(1), record(11)).unwrap();

        host.advance(Duration::from_secs(2));
        assert_eq!(*log.lock(), vec![1, 11, 2]);
        assert_eq!(host.elapsed(), Duration::from_secs(2));

        host.advance(Duration::from_secs(5));
        assert_eq!(*log.lock(), vec![1, 11, 2, 3]);
        assert_eq!(host.elapsed(), Duration::from_secs(7));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let host = ManualHost::new();
        let (log, record) = recorder();

        let handle = host.schedule_after(Duration::from_secs(1), record(1)).unwrap();
        handle.cancel();
        assert_eq!(host.pending_timers(), 0);

        host.advance(Duration::from_secs(10));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn zero_delay_runs_when_idle() {
        let host = ManualHost::new();
        let (log, record) = recorder();

        host.schedule_after(Duration::ZERO, record(0)).unwrap();
        host.run_until_idle();
        assert_eq!(*log.lock(), vec![0]);
    }
}
