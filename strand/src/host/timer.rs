use crate::context::Continuation;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool};
use std::time::Instant;

/// Handle to a scheduled continuation.
///
/// Cancelling is idempotent and has no effect once the timer fired.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Prevents the continuation from running.
    pub fn cancel(&self) {
        self.cancelled.store(true, atomic::Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called, even if the
    /// timer had already fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(atomic::Ordering::Acquire)
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }
}

/// Size below which a timer heap never purges cancelled entries.
const MIN_PURGE: usize = 64;

/// Pending timers of a host, earliest deadline first.
///
/// Cancelled entries are skipped when they reach the front and purged
/// whenever the heap doubles in size, so a workload that keeps arming and
/// cancelling long timers does not grow the heap without bound.
pub(crate) struct TimerHeap {
    entries: BinaryHeap<TimerEntry>,
    seq: u64,
    purge_at: usize,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self {
            entries: BinaryHeap::new(),
            seq: 0,
            purge_at: MIN_PURGE,
        }
    }

    pub(crate) fn push(&mut self, deadline: Instant, continuation: Continuation, cancelled: Arc<AtomicBool>) {
        if self.entries.len() >= self.purge_at {
            let before = self.entries.len();
            self.entries.retain(|entry| !entry.is_cancelled());
            self.purge_at = (self.entries.len() * 2).max(MIN_PURGE);
            tracing::trace!(purged = before - self.entries.len(), "cancelled timers purged");
        }

        self.entries.push(TimerEntry {
            deadline,
            seq: self.seq,
            continuation,
            cancelled,
        });
        self.seq += 1;
    }

    /// Deadline of the earliest armed timer.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        self.skip_cancelled();
        self.entries.peek().map(|entry| entry.deadline)
    }

    /// Removes the earliest armed timer if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerEntry> {
        self.skip_cancelled();
        if self.entries.peek()?.deadline <= now {
            self.entries.pop()
        } else {
            None
        }
    }

    /// Number of timers that can still fire.
    pub(crate) fn armed(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.is_cancelled()).count()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn skip_cancelled(&mut self) {
        while self.entries.peek().is_some_and(TimerEntry::is_cancelled) {
            self.entries.pop();
        }
    }
}

/// An entry in a [`TimerHeap`].
///
/// Entries with equal deadlines fire in scheduling order.
pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,

    /// Scheduling order, breaks deadline ties.
    pub(crate) seq: u64,

    pub(crate) continuation: Continuation,

    /// Cancellation flag shared with the [`TimerHandle`].
    pub(crate) cancelled: Arc<AtomicBool>,
}

impl TimerEntry {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(atomic::Ordering::Acquire)
    }
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Reversed so that a `BinaryHeap<TimerEntry>` pops the earliest
    /// deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    fn noop() -> Continuation {
        Continuation::new(|| {})
    }

    #[test]
    fn cancelled_timers_do_not_accumulate() {
        let mut heap = TimerHeap::new();
        let start = Instant::now();

        for i in 0..10_000u64 {
            let handle = TimerHandle::new();
            heap.push(start + Duration::from_secs(3600 + i), noop(), handle.flag());
            handle.cancel();
        }

        assert!(heap.len() <= MIN_PURGE, "{} entries left", heap.len());
        assert_eq!(heap.armed(), 0);
        assert_eq!(heap.next_deadline(), None);
    }

    #[test]
    fn pop_due_skips_cancelled_and_keeps_order() {
        let mut heap = TimerHeap::new();
        let start = Instant::now();

        let first = TimerHandle::new();
        heap.push(start + Duration::from_secs(1), noop(), first.flag());
        let second = TimerHandle::new();
        heap.push(start + Duration::from_secs(2), noop(), second.flag());
        let tie = TimerHandle::new();
        heap.push(start + Duration::from_secs(2), noop(), tie.flag());
        first.cancel();

        assert_eq!(heap.armed(), 2);
        assert_eq!(heap.next_deadline(), Some(start + Duration::from_secs(2)));
        assert!(heap.pop_due(start + Duration::from_secs(1)).is_none());

        let due = heap.pop_due(start + Duration::from_secs(2)).unwrap();
        assert_eq!(due.seq, 1);
        let due = heap.pop_due(start + Duration::from_secs(2)).unwrap();
        assert_eq!(due.seq, 2);
        assert!(heap.pop_due(start + Duration::from_secs(10)).is_none());
    }
}
