use crate::deferred::{Deferred, Offer};
use crate::error::{Error, Result};

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Weak};

/// A counting semaphore that grants tokens to waiters by priority.
///
/// Lower priority values are served first; waiters with equal priority are
/// served in arrival order. Acquiring returns a [`Deferred`] that resolves
/// when the token is granted, so a task simply awaits it.
///
/// # Examples
///
/// ```rust,ignore
/// let semaphore = PrioritySemaphore::new(1);
///
/// semaphore.acquire(0).await?;
/// let urgent = semaphore.acquire(-1);
/// let background = semaphore.acquire(10);
///
/// semaphore.release();
/// assert!(urgent.is_settled());
/// assert!(!background.is_settled());
/// ```
pub struct PrioritySemaphore<P = i64> {
    limit: usize,
    state: Arc<Mutex<State<P>>>,
}

struct State<P> {
    tokens: usize,
    waiters: BinaryHeap<Waiter<P>>,
    next_seq: u64,
}

struct Waiter<P> {
    priority: P,

    /// Arrival order, breaks priority ties.
    seq: u64,

    deferred: Deferred<()>,
}

impl<P: Ord> Eq for Waiter<P> {}

impl<P: Ord> PartialEq for Waiter<P> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<P: Ord> Ord for Waiter<P> {
    /// Reversed so that `BinaryHeap` pops the lowest priority value, then
    /// the earliest arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<P: Ord> PartialOrd for Waiter<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> PrioritySemaphore<P>
where
    P: Ord + Default + Send + 'static,
{
    /// Creates a semaphore holding `tokens` tokens.
    ///
    /// # Panics
    ///
    /// Panics if `tokens` is 0.
    pub fn new(tokens: usize) -> Self {
        assert!(tokens > 0, "a semaphore needs at least one token");

        Self {
            limit: tokens,
            state: Arc::new(Mutex::new(State {
                tokens,
                waiters: BinaryHeap::new(),
                next_seq: 0,
            })),
        }
    }

    /// Requests a token.
    ///
    /// Resolves immediately when a token is free. Otherwise the request
    /// waits until [`release`](Self::release) grants it one; cancelling the
    /// returned deferred withdraws the request.
    ///
    /// # Arguments
    /// * `priority` - Lower values are served first; equal priorities are
    ///   served in request order
    pub fn acquire(&self, priority: P) -> Deferred<()> {
        let mut state = self.state.lock();

        if state.tokens > 0 {
            state.tokens -= 1;
            return Deferred::resolved(());
        }

        let seq = state.next_seq;
        state.next_seq += 1;

        let shared: Weak<Mutex<State<P>>> = Arc::downgrade(&self.state);
        let deferred = Deferred::with_canceller(move |_: &Deferred<()>| {
            if let Some(shared) = shared.upgrade() {
                shared.lock().waiters.retain(|waiter| waiter.seq != seq);
            }
        });

        state.waiters.push(Waiter {
            priority,
            seq,
            deferred: deferred.clone(),
        });
        tracing::trace!(waiters = state.waiters.len(), "semaphore acquire waiting");

        deferred
    }

    /// Requests a token with the default priority, served first come first
    /// served among such requests.
    pub fn acquire_fifo(&self) -> Deferred<()> {
        self.acquire(P::default())
    }

    /// Returns a token, granting it to the best waiter if there is one.
    ///
    /// # Panics
    ///
    /// Panics with [`Error::ReleaseWithoutAcquire`] if every token is
    /// already available.
    #[track_caller]
    pub fn release(&self) {
        if let Err(error) = self.try_release() {
            panic!("{error}");
        }
    }

    /// Non-panicking counterpart of [`release`](Self::release).
    pub fn try_release(&self) -> Result<()> {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                match state.waiters.pop() {
                    Some(waiter) => waiter,
                    None => {
                        if state.tokens >= self.limit {
                            return Err(Error::ReleaseWithoutAcquire);
                        }
                        state.tokens += 1;
                        return Ok(());
                    }
                }
            };

            // A waiter cancelled concurrently does not take the token.
            if waiter.deferred.offer(Ok(())) != Offer::Ignored {
                return Ok(());
            }
        }
    }

    /// Tokens currently available.
    pub fn tokens(&self) -> usize {
        self.state.lock().tokens
    }

    /// Total number of tokens.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of pending acquisitions.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl<P> fmt::Debug for PrioritySemaphore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PrioritySemaphore")
            .field("tokens", &state.tokens)
            .field("limit", &self.limit)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "at least one token")]
    fn zero_tokens_panics() {
        let _ = PrioritySemaphore::<i64>::new(0);
    }

    #[test]
    fn release_beyond_limit_is_reported() {
        let semaphore = PrioritySemaphore::<i64>::new(1);
        assert_eq!(semaphore.try_release(), Err(Error::ReleaseWithoutAcquire));

        assert!(semaphore.acquire(0).is_settled());
        assert_eq!(semaphore.tokens(), 0);
        semaphore.release();
        assert_eq!(semaphore.tokens(), 1);
    }

    #[test]
    fn cancelled_waiter_never_gets_a_token() {
        let semaphore = PrioritySemaphore::<i64>::new(1);
        let _held = semaphore.acquire(0);

        let first = semaphore.acquire(1);
        let second = semaphore.acquire(2);
        first.cancel();
        assert_eq!(semaphore.waiting(), 1);

        semaphore.release();
        assert_eq!(first.result(), Some(Err(Error::Cancelled)));
        assert_eq!(second.result(), Some(Ok(())));
        assert_eq!(semaphore.tokens(), 0);
    }

    #[test]
    fn ties_are_first_come_first_served() {
        let semaphore = PrioritySemaphore::<i64>::new(1);
        let _held = semaphore.acquire_fifo();

        let a = semaphore.acquire_fifo();
        let b = semaphore.acquire_fifo();

        semaphore.release();
        assert!(a.is_settled());
        assert!(!b.is_settled());
    }
}
