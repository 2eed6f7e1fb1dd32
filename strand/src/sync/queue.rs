use crate::deferred::{Deferred, Event, Offer};
use crate::error::{Error, Result};
use crate::task::Inline;

use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

/// A FIFO queue with a soft maximum size.
///
/// Pushing never fails: once the queue holds `max_size` items or more,
/// `push` hands back a deferred that resolves when the queue drops below
/// `max_size` again. Producers are expected to wait on it before pushing
/// more, which gives backpressure without rejecting work.
///
/// # Examples
///
/// ```rust,ignore
/// let queue = MaxSizeQueue::new(2);
/// assert!(queue.push(1).is_none());
///
/// let space = queue.push(2).expect("queue is full");
/// assert_eq!(queue.shift(), Some(1));
/// assert!(space.is_settled());
/// ```
pub struct MaxSizeQueue<T> {
    max_size: usize,
    items: Mutex<VecDeque<T>>,

    /// Producers waiting for the queue to drop below `max_size`.
    space: Event<()>,
}

impl<T> MaxSizeQueue<T> {
    /// Creates an empty queue.
    ///
    /// # Arguments
    /// * `max_size` - Length at which `push` starts handing back space
    ///   deferreds. A `max_size` of `0` makes every push report a full queue.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            items: Mutex::new(VecDeque::new()),
            space: Event::new(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Returns `true` once the queue holds `max_size` items or more.
    pub fn is_full(&self) -> bool {
        self.items.lock().len() >= self.max_size
    }

    /// Appends `item`.
    ///
    /// Returns a deferred resolving once there is space again if the queue
    /// is full after the push.
    pub fn push(&self, item: T) -> Option<Deferred<()>> {
        self.extend([item])
    }

    /// Appends every item, in order. See [`push`](Self::push).
    pub fn extend<I>(&self, items: I) -> Option<Deferred<()>>
    where
        I: IntoIterator<Item = T>,
    {
        let mut queue = self.items.lock();
        queue.extend(items);

        if queue.len() >= self.max_size {
            Some(self.space.listen())
        } else {
            None
        }
    }

    /// Appends `item` only if the queue has room for it.
    ///
    /// # Returns
    /// [`Error::QueueOverflow`] if the queue is full; the item is dropped.
    pub fn try_push(&self, item: T) -> Result<()> {
        let mut queue = self.items.lock();
        if queue.len() >= self.max_size {
            return Err(Error::QueueOverflow);
        }
        queue.push_back(item);
        Ok(())
    }

    /// Returns a deferred resolving once the queue is not full.
    ///
    /// Already resolved if the queue has room.
    pub fn wait_for_space(&self) -> Deferred<()> {
        let queue = self.items.lock();
        if queue.len() >= self.max_size {
            self.space.listen()
        } else {
            Deferred::resolved(())
        }
    }

    /// Removes the oldest item.
    pub fn shift(&self) -> Option<T> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.notify_space();
        }
        item
    }

    /// Removes up to `n` items, oldest first.
    pub fn shift_many(&self, n: usize) -> Vec<T> {
        let items: Vec<T> = {
            let mut queue = self.items.lock();
            let n = n.min(queue.len());
            queue.drain(..n).collect()
        };

        if !items.is_empty() {
            self.notify_space();
        }
        items
    }

    /// Drops every item.
    pub fn clear(&self) {
        self.items.lock().clear();
        self.notify_space();
    }

    /// Removes the oldest item without notifying producers.
    ///
    /// Returns whether producers should be notified.
    pub(crate) fn pop_quiet(&self) -> (Option<T>, bool) {
        let mut queue = self.items.lock();
        let item = queue.pop_front();
        let freed = item.is_some() && queue.len() < self.max_size;
        (item, freed)
    }

    pub(crate) fn push_front(&self, item: T) {
        self.items.lock().push_front(item);
    }

    /// Wakes every producer waiting for space if the queue has room.
    pub(crate) fn notify_space(&self) {
        let has_room = self.items.lock().len() < self.max_size;
        if has_room && !self.space.is_empty() {
            tracing::trace!(waiters = self.space.len(), "queue has space again");
            self.space.fire(());
        }
    }
}

impl<T: Clone> MaxSizeQueue<T> {
    /// Returns a copy of the oldest item.
    pub fn peek(&self) -> Option<T> {
        self.items.lock().front().cloned()
    }
}

impl<T> fmt::Debug for MaxSizeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxSizeQueue")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

/// A [`MaxSizeQueue`] whose consumers can wait for items.
///
/// Shifting from an empty queue hands back a deferred that the next pushed
/// item resolves; waiting consumers are served oldest first. The number of
/// consumers waiting at once can be capped with
/// [`with_backlog`](Self::with_backlog), past which shifting from an empty
/// queue fails with [`Error::QueueUnderflow`].
///
/// ```rust,ignore
/// let queue = BacklogQueue::new(3).with_backlog(2);
///
/// let Inline::Pending(next) = queue.shift()? else { unreachable!() };
/// queue.push("job");
/// assert_eq!(next.result(), Some(Ok("job")));
/// ```
pub struct BacklogQueue<T> {
    queue: MaxSizeQueue<T>,
    backlog: Option<usize>,
    consumers: Arc<Mutex<Consumers<T>>>,
}

struct Consumers<T> {
    waiting: VecDeque<Consumer<T>>,
    next_id: u64,
}

struct Consumer<T> {
    id: u64,
    deferred: Deferred<T>,
}

impl<T: Clone + Send + 'static> BacklogQueue<T> {
    /// Creates a queue with an unbounded consumer backlog.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: MaxSizeQueue::new(max_size),
            backlog: None,
            consumers: Arc::new(Mutex::new(Consumers {
                waiting: VecDeque::new(),
                next_id: 0,
            })),
        }
    }

    /// Caps the number of consumers waiting at once.
    ///
    /// A backlog of `0` means shifting from an empty queue always fails.
    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = Some(backlog);
        self
    }

    /// Maximum number of waiting consumers, `None` if unbounded.
    pub fn backlog(&self) -> Option<usize> {
        self.backlog
    }

    /// Appends `item`, handing it straight to the oldest waiting consumer
    /// if there is one.
    ///
    /// Returns a space deferred like [`MaxSizeQueue::push`].
    pub fn push(&self, item: T) -> Option<Deferred<()>> {
        self.extend([item])
    }

    /// Appends every item, in order. See [`push`](Self::push).
    pub fn extend<I>(&self, items: I) -> Option<Deferred<()>>
    where
        I: IntoIterator<Item = T>,
    {
        let consumers = self.consumers.lock();
        let space = self.queue.extend(items);
        self.serve_consumers(consumers);
        space
    }

    /// Removes the oldest item, or waits for the next one.
    ///
    /// Fails with [`Error::QueueUnderflow`] if the queue is empty and the
    /// backlog of waiting consumers is full.
    pub fn shift(&self) -> Result<Inline<T>> {
        let mut consumers = self.consumers.lock();

        let (item, freed) = self.queue.pop_quiet();
        if let Some(item) = item {
            drop(consumers);
            if freed {
                self.queue.notify_space();
            }
            return Ok(Inline::Ready(item));
        }

        if self.backlog.is_some_and(|backlog| consumers.waiting.len() >= backlog) {
            return Err(Error::QueueUnderflow);
        }

        let id = consumers.next_id;
        consumers.next_id += 1;

        let registry: Weak<Mutex<Consumers<T>>> = Arc::downgrade(&self.consumers);
        let deferred = Deferred::with_canceller(move |_: &Deferred<T>| {
            if let Some(registry) = registry.upgrade() {
                registry.lock().waiting.retain(|consumer| consumer.id != id);
            }
        });

        consumers.waiting.push_back(Consumer {
            id,
            deferred: deferred.clone(),
        });
        tracing::trace!(waiting = consumers.waiting.len(), "consumer waiting for an item");

        Ok(Inline::Pending(deferred))
    }

    /// Removes up to `n` items, oldest first, without waiting.
    pub fn shift_many(&self, n: usize) -> Vec<T> {
        self.queue.shift_many(n)
    }

    /// Appends `item` only if the queue has room for it, handing it to a
    /// waiting consumer like [`push`](Self::push).
    ///
    /// # Arguments
    /// * `item` - The item to append.
    ///
    /// # Returns
    /// [`Error::QueueOverflow`] if the queue is full. Waiting consumers imply
    /// an empty queue, so this only fails when nobody is waiting.
    pub fn try_push(&self, item: T) -> Result<()> {
        let consumers = self.consumers.lock();
        self.queue.try_push(item)?;
        self.serve_consumers(consumers);
        Ok(())
    }

    /// See [`MaxSizeQueue::wait_for_space`].
    pub fn wait_for_space(&self) -> Deferred<()> {
        self.queue.wait_for_space()
    }

    /// Returns a copy of the oldest item without removing it.
    pub fn peek(&self) -> Option<T> {
        self.queue.peek()
    }

    /// Drops every queued item.
    ///
    /// Waiting consumers keep waiting, and producers waiting for space are
    /// released.
    pub fn clear(&self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn max_size(&self) -> usize {
        self.queue.max_size()
    }

    /// Number of consumers currently waiting for an item.
    pub fn waiting(&self) -> usize {
        self.consumers.lock().waiting.len()
    }

    /// Hands queued items to waiting consumers, oldest of each first.
    ///
    /// Called with the consumer registry locked since the items were
    /// appended, so no `shift` can take an item while an older consumer
    /// is still waiting for one.
    fn serve_consumers<'a>(&'a self, mut consumers: MutexGuard<'a, Consumers<T>>) {
        loop {
            let mut freed = false;
            let mut served = Vec::new();

            while !consumers.waiting.is_empty() {
                let (item, space) = self.queue.pop_quiet();
                let Some(item) = item else {
                    break;
                };
                freed |= space;
                if let Some(consumer) = consumers.waiting.pop_front() {
                    served.push((consumer.deferred, item));
                }
            }
            drop(consumers);

            if freed {
                self.queue.notify_space();
            }

            // A consumer cancelled between being picked and being served
            // gives its item back.
            let mut returned = Vec::new();
            for (deferred, item) in served {
                if deferred.offer(Ok(item.clone())) == Offer::Ignored {
                    returned.push(item);
                }
            }

            if returned.is_empty() {
                return;
            }

            consumers = self.consumers.lock();
            for item in returned.into_iter().rev() {
                self.queue.push_front(item);
            }
        }
    }
}

impl<T> fmt::Debug for BacklogQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacklogQueue")
            .field("len", &self.queue.len())
            .field("max_size", &self.queue.max_size)
            .field("backlog", &self.backlog)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_fires_once_below_max() {
        let queue = MaxSizeQueue::new(2);
        assert!(queue.push(1).is_none());

        let space = queue.push(2).unwrap();
        assert!(!space.is_settled());
        assert!(!queue.wait_for_space().is_settled());

        assert_eq!(queue.shift(), Some(1));
        assert!(space.is_settled());
        assert!(queue.wait_for_space().is_settled());
    }

    #[test]
    fn try_push_refuses_when_full() {
        let queue = MaxSizeQueue::new(1);
        queue.try_push('a').unwrap();
        assert_eq!(queue.try_push('b'), Err(Error::QueueOverflow));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn clear_releases_producers() {
        let queue = MaxSizeQueue::new(1);
        let space = queue.push(()).unwrap();
        queue.clear();
        assert!(space.is_settled());
        assert!(queue.is_empty());
    }

    #[test]
    fn cancelled_consumer_is_skipped() {
        let queue = BacklogQueue::new(4).with_backlog(2);

        let Ok(Inline::Pending(first)) = queue.shift() else {
            panic!("expected a pending consumer");
        };
        let Ok(Inline::Pending(second)) = queue.shift() else {
            panic!("expected a pending consumer");
        };

        first.cancel();
        assert_eq!(queue.waiting(), 1);

        queue.push(7);
        assert_eq!(first.result(), Some(Err(Error::Cancelled)));
        assert_eq!(second.result(), Some(Ok(7)));
        assert!(queue.is_empty());
    }
}
