use super::Deferred;

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// A one-to-many notification built on deferreds.
///
/// Each call to [`listen`](Self::listen) hands out a fresh deferred that is
/// resolved the next time the event fires. Firing resolves every listener
/// registered so far and forgets them: listeners added afterwards wait for
/// the following firing. Cancelling a listener unregisters it.
pub struct Event<T> {
    listeners: Arc<Mutex<Vec<Deferred<T>>>>,
}

impl<T: Clone + Send + 'static> Event<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns a deferred resolved by the next [`fire`](Self::fire).
    pub fn listen(&self) -> Deferred<T> {
        let listeners: Weak<Mutex<Vec<Deferred<T>>>> = Arc::downgrade(&self.listeners);
        let deferred = Deferred::with_canceller(move |cancelled: &Deferred<T>| {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().retain(|listener| !listener.ptr_eq(cancelled));
            }
        });
        self.listeners.lock().push(deferred.clone());
        deferred
    }

    /// Resolves every current listener with `value`.
    pub fn fire(&self, value: T) {
        let listeners = std::mem::take(&mut *self.listeners.lock());

        for listener in listeners {
            let _ = listener.offer(Ok(value.clone()));
        }
    }

    /// Number of listeners waiting for the next firing.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

impl<T: Clone + Send + 'static> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_resolves_current_listeners_only() {
        let event = Event::new();
        let first = event.listen();
        let second = event.listen();

        event.fire(1);
        let third = event.listen();

        assert_eq!(first.result(), Some(Ok(1)));
        assert_eq!(second.result(), Some(Ok(1)));
        assert!(!third.is_settled());
        assert_eq!(event.len(), 1);

        event.fire(2);
        assert_eq!(third.result(), Some(Ok(2)));
        assert!(event.is_empty());
    }

    #[test]
    fn cancelled_listener_is_skipped() {
        let event = Event::new();
        let listener = event.listen();
        listener.cancel();

        event.fire(());
        assert!(listener.is_cancelled());
    }

    #[test]
    fn cancelled_listener_is_forgotten() {
        let event = Event::<u32>::new();
        let kept = event.listen();
        let dropped = event.listen();
        assert_eq!(event.len(), 2);

        dropped.cancel();
        assert_eq!(event.len(), 1);

        for _ in 0..100 {
            event.listen().cancel();
        }
        assert_eq!(event.len(), 1);

        event.fire(7);
        assert_eq!(kept.result(), Some(Ok(7)));
        assert_eq!(dropped.result(), Some(Err(crate::Error::Cancelled)));
    }
}
