use crate::deferred::Deferred;
use crate::error::Result;
use crate::task::Inline;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

type Loader<K, V> = dyn Fn(&K) -> Deferred<V> + Send + Sync;

/// A map whose values are loaded on first access.
///
/// The first [`get`](Self::get) for a key starts a load through the loader
/// function; requests arriving while it is in flight share it. The outcome
/// is memoized, errors included, until the key is [`remove`](Self::remove)d.
///
/// Cloning the map produces another handle to the same entries.
pub struct LazyMap<K, V> {
    inner: Arc<Inner<K, V>>,
}

struct Inner<K, V> {
    loader: Box<Loader<K, V>>,
    entries: Mutex<Entries<K, V>>,
}

struct Entries<K, V> {
    loaded: HashMap<K, Result<V>>,
    loading: HashMap<K, Vec<Deferred<V>>>,
}

impl<K, V> LazyMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Creates an empty map.
    ///
    /// # Arguments
    /// * `loader` - Called once per key on the first access; may return an
    ///   already settled deferred
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn(&K) -> Deferred<V> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                loader: Box::new(loader),
                entries: Mutex::new(Entries {
                    loaded: HashMap::new(),
                    loading: HashMap::new(),
                }),
            }),
        }
    }

    /// Returns the value for `key`, loading it if needed.
    ///
    /// A memoized value is returned as [`Inline::Ready`] and a memoized
    /// failure as `Err`. Otherwise the result is a deferred, which may be
    /// settled already if the loader answered synchronously.
    pub fn get(&self, key: &K) -> Result<Inline<V>> {
        let deferred = Deferred::new();

        let first = {
            let mut entries = self.inner.entries.lock();
            if let Some(loaded) = entries.loaded.get(key) {
                return loaded.clone().map(Inline::Ready);
            }

            match entries.loading.get_mut(key) {
                Some(waiting) => {
                    waiting.push(deferred.clone());
                    false
                }
                None => {
                    entries.loading.insert(key.clone(), vec![deferred.clone()]);
                    true
                }
            }
        };

        if first {
            tracing::trace!("lazy map loading a new key");
            let load = (self.inner.loader)(key);
            let inner = Arc::clone(&self.inner);
            let key = key.clone();
            load.on_settled(move |result| inner.loaded(key, result));
        }

        Ok(Inline::Pending(deferred))
    }

    /// The memoized outcome for `key`, without loading.
    pub fn peek(&self, key: &K) -> Option<Result<V>> {
        self.inner.entries.lock().loaded.get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.entries.lock().loaded.contains_key(key)
    }

    /// Forgets the memoized outcome for `key`, so the next access loads it again.
    pub fn remove(&self, key: &K) -> Option<Result<V>> {
        self.inner.entries.lock().loaded.remove(key)
    }

    /// Number of memoized entries.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash,
    V: Clone + Send + 'static,
{
    fn loaded(&self, key: K, result: Result<V>) {
        let waiting = {
            let mut entries = self.entries.lock();
            let waiting = entries.loading.remove(&key).unwrap_or_default();
            entries.loaded.insert(key, result.clone());
            waiting
        };

        for deferred in waiting {
            let _ = deferred.offer(result.clone());
        }
    }
}

impl<K, V> Clone for LazyMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for LazyMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.inner.entries.lock();
        f.debug_struct("LazyMap")
            .field("loaded", &entries.loaded.len())
            .field("loading", &entries.loading.len())
            .finish()
    }
}
