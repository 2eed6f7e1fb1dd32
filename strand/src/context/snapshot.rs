use super::CURRENT;
use super::Value;
use crate::error::{Error, Result};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

static ROOT: LazyLock<Context> = LazyLock::new(|| Context {
    inner: Arc::new(Snapshot {
        values: BTreeMap::new(),
        parent: None,
    }),
});

/// An immutable snapshot of context values.
///
/// A snapshot holds the fully merged mapping visible at its level: entering
/// a scope copies the enclosing values and layers the new ones on top
/// (nearest scope wins). Snapshots are never mutated after construction,
/// so they are shared freely between threads.
///
/// Exactly one snapshot is *current* for the code running on a thread.
/// Tasks own the snapshot they run under and install it around every
/// resume; hosts do the same around every continuation they run.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Snapshot>,
}

struct Snapshot {
    /// Merged values of this scope and all its ancestors.
    values: BTreeMap<String, Value>,

    /// The snapshot this one was layered on.
    parent: Option<Context>,
}

impl Context {
    /// The empty root snapshot.
    pub fn root() -> Context {
        ROOT.clone()
    }

    /// Returns the snapshot current on the calling thread.
    pub fn current() -> Context {
        CURRENT.with(|current| current.borrow().clone().unwrap_or_else(Context::root))
    }

    /// Builds a snapshot layered on `self` without installing it.
    pub fn child<I, K, V>(&self, values: I) -> Context
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut merged = self.inner.values.clone();
        merged.extend(values.into_iter().map(|(k, v)| (k.into(), v.into())));

        Context {
            inner: Arc::new(Snapshot {
                values: merged,
                parent: Some(self.clone()),
            }),
        }
    }

    /// Enters a new scope layered on the current snapshot.
    ///
    /// The returned guard restores the previous snapshot when dropped.
    pub fn enter<I, K, V>(values: I) -> ContextGuard
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Context::current().child(values).install()
    }

    /// Makes `self` the current snapshot until the guard is dropped.
    pub fn install(self) -> ContextGuard {
        let previous = CURRENT.with(|current| current.replace(Some(self)));
        ContextGuard { previous }
    }

    /// Runs `f` with `self` installed as the current snapshot.
    ///
    /// Whatever was current before is restored afterwards, including when
    /// `f` panics.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.clone().install();
        f()
    }

    /// Captures the current snapshot and returns a closure that runs `f`
    /// under it, wherever and whenever it is eventually called.
    pub fn wrap<F, R>(f: F) -> impl FnOnce() -> R + Send + 'static
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let context = Context::current();
        move || context.scope(f)
    }

    /// Looks up `key`.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.inner
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(key.to_owned()))
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.values.contains_key(key)
    }

    /// The merged mapping visible in this scope.
    pub fn all(&self) -> &BTreeMap<String, Value> {
        &self.inner.values
    }

    pub fn len(&self) -> usize {
        self.inner.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.values.is_empty()
    }

    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }

    /// Number of scopes between this snapshot and the root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self.parent();
        while let Some(parent) = node {
            depth += 1;
            node = parent.parent();
        }
        depth
    }

    /// Returns `true` if both handles refer to the same snapshot.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::root()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.inner.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context{self}")
    }
}

/// Restores the previously current snapshot when dropped.
///
/// The guard may be held across suspension points inside a task and
/// dropped on another thread: the task installs its own snapshot around
/// every resume, so the restore always lands in the task's slot.
#[must_use = "the scope ends as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<Context>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| {
            current.replace(previous);
        });
    }
}
