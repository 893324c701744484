//! Reactive cells and UI lifecycle scopes.
//!
//! [`Reactive`] is the observable value a UI layer renders from. A
//! [`TeardownHook`] is whatever the UI offers for "run this when the current
//! component goes away"; [`Scope`] is a ready-made one.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

/// Identifies one observer registered with [`Reactive::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

type Observer<T> = Rc<dyn Fn(&T)>;

struct ReactiveInner<T> {
    value: RefCell<T>,
    version: Cell<u64>,
    observers: RefCell<Vec<(WatchId, Observer<T>)>>,
    next_watch: Cell<u64>,
}

/// A shared, observable value. Clones share the same cell.
///
/// Observers run synchronously after every [`set`](Reactive::set) and must
/// not write back into the cell they observe.
pub struct Reactive<T> {
    inner: Rc<ReactiveInner<T>>,
}

impl<T> Clone for Reactive<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Reactive<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(ReactiveInner {
                value: RefCell::new(value),
                version: Cell::new(0),
                observers: RefCell::new(Vec::new()),
                next_watch: Cell::new(0),
            }),
        }
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Replaces the value wholesale and notifies observers.
    pub fn set(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        self.inner.version.set(self.inner.version.get() + 1);

        let observers: Vec<Observer<T>> = self
            .inner
            .observers
            .borrow()
            .iter()
            .map(|(_, observer)| Rc::clone(observer))
            .collect();
        let value = self.inner.value.borrow();
        for observer in observers {
            observer(&value);
        }
    }

    /// Number of times the value has been set.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    pub fn watch(&self, observer: impl Fn(&T) + 'static) -> WatchId {
        let id = WatchId(self.inner.next_watch.get());
        self.inner.next_watch.set(id.0 + 1);
        self.inner
            .observers
            .borrow_mut()
            .push((id, Rc::new(observer)));
        id
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        let mut observers = self.inner.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|(watch, _)| *watch != id);
        observers.len() != before
    }
}

impl<T: fmt::Debug> fmt::Debug for Reactive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .finish()
    }
}

/// Returned by a [`TeardownHook`] that cannot take cleanups any more.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("teardown hook unavailable: {0}")]
pub struct HookUnavailable(pub String);

/// "Run this cleanup when the current UI context is destroyed."
pub trait TeardownHook {
    fn on_teardown(&self, cleanup: Box<dyn FnOnce()>) -> Result<(), HookUnavailable>;
}

/// A UI context that runs its cleanups, in registration order, when torn
/// down or dropped.
pub struct Scope {
    name: String,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    torn_down: Cell<bool>,
}

impl Scope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cleanups: RefCell::new(Vec::new()),
            torn_down: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    /// Cleanups waiting for teardown.
    pub fn pending(&self) -> usize {
        self.cleanups.borrow().len()
    }

    pub fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }
        let cleanups = std::mem::take(&mut *self.cleanups.borrow_mut());
        tracing::debug!(scope = %self.name, cleanups = cleanups.len(), "tearing down scope");
        for cleanup in cleanups {
            cleanup();
        }
    }
}

impl TeardownHook for Scope {
    fn on_teardown(&self, cleanup: Box<dyn FnOnce()>) -> Result<(), HookUnavailable> {
        if self.torn_down.get() {
            return Err(HookUnavailable(format!(
                "scope '{}' is already torn down",
                self.name
            )));
        }
        self.cleanups.borrow_mut().push(cleanup);
        Ok(())
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .field("torn_down", &self.torn_down.get())
            .finish()
    }
}
