//! Process-wide set of live subscriptions.
//!
//! Every open binding registers its unsubscribe function here. Whoever
//! cancels first (the binding, its scope, or [`SubscriptionRegistry::cancel_all`])
//! removes the entry and runs it; everyone after that finds nothing to do.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Unsubscribe = Box<dyn FnOnce()>;

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    active: BTreeMap<SubscriptionId, Unsubscribe>,
}

/// Shared registry handle; clones refer to the same set.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Rc<RefCell<RegistryInner>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, unsubscribe: impl FnOnce() + 'static) -> SubscriptionId {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.active.insert(id, Box::new(unsubscribe));
        id
    }

    /// Runs and forgets the unsubscribe function of `id`. Returns `false`
    /// if it was already cancelled.
    pub fn cancel(&self, id: SubscriptionId) -> bool {
        let entry = self.inner.borrow_mut().active.remove(&id);
        match entry {
            Some(unsubscribe) => {
                unsubscribe();
                tracing::trace!(subscription = %id, "subscription cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancels every registered subscription and leaves the registry empty.
    ///
    /// An unsubscribe function that panics is logged and skipped. Returns
    /// how many subscriptions were removed.
    pub fn cancel_all(&self) -> usize {
        let active = std::mem::take(&mut self.inner.borrow_mut().active);
        let count = active.len();
        for (id, unsubscribe) in active {
            if panic::catch_unwind(AssertUnwindSafe(unsubscribe)).is_err() {
                tracing::warn!(subscription = %id, "unsubscribe function failed; skipping it");
            }
        }
        tracing::debug!(count, "cancelled all subscriptions");
        count
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.inner.borrow().active.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().active.is_empty()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("active", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counter() -> (Rc<Cell<u32>>, impl FnOnce() + 'static) {
        let calls = Rc::new(Cell::new(0));
        let inner = Rc::clone(&calls);
        (calls, move || inner.set(inner.get() + 1))
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (calls, unsubscribe) = counter();
        let id = registry.register(unsubscribe);
        assert!(registry.contains(id));

        assert!(registry.cancel(id));
        assert!(!registry.cancel(id));
        assert_eq!(calls.get(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_all_runs_each_once() {
        let registry = SubscriptionRegistry::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (calls, unsubscribe) = counter();
                registry.register(unsubscribe);
                calls
            })
            .collect();

        assert_eq!(registry.cancel_all(), 4);
        assert_eq!(registry.cancel_all(), 0);
        assert!(handles.iter().all(|calls| calls.get() == 1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_all_survives_failing_unsubscribe() {
        let registry = SubscriptionRegistry::new();
        let (first, a) = counter();
        let (last, b) = counter();
        registry.register(a);
        registry.register(|| panic!("listener already gone"));
        registry.register(b);

        assert_eq!(registry.cancel_all(), 3);
        assert_eq!(first.get(), 1);
        assert_eq!(last.get(), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_clones_share_entries() {
        let registry = SubscriptionRegistry::new();
        let other = registry.clone();
        let id = registry.register(|| {});
        assert!(other.contains(id));
        assert!(other.cancel(id));
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = SubscriptionRegistry::new();
        let a = registry.register(|| {});
        let b = registry.register(|| {});
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "sub-0");
    }
}
