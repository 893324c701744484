//! Live bindings: a store listener projected into reactive cells.
//!
//! A binding owns three cells. `value` is replaced wholesale on every
//! successful event. `loading` starts `true` and turns `false` on the first
//! event of either kind. `error` is set when the listener fails; the value
//! keeps its last good state and the binding stays registered until someone
//! cancels it.

use std::fmt;

use crate::error::StoreError;
use crate::reactive::{Reactive, TeardownHook};
use crate::registry::{SubscriptionId, SubscriptionRegistry};
use crate::store::{Document, ListenerRegistration};

/// Handle to one live subscription and the cells it drives.
///
/// Dropping the handle does not stop the subscription; call
/// [`cancel`](Binding::cancel), tear down its scope, or cancel everything
/// through the registry.
pub struct Binding<T> {
    id: SubscriptionId,
    value: Reactive<T>,
    loading: Reactive<bool>,
    error: Reactive<Option<StoreError>>,
    registry: SubscriptionRegistry,
}

pub type DocumentBinding = Binding<Option<Document>>;
pub type CollectionBinding = Binding<Vec<Document>>;

/// Event sink handed to the store listener.
pub(crate) type Sink<T> = Box<dyn FnMut(Result<T, StoreError>)>;

impl<T: 'static> Binding<T> {
    /// Opens the subscription through `subscribe`, registers it, and hooks it
    /// to `scope` when one is available.
    pub(crate) fn open(
        label: &str,
        initial: T,
        registry: &SubscriptionRegistry,
        scope: Option<&dyn TeardownHook>,
        subscribe: impl FnOnce(Sink<T>) -> ListenerRegistration,
    ) -> Self {
        let value = Reactive::new(initial);
        let loading = Reactive::new(true);
        let error = Reactive::new(None);

        let sink: Sink<T> = {
            let value = value.clone();
            let loading = loading.clone();
            let error = error.clone();
            let label = label.to_string();
            Box::new(move |event| {
                match event {
                    Ok(next) => value.set(next),
                    Err(e) => {
                        tracing::warn!(target_path = %label, "subscription failed: {}", e);
                        error.set(Some(e));
                    }
                }
                if loading.get() {
                    loading.set(false);
                }
            })
        };

        let registration = subscribe(sink);
        let id = registry.register(registration.into_unsubscribe());
        tracing::debug!(subscription = %id, target_path = %label, "subscription opened");

        match scope {
            Some(hook) => {
                let registry = registry.clone();
                let hooked = hook.on_teardown(Box::new(move || {
                    registry.cancel(id);
                }));
                if let Err(e) = hooked {
                    tracing::warn!(
                        subscription = %id,
                        target_path = %label,
                        "{}; cancel the binding manually",
                        e
                    );
                }
            }
            None => {
                tracing::debug!(
                    subscription = %id,
                    target_path = %label,
                    "no teardown scope; binding stays open until cancelled"
                );
            }
        }

        Self {
            id,
            value,
            loading,
            error,
            registry: registry.clone(),
        }
    }
}

impl<T> Binding<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn value(&self) -> &Reactive<T> {
        &self.value
    }

    pub fn loading(&self) -> &Reactive<bool> {
        &self.loading
    }

    pub fn error(&self) -> &Reactive<Option<StoreError>> {
        &self.error
    }

    pub fn is_loading(&self) -> bool {
        self.loading.with(|loading| *loading)
    }

    /// Stops the subscription. Safe to call any number of times; returns
    /// whether this call did the stopping.
    pub fn cancel(&self) -> bool {
        self.registry.cancel(self.id)
    }

    pub fn is_active(&self) -> bool {
        self.registry.contains(self.id)
    }
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: self.value.clone(),
            loading: self.loading.clone(),
            error: self.error.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("value", &self.value)
            .field("loading", &self.is_loading())
            .field("error", &self.error.get())
            .finish()
    }
}
