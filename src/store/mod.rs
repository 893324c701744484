//! Boundary with the backing document-database client.
//!
//! [`DocumentStore`] is everything the helpers in this crate need from a
//! store: references, live listeners, one-shot reads, writes, batches and
//! transactions. The store runs on a single logical thread, so its futures
//! are not `Send` and its listeners are plain boxed closures.
//!
//! [`MemoryStore`] is the bundled in-process implementation.

mod batch;
mod cache;
mod memory;
pub mod query;
pub mod reference;
pub mod value;

use std::future::Future;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use batch::{WriteBatch, MAX_BATCH_WRITES};
pub use memory::{MemoryStore, MemoryTransaction, MAX_TRANSACTION_ATTEMPTS};
pub use query::{Constraint, CursorPosition, Direction, FilterOp, Query};
pub use reference::{auto_id, CollectionRef, DocumentRef, Reference};
pub use value::{into_fields, server_timestamp, Fields, Value};

/// Connection credentials for the backing store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub auth_domain: Option<String>,
    pub project_id: String,
    pub storage_bucket: Option<String>,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
    pub measurement_id: Option<String>,
}

impl Credentials {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }
}

/// Materialized state of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    path: String,
    fields: Fields,
}

impl Document {
    pub fn new(reference: &DocumentRef, fields: Fields) -> Self {
        Self {
            id: reference.id().to_string(),
            path: reference.path().to_string(),
            fields,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Looks up a field, following dotted paths.
    pub fn get(&self, field: &str) -> Option<&Value> {
        value::field(&self.fields, field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// The document as one map: `id` first, then the stored fields, which
    /// win if they also carry an `id`.
    pub fn to_value(&self) -> Value {
        let mut map = Fields::new();
        map.insert("id".to_string(), Value::from(self.id.clone()));
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Decodes the document (including its `id`) into a typed view.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }
}

/// Options for `set` writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Keep fields not present in the new data.
    pub merge: bool,
}

impl SetOptions {
    pub fn merge() -> Self {
        Self { merge: true }
    }
}

/// One write of a batch or transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Set {
        doc: DocumentRef,
        data: Fields,
        options: SetOptions,
    },
    Update {
        doc: DocumentRef,
        data: Fields,
    },
    Delete {
        doc: DocumentRef,
    },
}

impl Write {
    pub fn target(&self) -> &DocumentRef {
        match self {
            Write::Set { doc, .. } | Write::Update { doc, .. } | Write::Delete { doc } => doc,
        }
    }
}

pub type DocumentListener = Box<dyn FnMut(Result<Option<Document>, StoreError>)>;
pub type QueryListener = Box<dyn FnMut(Result<Vec<Document>, StoreError>)>;

/// Handle returned by `listen_*`; removing it stops the listener.
///
/// Dropping the registration does not stop the listener.
pub struct ListenerRegistration {
    remove: Box<dyn FnOnce()>,
}

impl ListenerRegistration {
    pub fn new(remove: impl FnOnce() + 'static) -> Self {
        Self {
            remove: Box::new(remove),
        }
    }

    pub fn remove(self) {
        (self.remove)()
    }

    pub fn into_unsubscribe(self) -> Box<dyn FnOnce()> {
        self.remove
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration").finish_non_exhaustive()
    }
}

/// Read-then-write context handed to a transaction body.
///
/// Writes are buffered and applied at commit; all reads must happen before
/// the first write.
#[allow(async_fn_in_trait)]
pub trait TransactionContext: Clone {
    async fn get(&self, doc: &DocumentRef) -> Result<Option<Document>, StoreError>;

    fn set(&self, doc: &DocumentRef, data: Fields) -> &Self {
        self.set_with(doc, data, SetOptions::default())
    }

    fn set_with(&self, doc: &DocumentRef, data: Fields, options: SetOptions) -> &Self;

    fn update(&self, doc: &DocumentRef, data: Fields) -> &Self;

    fn delete(&self, doc: &DocumentRef) -> &Self;
}

/// The backing document-database client.
#[allow(async_fn_in_trait)]
pub trait DocumentStore: Sized {
    type Transaction: TransactionContext;

    /// Creates a client for the given project.
    fn open(credentials: &Credentials) -> Result<Self, StoreError>;

    /// Routes traffic to a local emulator. Only valid before first use.
    fn connect_emulator(&self, host: &str, port: u16) -> Result<(), StoreError>;

    /// Turns on the local offline cache under `dir`.
    async fn enable_persistence(&self, dir: &Path) -> Result<(), StoreError>;

    /// Starts a live listener on one document. The first event arrives after
    /// this call returns.
    fn listen_document(&self, doc: &DocumentRef, listener: DocumentListener)
        -> ListenerRegistration;

    /// Starts a live listener on a query. The first event arrives after this
    /// call returns.
    fn listen_query(&self, query: &Query, listener: QueryListener) -> ListenerRegistration;

    /// Delivers listener events that are ready. Every async operation does
    /// this first; stores that deliver events on their own keep the default.
    fn flush_events(&self) {}

    async fn get_document(&self, doc: &DocumentRef) -> Result<Option<Document>, StoreError>;

    async fn get_documents(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Creates a document with a store-assigned id.
    async fn add_document(
        &self,
        collection: &CollectionRef,
        data: Fields,
    ) -> Result<DocumentRef, StoreError>;

    async fn set_document(
        &self,
        doc: &DocumentRef,
        data: Fields,
        options: SetOptions,
    ) -> Result<(), StoreError>;

    /// Merges top-level (or dotted) fields; fails if the document is missing.
    async fn update_document(&self, doc: &DocumentRef, data: Fields) -> Result<(), StoreError>;

    async fn delete_document(&self, doc: &DocumentRef) -> Result<(), StoreError>;

    /// Applies all writes atomically.
    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError>;

    /// Runs `body` until it commits without read conflicts. The body may run
    /// more than once.
    async fn run_transaction<T, F, Fut>(&self, body: F) -> Result<T, StoreError>
    where
        F: FnMut(Self::Transaction) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>;
}
