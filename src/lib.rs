//! docbind
//!
//! Path-based helpers, reactive live bindings and write helpers over a
//! document-database client.

pub mod binding;
pub mod database;
pub mod error;
pub mod reactive;
pub mod registry;
pub mod services;
pub mod store;

pub use binding::{Binding, CollectionBinding, DocumentBinding};
pub use database::{Database, EmulatorConfig, InitOptions, InitReport, PersistenceOutcome};
pub use error::{Error, ErrorCode, StoreError};
pub use reactive::{HookUnavailable, Reactive, Scope, TeardownHook, WatchId};
pub use registry::{SubscriptionId, SubscriptionRegistry};
pub use services::{ProfileService, Todo, TodoService};
pub use store::{
    server_timestamp, Constraint, Credentials, Document, DocumentStore, MemoryStore, SetOptions,
    TransactionContext, WriteBatch,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
