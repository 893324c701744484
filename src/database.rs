//! The application-facing entry point.
//!
//! A [`Database`] wraps one backing-store client, created on the first
//! [`initialize`](Database::initialize) call and never replaced, plus the
//! registry of live bindings. Every helper resolves a logical path, forwards
//! to the store, and hands store errors back unchanged. Nothing here retries,
//! caches, or reorders.

use std::cell::OnceCell;
use std::future::Future;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::binding::{Binding, CollectionBinding, DocumentBinding};
use crate::error::{Error, StoreError};
use crate::reactive::TeardownHook;
use crate::registry::SubscriptionRegistry;
use crate::store::{
    into_fields, CollectionRef, Constraint, Credentials, Document, DocumentRef, DocumentStore,
    Query, Reference, SetOptions, WriteBatch,
};

/// Local emulator endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorConfig {
    pub host: String,
    pub port: u16,
}

/// Options for [`Database::initialize`].
#[derive(Debug, Clone, PartialEq)]
pub struct InitOptions {
    /// Route all traffic to a local emulator instead of production.
    pub emulator: Option<EmulatorConfig>,
    /// Try to enable the offline cache.
    pub offline_persistence: bool,
    /// Where the offline cache lives. `None` means this environment has no
    /// persistent storage, and persistence is skipped.
    pub data_dir: Option<PathBuf>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            emulator: None,
            offline_persistence: true,
            data_dir: None,
        }
    }
}

/// What happened to the offline cache during initialization.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceOutcome {
    Enabled(PathBuf),
    /// Turned off by configuration.
    Disabled,
    /// No persistent storage available.
    Skipped,
    /// Enabling failed; the store keeps working without a cache.
    Failed(StoreError),
    /// A concurrent initialization is still enabling it.
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitReport {
    /// `true` only for the call that created the store.
    pub fresh: bool,
    pub persistence: PersistenceOutcome,
}

/// Path-based helpers over one lazily created store client.
pub struct Database<S: DocumentStore> {
    store: OnceCell<S>,
    persistence: OnceCell<PersistenceOutcome>,
    registry: SubscriptionRegistry,
}

impl<S: DocumentStore> Default for Database<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DocumentStore> Database<S> {
    pub fn new() -> Self {
        Self::with_registry(SubscriptionRegistry::new())
    }

    /// Uses an existing registry, e.g. one shared with other databases.
    pub fn with_registry(registry: SubscriptionRegistry) -> Self {
        Self {
            store: OnceCell::new(),
            persistence: OnceCell::new(),
            registry,
        }
    }

    /// Creates the store client once. Later calls change nothing and report
    /// `fresh: false`.
    pub async fn initialize(
        &self,
        credentials: &Credentials,
        options: &InitOptions,
    ) -> Result<InitReport, Error> {
        if self.store.get().is_some() {
            tracing::debug!("document store already initialized");
            return Ok(InitReport {
                fresh: false,
                persistence: self
                    .persistence
                    .get()
                    .cloned()
                    .unwrap_or(PersistenceOutcome::Pending),
            });
        }

        let store = S::open(credentials)?;
        if let Some(emulator) = &options.emulator {
            store.connect_emulator(&emulator.host, emulator.port)?;
        }
        let store = match self.store.set(store) {
            Ok(()) => self.store.get().ok_or(Error::NotInitialized)?,
            Err(_) => {
                return Ok(InitReport {
                    fresh: false,
                    persistence: PersistenceOutcome::Pending,
                })
            }
        };
        tracing::info!(project = %credentials.project_id, "document store initialized");

        let persistence = match (options.offline_persistence, &options.data_dir) {
            (false, _) => PersistenceOutcome::Disabled,
            (true, None) => {
                tracing::debug!("no persistent storage available; offline cache skipped");
                PersistenceOutcome::Skipped
            }
            (true, Some(dir)) => match store.enable_persistence(dir).await {
                Ok(()) => PersistenceOutcome::Enabled(dir.clone()),
                Err(e) => {
                    tracing::warn!("offline cache unavailable, continuing online only: {}", e);
                    PersistenceOutcome::Failed(e)
                }
            },
        };
        if self.persistence.set(persistence.clone()).is_err() {
            tracing::debug!("persistence outcome already recorded; keeping the first one");
        }

        Ok(InitReport {
            fresh: true,
            persistence,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.store.get().is_some()
    }

    /// The store client, or [`Error::NotInitialized`].
    pub fn store(&self) -> Result<&S, Error> {
        self.store.get().ok_or(Error::NotInitialized)
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    // Paths

    pub fn doc_ref(&self, path: &str) -> Result<DocumentRef, Error> {
        self.store()?;
        Ok(DocumentRef::parse(path)?)
    }

    pub fn collection_ref(&self, path: &str) -> Result<CollectionRef, Error> {
        self.store()?;
        Ok(CollectionRef::parse(path)?)
    }

    /// Resolves a path to whichever reference its shape names.
    pub fn resolve(&self, path: &str) -> Result<Reference, Error> {
        self.store()?;
        Ok(Reference::parse(path)?)
    }

    /// A fresh document id for `collection_path`, without writing.
    pub fn new_id(&self, collection_path: &str) -> Result<String, Error> {
        Ok(self.collection_ref(collection_path)?.new_doc().id().to_string())
    }

    fn query(
        &self,
        collection_path: &str,
        constraints: impl IntoIterator<Item = Constraint>,
    ) -> Result<Query, Error> {
        Ok(Query::new(self.collection_ref(collection_path)?).with(constraints))
    }

    // Live bindings

    /// Live binding to one document; the value is `None` while it does not
    /// exist.
    pub fn bind_document(
        &self,
        path: &str,
        scope: Option<&dyn TeardownHook>,
    ) -> Result<DocumentBinding, Error> {
        let store = self.store()?;
        let doc = self.doc_ref(path)?;
        Ok(Binding::open(path, None, &self.registry, scope, |sink| {
            store.listen_document(&doc, sink)
        }))
    }

    /// Live binding to a collection query. No constraints binds the whole
    /// collection.
    pub fn bind_collection(
        &self,
        path: &str,
        constraints: impl IntoIterator<Item = Constraint>,
        scope: Option<&dyn TeardownHook>,
    ) -> Result<CollectionBinding, Error> {
        let store = self.store()?;
        let query = self.query(path, constraints)?;
        Ok(Binding::open(path, Vec::new(), &self.registry, scope, |sink| {
            store.listen_query(&query, sink)
        }))
    }

    /// Yields to the scheduler, then lets the store deliver every listener
    /// event that is ready. Other async helpers do this on their own.
    pub async fn settle(&self) -> Result<(), Error> {
        let store = self.store()?;
        tokio::task::yield_now().await;
        store.flush_events();
        Ok(())
    }

    /// Stops every live binding, whoever opened it.
    pub fn cancel_all(&self) -> usize {
        self.registry.cancel_all()
    }

    // One-shot reads

    pub async fn get_document_once(&self, path: &str) -> Result<Option<Document>, Error> {
        let doc = self.doc_ref(path)?;
        Ok(self.store()?.get_document(&doc).await?)
    }

    pub async fn get_collection_once(
        &self,
        path: &str,
        constraints: impl IntoIterator<Item = Constraint>,
    ) -> Result<Vec<Document>, Error> {
        let query = self.query(path, constraints)?;
        Ok(self.store()?.get_documents(&query).await?)
    }

    // Mutations

    /// Adds a document with a store-assigned id and returns that id.
    pub async fn create(&self, collection_path: &str, data: impl Serialize) -> Result<String, Error> {
        let collection = self.collection_ref(collection_path)?;
        let data = into_fields(data)?;
        let doc = self.store()?.add_document(&collection, data).await?;
        Ok(doc.id().to_string())
    }

    /// Overwrites the document, or merges into it with `SetOptions::merge()`.
    pub async fn replace(
        &self,
        path: &str,
        data: impl Serialize,
        options: SetOptions,
    ) -> Result<(), Error> {
        let doc = self.doc_ref(path)?;
        let data = into_fields(data)?;
        Ok(self.store()?.set_document(&doc, data, options).await?)
    }

    /// Updates the given fields of an existing document.
    pub async fn patch(&self, path: &str, partial: impl Serialize) -> Result<(), Error> {
        let doc = self.doc_ref(path)?;
        let data = into_fields(partial)?;
        Ok(self.store()?.update_document(&doc, data).await?)
    }

    pub async fn remove(&self, path: &str) -> Result<(), Error> {
        let doc = self.doc_ref(path)?;
        Ok(self.store()?.delete_document(&doc).await?)
    }

    // Grouped writes

    /// Lets `builder` fill a batch, then commits it atomically.
    pub async fn run_batch<F>(&self, builder: F) -> Result<(), Error>
    where
        F: FnOnce(&mut WriteBatch) -> Result<(), Error>,
    {
        let store = self.store()?;
        let mut batch = WriteBatch::new();
        builder(&mut batch)?;
        tracing::debug!(writes = batch.len(), "committing batch");
        Ok(store.commit(batch.into_writes()).await?)
    }

    /// Runs a read-then-write transaction. The store may run `body` more
    /// than once.
    pub async fn run_transaction<T, F, Fut>(&self, body: F) -> Result<T, Error>
    where
        F: FnMut(S::Transaction) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        Ok(self.store()?.run_transaction(body).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::reactive::Scope;
    use crate::store::query::{limit, order_by, where_field, Direction, FilterOp};
    use crate::store::{server_timestamp, Fields, MemoryStore, TransactionContext, Value};
    use serde_json::json;
    use tempfile::tempdir;

    async fn database() -> Database<MemoryStore> {
        let db = Database::new();
        db.initialize(&Credentials::for_project("demo"), &InitOptions::default())
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_helpers_fail_fast_before_initialize() {
        let db: Database<MemoryStore> = Database::new();
        assert!(matches!(db.doc_ref("todos/a"), Err(Error::NotInitialized)));
        assert!(matches!(db.bind_document("todos/a", None), Err(Error::NotInitialized)));
        assert!(matches!(db.get_document_once("todos/a").await, Err(Error::NotInitialized)));
        assert!(matches!(db.create("todos", json!({})).await, Err(Error::NotInitialized)));
        assert!(matches!(
            db.run_batch(|_| Ok(())).await,
            Err(Error::NotInitialized)
        ));
        assert!(!db.is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_happens_once() {
        let db: Database<MemoryStore> = Database::new();
        let options = InitOptions {
            offline_persistence: false,
            ..InitOptions::default()
        };
        let first = db.initialize(&Credentials::for_project("demo"), &options).await.unwrap();
        assert!(first.fresh);
        assert_eq!(first.persistence, PersistenceOutcome::Disabled);

        let second = db
            .initialize(&Credentials::for_project("other"), &options)
            .await
            .unwrap();
        assert!(!second.fresh);
        assert_eq!(second.persistence, PersistenceOutcome::Disabled);
        assert_eq!(db.store().unwrap().project_id(), "demo");
    }

    #[tokio::test]
    async fn test_initialize_with_emulator_and_cache() {
        let temp_dir = tempdir().unwrap();
        let db: Database<MemoryStore> = Database::new();
        let options = InitOptions {
            emulator: Some(EmulatorConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            }),
            offline_persistence: true,
            data_dir: Some(temp_dir.path().to_path_buf()),
        };
        let report = db.initialize(&Credentials::for_project("demo"), &options).await.unwrap();

        assert_eq!(
            report.persistence,
            PersistenceOutcome::Enabled(temp_dir.path().to_path_buf())
        );
        let store = db.store().unwrap();
        assert_eq!(store.emulator(), Some(("127.0.0.1".to_string(), 8080)));
        assert!(store.is_persistent());
    }

    #[tokio::test]
    async fn test_persistence_skipped_without_storage() {
        let db: Database<MemoryStore> = Database::new();
        let report = db
            .initialize(&Credentials::for_project("demo"), &InitOptions::default())
            .await
            .unwrap();
        assert_eq!(report.persistence, PersistenceOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported_not_raised() {
        let temp_dir = tempdir().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let db: Database<MemoryStore> = Database::new();
        let options = InitOptions {
            data_dir: Some(blocker),
            ..InitOptions::default()
        };
        let report = db.initialize(&Credentials::for_project("demo"), &options).await.unwrap();

        assert!(matches!(report.persistence, PersistenceOutcome::Failed(_)));
        assert!(db.is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_rejects_missing_project() {
        let db: Database<MemoryStore> = Database::new();
        let err = db
            .initialize(&Credentials::default(), &InitOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
        assert!(!db.is_initialized());
    }

    #[tokio::test]
    async fn test_resolve_by_shape() {
        let db = database().await;
        assert!(matches!(db.resolve("todos/a").unwrap(), Reference::Document(_)));
        assert!(matches!(db.resolve("todos").unwrap(), Reference::Collection(_)));
        assert_eq!(db.new_id("todos").unwrap().len(), crate::store::reference::AUTO_ID_LEN);
        assert!(db.doc_ref("todos").is_err());
    }

    #[tokio::test]
    async fn test_bind_document_lifecycle() {
        let db = database().await;
        let binding = db.bind_document("todos/a", None).unwrap();
        assert!(binding.is_loading());
        assert_eq!(db.registry().len(), 1);

        db.settle().await.unwrap();
        assert!(!binding.is_loading());
        assert_eq!(binding.value().get(), None);

        db.replace("todos/a", json!({"title": "x"}), SetOptions::default())
            .await
            .unwrap();
        let value = binding.value().get().unwrap();
        assert_eq!(value.get_str("title"), Some("x"));
        assert_eq!(value.id(), "a");

        binding.cancel();
        binding.cancel();
        assert!(db.registry().is_empty());
        assert_eq!(db.store().unwrap().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_existing_document_arrives_at_next_await() {
        let db = database().await;
        db.replace("todos/a", json!({"title": "there"}), SetOptions::default())
            .await
            .unwrap();
        let binding = db.bind_document("todos/a", None).unwrap();
        let list = db.bind_collection("todos", Vec::new(), None).unwrap();
        assert!(binding.is_loading());

        db.get_document_once("todos/other").await.unwrap();

        assert!(!binding.is_loading());
        assert_eq!(
            binding.value().get().and_then(|d| d.get_str("title").map(str::to_string)),
            Some("there".to_string())
        );
        assert!(!list.is_loading());
        assert_eq!(list.value().with(Vec::len), 1);
    }

    #[tokio::test]
    async fn test_settle_delivers_without_other_calls() {
        let db = database().await;
        db.replace("todos/a", json!({"title": "there"}), SetOptions::default())
            .await
            .unwrap();
        let binding = db.bind_document("todos/a", None).unwrap();

        db.settle().await.unwrap();
        assert!(!binding.is_loading());
        assert!(binding.value().get().is_some());

        let uninitialized: Database<MemoryStore> = Database::new();
        assert!(matches!(uninitialized.settle().await, Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn test_bind_collection_without_constraints_sees_everything() {
        let db = database().await;
        let binding = db.bind_collection("todos", Vec::new(), None).unwrap();
        db.create("todos", json!({"archived": true})).await.unwrap();
        db.create("todos", json!({"archived": false})).await.unwrap();
        assert_eq!(binding.value().with(Vec::len), 2);
    }

    #[tokio::test]
    async fn test_scope_teardown_stops_listener() {
        let db = database().await;
        let scope = Scope::new("TodoDetail");
        let binding = db.bind_document("todos/a", Some(&scope)).unwrap();
        assert_eq!(db.store().unwrap().listener_count(), 1);

        drop(scope);
        assert!(!binding.is_active());
        assert_eq!(db.store().unwrap().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_stops_every_binding() {
        let db = database().await;
        let scope = Scope::new("Page");
        let a = db.bind_document("todos/a", Some(&scope)).unwrap();
        let b = db.bind_collection("todos", vec![limit(5)], None).unwrap();

        assert_eq!(db.cancel_all(), 2);
        assert!(!a.is_active() && !b.is_active());
        assert_eq!(db.store().unwrap().listener_count(), 0);

        scope.teardown();
        assert!(db.registry().is_empty());
    }

    #[tokio::test]
    async fn test_subscription_error_is_data() {
        let db = database().await;
        db.replace("secrets/s1", json!({"v": 1}), SetOptions::default())
            .await
            .unwrap();
        let binding = db.bind_document("secrets/s1", None).unwrap();
        db.settle().await.unwrap();
        assert!(binding.value().get().is_some());

        db.store().unwrap().interrupt(StoreError::permission_denied("revoked"));

        assert_eq!(binding.value().version(), 1);
        assert!(binding.value().get().is_some());
        assert_eq!(
            binding.error().get().map(|e| e.code),
            Some(ErrorCode::PermissionDenied)
        );
        assert!(!binding.is_loading());
        assert!(binding.is_active());
    }

    #[tokio::test]
    async fn test_create_then_read_back() {
        let db = database().await;
        let id = db
            .create("todos", json!({"title": "x", "archived": false}))
            .await
            .unwrap();
        let doc = db.get_document_once(&format!("todos/{}", id)).await.unwrap().unwrap();
        assert_eq!(doc.id(), id);
        assert_eq!(doc.get_str("title"), Some("x"));
    }

    #[tokio::test]
    async fn test_patch_missing_document_fails() {
        let db = database().await;
        let err = db.patch("todos/nope", json!({"done": true})).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn test_replace_with_and_without_merge() {
        let db = database().await;
        db.replace("users/u1", json!({"name": "Ada", "age": 36}), SetOptions::default())
            .await
            .unwrap();

        db.replace("users/u1", json!({"age": 37}), SetOptions::merge())
            .await
            .unwrap();
        let merged = db.get_document_once("users/u1").await.unwrap().unwrap();
        assert_eq!(merged.get_str("name"), Some("Ada"));
        assert_eq!(merged.get("age"), Some(&json!(37)));

        db.replace("users/u1", json!({"age": 38}), SetOptions::default())
            .await
            .unwrap();
        let replaced = db.get_document_once("users/u1").await.unwrap().unwrap();
        assert_eq!(replaced.get("name"), None);
        assert_eq!(replaced.get("age"), Some(&json!(38)));
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let db = database().await;
        db.remove("todos/never").await.unwrap();
    }

    #[tokio::test]
    async fn test_operation_errors_propagate_unchanged() {
        let db = database().await;
        db.store().unwrap().deny("todos");
        let err = db.get_collection_once("todos", Vec::new()).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::PermissionDenied));
        let err = db.create("todos", json!({"x": 1})).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::PermissionDenied));
    }

    #[tokio::test]
    async fn test_non_map_data_is_invalid() {
        let db = database().await;
        let err = db.create("todos", json!("just a string")).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
    }

    #[tokio::test]
    async fn test_get_collection_once_applies_constraints() {
        let db = database().await;
        for (id, n) in [("a", 1), ("b", 2), ("c", 3)] {
            db.replace(&format!("items/{}", id), json!({"n": n}), SetOptions::default())
                .await
                .unwrap();
        }
        let docs = db
            .get_collection_once(
                "items",
                vec![
                    where_field("n", FilterOp::GreaterThan, 1),
                    order_by("n", Direction::Descending),
                ],
            )
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(Document::id).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_run_batch_commits_atomically() {
        let db = database().await;
        db.replace("todos/b", json!({"done": false}), SetOptions::default())
            .await
            .unwrap();

        db.run_batch(|batch| {
            batch.set(&db.doc_ref("todos/a")?, into_fields(json!({"title": "a"}))?);
            batch.update(&db.doc_ref("todos/b")?, into_fields(json!({"done": true}))?);
            batch.delete(&db.doc_ref("todos/c")?);
            Ok(())
        })
        .await
        .unwrap();

        let b = db.get_document_once("todos/b").await.unwrap().unwrap();
        assert_eq!(b.get("done"), Some(&json!(true)));
        assert!(db.get_document_once("todos/a").await.unwrap().is_some());

        let err = db
            .run_batch(|batch| {
                batch.set(&db.doc_ref("todos/d")?, into_fields(json!({"title": "d"}))?);
                batch.update(&db.doc_ref("todos/missing")?, into_fields(json!({"x": 1}))?);
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
        assert!(db.get_document_once("todos/d").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_builder_error_skips_commit() {
        let db = database().await;
        let err = db
            .run_batch(|batch| {
                batch.set(&db.doc_ref("todos/a")?, Fields::new());
                db.doc_ref("todos")?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
        assert!(db.get_document_once("todos/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_transaction_increments() {
        let db = database().await;
        let counter = db.doc_ref("counters/main").unwrap();
        for _ in 0..3 {
            db.run_transaction(|tx| {
                let counter = counter.clone();
                async move {
                    let current = tx
                        .get(&counter)
                        .await?
                        .and_then(|d| d.get("value").and_then(Value::as_i64))
                        .unwrap_or(0);
                    tx.set(
                        &counter,
                        into_fields(json!({"value": current + 1, "at": server_timestamp()}))?,
                    );
                    Ok::<_, StoreError>(())
                }
            })
            .await
            .unwrap();
        }
        let doc = db.get_document_once("counters/main").await.unwrap().unwrap();
        assert_eq!(doc.get("value"), Some(&json!(3)));
        assert!(doc.get_str("at").is_some());
    }
}
