//! In-process document store.
//!
//! `MemoryStore` keeps every collection in memory and delivers listener
//! events from a FIFO queue on the calling thread. Listen calls only queue
//! the first event. Queued events go out at the start of the next store
//! operation, when a write commits, or when [`DocumentStore::flush_events`]
//! runs. Events queued while a listener is
//! running are delivered after it returns, so listeners may write back into
//! the store.
//!
//! With persistence enabled, committed documents are mirrored into a SQLite
//! cache and reloaded on the next start.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::path::Path;
use std::rc::Rc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use super::batch::MAX_BATCH_WRITES;
use super::cache::OfflineCache;
use super::query::Query;
use super::reference::{CollectionRef, DocumentRef};
use super::value::{merge_fields, resolve_server_timestamps, set_field, Fields};
use super::{
    Credentials, Document, DocumentListener, DocumentStore, ListenerRegistration, QueryListener,
    SetOptions, TransactionContext, Write,
};
use crate::error::{ErrorCode, StoreError};

/// Attempts a transaction gets before it fails with `Aborted`.
pub const MAX_TRANSACTION_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
struct StoredDocument {
    fields: Fields,
    version: u64,
}

enum Target {
    Document(DocumentRef),
    Query(Query),
}

enum Callback {
    Document(DocumentListener),
    Query(QueryListener),
}

#[derive(Debug, Clone, PartialEq)]
enum View {
    Document(Option<Document>),
    Query(Vec<Document>),
}

enum Event {
    Snapshot(View),
    Failed(StoreError),
}

struct ListenerEntry {
    target: Target,
    callback: Rc<RefCell<Callback>>,
    last: Option<View>,
    failed: bool,
}

/// Change produced by a commit: document path and its new fields, or `None`
/// when deleted.
type Change = (String, Option<Fields>);

#[derive(Default)]
struct Inner {
    project_id: String,
    // collection path -> document id -> document
    collections: BTreeMap<String, BTreeMap<String, StoredDocument>>,
    listeners: BTreeMap<u64, ListenerEntry>,
    next_listener: u64,
    version: u64,
    last_commit: Option<DateTime<Utc>>,
    denied: Vec<String>,
    emulator: Option<(String, u16)>,
    started: bool,
}

impl Inner {
    fn read(&self, doc: &DocumentRef) -> Option<&StoredDocument> {
        self.collections
            .get(doc.parent().path())
            .and_then(|docs| docs.get(doc.id()))
    }

    fn check_access(&self, path: &str) -> Result<(), StoreError> {
        let denied = self.denied.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        });
        if denied {
            return Err(StoreError::permission_denied(format!(
                "missing or insufficient permissions for '{}'",
                path
            )));
        }
        Ok(())
    }

    fn document_view(&self, doc: &DocumentRef) -> Option<Document> {
        self.read(doc).map(|stored| Document::new(doc, stored.fields.clone()))
    }

    fn query_view(&self, query: &Query) -> Vec<Document> {
        let collection = query.collection();
        let docs = self
            .collections
            .get(collection.path())
            .map(|docs| {
                docs.iter()
                    .filter_map(|(id, stored)| {
                        collection
                            .doc(id)
                            .ok()
                            .map(|reference| Document::new(&reference, stored.fields.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        query.execute(docs)
    }

    fn view(&self, target: &Target) -> Result<View, StoreError> {
        match target {
            Target::Document(doc) => {
                self.check_access(doc.path())?;
                Ok(View::Document(self.document_view(doc)))
            }
            Target::Query(query) => {
                self.check_access(query.collection().path())?;
                Ok(View::Query(self.query_view(query)))
            }
        }
    }

    /// Commit timestamp, strictly increasing across commits.
    fn next_commit_time(&mut self) -> String {
        let mut now = Utc::now();
        if let Some(last) = self.last_commit {
            if now <= last {
                now = last + Duration::nanoseconds(1);
            }
        }
        self.last_commit = Some(now);
        now.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    /// Validates every write against the current state, then applies them
    /// all. Nothing is applied if any write fails.
    fn apply(&mut self, writes: Vec<Write>) -> Result<Vec<Change>, StoreError> {
        if writes.len() > MAX_BATCH_WRITES {
            return Err(StoreError::invalid_argument(format!(
                "a commit may contain at most {} writes, got {}",
                MAX_BATCH_WRITES,
                writes.len()
            )));
        }
        for write in &writes {
            self.check_access(write.target().path())?;
        }

        let timestamp = self.next_commit_time();
        let mut staged: Vec<(DocumentRef, Option<Fields>)> = Vec::new();
        for write in writes {
            let doc = write.target().clone();
            let current = match staged.iter().rev().find(|(r, _)| *r == doc) {
                Some((_, fields)) => fields.clone(),
                None => self.read(&doc).map(|stored| stored.fields.clone()),
            };
            let next = match write {
                Write::Set { mut data, options, .. } => {
                    resolve_server_timestamps(&mut data, &timestamp);
                    match (options, current) {
                        (SetOptions { merge: true }, Some(mut existing)) => {
                            merge_fields(&mut existing, data);
                            Some(existing)
                        }
                        _ => Some(data),
                    }
                }
                Write::Update { mut data, .. } => {
                    let Some(mut existing) = current else {
                        return Err(StoreError::not_found(format!(
                            "no document to update: {}",
                            doc
                        )));
                    };
                    resolve_server_timestamps(&mut data, &timestamp);
                    for (path, value) in data {
                        set_field(&mut existing, &path, value);
                    }
                    Some(existing)
                }
                Write::Delete { .. } => None,
            };
            staged.push((doc, next));
        }

        self.version += 1;
        let version = self.version;
        let mut changes = Vec::with_capacity(staged.len());
        for (doc, fields) in staged {
            let collection = doc.parent().path().to_string();
            match &fields {
                Some(fields) => {
                    self.collections.entry(collection).or_default().insert(
                        doc.id().to_string(),
                        StoredDocument {
                            fields: fields.clone(),
                            version,
                        },
                    );
                }
                None => {
                    if let Some(docs) = self.collections.get_mut(&collection) {
                        docs.remove(doc.id());
                        if docs.is_empty() {
                            self.collections.remove(&collection);
                        }
                    }
                }
            }
            changes.push((doc.path().to_string(), fields));
        }
        Ok(changes)
    }

    /// Queues a snapshot for every listener whose view changed.
    fn collect_changed_views(&mut self, queue: &mut VecDeque<(u64, Event)>) {
        let mut updates = Vec::new();
        for (id, entry) in &self.listeners {
            if entry.failed {
                continue;
            }
            match self.view(&entry.target) {
                Ok(view) if entry.last.as_ref() != Some(&view) => updates.push((*id, Ok(view))),
                Ok(_) => {}
                Err(e) => updates.push((*id, Err(e))),
            }
        }
        for (id, update) in updates {
            if let Some(entry) = self.listeners.get_mut(&id) {
                match update {
                    Ok(view) => {
                        entry.last = Some(view.clone());
                        queue.push_back((id, Event::Snapshot(view)));
                    }
                    Err(e) => {
                        entry.failed = true;
                        queue.push_back((id, Event::Failed(e)));
                    }
                }
            }
        }
    }
}

/// In-process [`DocumentStore`]. Cloning yields another handle to the same
/// store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Rc<RefCell<Inner>>,
    queue: Rc<RefCell<VecDeque<(u64, Event)>>>,
    dispatching: Rc<Cell<bool>>,
    cache: Rc<RefCell<Option<OfflineCache>>>,
}

struct DispatchGuard<'a>(&'a Cell<bool>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl MemoryStore {
    pub fn new(project_id: impl Into<String>) -> Self {
        let inner = Inner {
            project_id: project_id.into(),
            ..Inner::default()
        };
        Self {
            inner: Rc::new(RefCell::new(inner)),
            queue: Rc::new(RefCell::new(VecDeque::new())),
            dispatching: Rc::new(Cell::new(false)),
            cache: Rc::new(RefCell::new(None)),
        }
    }

    pub fn project_id(&self) -> String {
        self.inner.borrow().project_id.clone()
    }

    /// The emulator endpoint traffic is routed to, if any.
    pub fn emulator(&self) -> Option<(String, u16)> {
        self.inner.borrow().emulator.clone()
    }

    pub fn is_persistent(&self) -> bool {
        self.cache.borrow().is_some()
    }

    /// Rejects reads, writes and listens at or below `prefix`.
    pub fn deny(&self, prefix: impl Into<String>) {
        let prefix = prefix.into().trim_matches('/').to_string();
        self.inner.borrow_mut().denied.push(prefix);
    }

    pub fn allow_all(&self) {
        self.inner.borrow_mut().denied.clear();
    }

    /// Number of listeners that have not been removed.
    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// Fails every active listener with `error`, as a lost backend would.
    pub fn interrupt(&self, error: StoreError) {
        {
            let mut inner = self.inner.borrow_mut();
            let mut queue = self.queue.borrow_mut();
            for (id, entry) in inner.listeners.iter_mut() {
                if !entry.failed {
                    entry.failed = true;
                    queue.push_back((*id, Event::Failed(error.clone())));
                }
            }
        }
        self.deliver_queued();
    }

    fn deliver_queued(&self) {
        if self.dispatching.replace(true) {
            return;
        }
        let _guard = DispatchGuard(&self.dispatching);
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some((id, event)) = next else {
                break;
            };
            let callback = self
                .inner
                .borrow()
                .listeners
                .get(&id)
                .map(|entry| Rc::clone(&entry.callback));
            let Some(callback) = callback else {
                continue;
            };
            let mut callback = callback.borrow_mut();
            match (&mut *callback, event) {
                (Callback::Document(f), Event::Snapshot(View::Document(doc))) => f(Ok(doc)),
                (Callback::Query(f), Event::Snapshot(View::Query(docs))) => f(Ok(docs)),
                (Callback::Document(f), Event::Failed(e)) => f(Err(e)),
                (Callback::Query(f), Event::Failed(e)) => f(Err(e)),
                _ => tracing::error!(listener = id, "listener event does not match its target"),
            }
        }
    }

    fn mark_started(&self) {
        self.inner.borrow_mut().started = true;
    }

    /// Start of every async operation: deliver what listeners are owed
    /// before doing anything else.
    fn begin(&self) {
        self.mark_started();
        self.deliver_queued();
    }

    fn listen(&self, target: Target, callback: Callback) -> ListenerRegistration {
        self.mark_started();
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_listener;
            inner.next_listener += 1;
            let (last, failed, event) = match inner.view(&target) {
                Ok(view) => (Some(view.clone()), false, Event::Snapshot(view)),
                Err(e) => (None, true, Event::Failed(e)),
            };
            inner.listeners.insert(
                id,
                ListenerEntry {
                    target,
                    callback: Rc::new(RefCell::new(callback)),
                    last,
                    failed,
                },
            );
            self.queue.borrow_mut().push_back((id, event));
            id
        };
        tracing::trace!(listener = id, "listener added");

        let inner = Rc::downgrade(&self.inner);
        ListenerRegistration::new(move || {
            if let Some(inner) = inner.upgrade() {
                if inner.borrow_mut().listeners.remove(&id).is_some() {
                    tracing::trace!(listener = id, "listener removed");
                }
            }
        })
    }

    async fn write(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        self.begin();
        let changes = {
            let mut inner = self.inner.borrow_mut();
            let changes = inner.apply(writes)?;
            inner.collect_changed_views(&mut self.queue.borrow_mut());
            changes
        };
        self.deliver_queued();
        self.persist(&changes).await;
        Ok(())
    }

    async fn persist(&self, changes: &[Change]) {
        let cache = self.cache.borrow().clone();
        let Some(cache) = cache else {
            return;
        };
        for (path, fields) in changes {
            let result = match fields {
                Some(fields) => cache.put(path, fields).await,
                None => cache.remove(path).await,
            };
            if let Err(e) = result {
                tracing::warn!(%path, "offline cache write failed: {}", e);
            }
        }
    }

    fn versions_unchanged(&self, reads: &HashMap<DocumentRef, Option<u64>>) -> bool {
        let inner = self.inner.borrow();
        reads
            .iter()
            .all(|(doc, version)| inner.read(doc).map(|stored| stored.version) == *version)
    }
}

impl DocumentStore for MemoryStore {
    type Transaction = MemoryTransaction;

    fn open(credentials: &Credentials) -> Result<Self, StoreError> {
        if credentials.project_id.trim().is_empty() {
            return Err(StoreError::invalid_argument(
                "credentials must name a project_id",
            ));
        }
        tracing::debug!(project = %credentials.project_id, "opening in-memory document store");
        Ok(Self::new(credentials.project_id.clone()))
    }

    fn connect_emulator(&self, host: &str, port: u16) -> Result<(), StoreError> {
        let mut inner = self.inner.borrow_mut();
        if inner.started {
            return Err(StoreError::new(
                ErrorCode::FailedPrecondition,
                "the emulator must be configured before the store is used",
            ));
        }
        tracing::info!("routing document store traffic to emulator at {}:{}", host, port);
        inner.emulator = Some((host.to_string(), port));
        Ok(())
    }

    async fn enable_persistence(&self, dir: &Path) -> Result<(), StoreError> {
        let project = self.project_id();
        let cache = OfflineCache::open(dir, &project).await?;
        let cached = cache.load_all().await?;
        let mut restored = 0;
        {
            let mut inner = self.inner.borrow_mut();
            for (path, fields) in cached {
                let Ok(doc) = DocumentRef::parse(&path) else {
                    tracing::warn!(%path, "ignoring cached document with invalid path");
                    continue;
                };
                if inner.read(&doc).is_some() {
                    continue;
                }
                inner
                    .collections
                    .entry(doc.parent().path().to_string())
                    .or_default()
                    .insert(doc.id().to_string(), StoredDocument { fields, version: 0 });
                restored += 1;
            }
            inner.collect_changed_views(&mut self.queue.borrow_mut());
        }
        *self.cache.borrow_mut() = Some(cache);
        tracing::debug!(restored, "offline cache enabled at {}", dir.display());
        Ok(())
    }

    fn listen_document(
        &self,
        doc: &DocumentRef,
        listener: DocumentListener,
    ) -> ListenerRegistration {
        self.listen(Target::Document(doc.clone()), Callback::Document(listener))
    }

    fn listen_query(&self, query: &Query, listener: QueryListener) -> ListenerRegistration {
        self.listen(Target::Query(query.clone()), Callback::Query(listener))
    }

    fn flush_events(&self) {
        self.deliver_queued();
    }

    async fn get_document(&self, doc: &DocumentRef) -> Result<Option<Document>, StoreError> {
        self.begin();
        let inner = self.inner.borrow();
        inner.check_access(doc.path())?;
        Ok(inner.document_view(doc))
    }

    async fn get_documents(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.begin();
        let inner = self.inner.borrow();
        inner.check_access(query.collection().path())?;
        Ok(inner.query_view(query))
    }

    async fn add_document(
        &self,
        collection: &CollectionRef,
        data: Fields,
    ) -> Result<DocumentRef, StoreError> {
        let doc = collection.new_doc();
        self.write(vec![Write::Set {
            doc: doc.clone(),
            data,
            options: SetOptions::default(),
        }])
        .await?;
        Ok(doc)
    }

    async fn set_document(
        &self,
        doc: &DocumentRef,
        data: Fields,
        options: SetOptions,
    ) -> Result<(), StoreError> {
        self.write(vec![Write::Set {
            doc: doc.clone(),
            data,
            options,
        }])
        .await
    }

    async fn update_document(&self, doc: &DocumentRef, data: Fields) -> Result<(), StoreError> {
        self.write(vec![Write::Update {
            doc: doc.clone(),
            data,
        }])
        .await
    }

    async fn delete_document(&self, doc: &DocumentRef) -> Result<(), StoreError> {
        self.write(vec![Write::Delete { doc: doc.clone() }]).await
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        if writes.is_empty() {
            self.begin();
            return Ok(());
        }
        self.write(writes).await
    }

    async fn run_transaction<T, F, Fut>(&self, mut body: F) -> Result<T, StoreError>
    where
        F: FnMut(Self::Transaction) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.begin();
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let tx = MemoryTransaction::new(self.clone());
            let value = body(tx.clone()).await?;
            let (reads, writes) = tx.finish()?;
            if self.versions_unchanged(&reads) {
                self.commit(writes).await?;
                return Ok(value);
            }
            tracing::debug!(attempt, "transaction read a stale document, retrying");
        }
        Err(StoreError::new(
            ErrorCode::Aborted,
            format!(
                "transaction failed after {} attempts because of concurrent writes",
                MAX_TRANSACTION_ATTEMPTS
            ),
        ))
    }
}

#[derive(Default)]
struct TransactionState {
    reads: HashMap<DocumentRef, Option<u64>>,
    writes: Vec<Write>,
    error: Option<StoreError>,
}

/// Transaction context of [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryTransaction {
    store: MemoryStore,
    state: Rc<RefCell<TransactionState>>,
}

impl MemoryTransaction {
    fn new(store: MemoryStore) -> Self {
        Self {
            store,
            state: Rc::new(RefCell::new(TransactionState::default())),
        }
    }

    fn push(&self, write: Write) -> &Self {
        self.state.borrow_mut().writes.push(write);
        self
    }

    fn finish(&self) -> Result<(HashMap<DocumentRef, Option<u64>>, Vec<Write>), StoreError> {
        let mut state = self.state.borrow_mut();
        if let Some(e) = state.error.take() {
            return Err(e);
        }
        Ok((
            std::mem::take(&mut state.reads),
            std::mem::take(&mut state.writes),
        ))
    }
}

impl TransactionContext for MemoryTransaction {
    async fn get(&self, doc: &DocumentRef) -> Result<Option<Document>, StoreError> {
        let mut state = self.state.borrow_mut();
        if !state.writes.is_empty() {
            let e = StoreError::invalid_argument(
                "transactions require all reads to be executed before all writes",
            );
            state.error = Some(e.clone());
            return Err(e);
        }
        let inner = self.store.inner.borrow();
        inner.check_access(doc.path())?;
        let stored = inner.read(doc);
        state
            .reads
            .entry(doc.clone())
            .or_insert_with(|| stored.map(|s| s.version));
        Ok(stored.map(|s| Document::new(doc, s.fields.clone())))
    }

    fn set_with(&self, doc: &DocumentRef, data: Fields, options: SetOptions) -> &Self {
        self.push(Write::Set {
            doc: doc.clone(),
            data,
            options,
        })
    }

    fn update(&self, doc: &DocumentRef, data: Fields) -> &Self {
        self.push(Write::Update {
            doc: doc.clone(),
            data,
        })
    }

    fn delete(&self, doc: &DocumentRef) -> &Self {
        self.push(Write::Delete { doc: doc.clone() })
    }
}
