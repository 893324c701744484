use serde::{Deserialize, Serialize};
use std::fmt;

use crate::binding::{CollectionBinding, DocumentBinding};
use crate::database::Database;
use crate::error::Error;
use crate::reactive::TeardownHook;
use crate::store::query::{limit, order_by, where_field};
use crate::store::{server_timestamp, Constraint, Direction, Document, DocumentStore, FilterOp};

pub const TODOS: &str = "todos";

/// Most todos the active list shows.
pub const ACTIVE_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub archived: bool,
    /// Commit timestamp; absent until the store has resolved it.
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

impl Todo {
    pub fn from_document(doc: &Document) -> Result<Self, Error> {
        Ok(doc.deserialize()?)
    }

    pub fn path(&self) -> String {
        format!("{}/{}", TODOS, self.id)
    }
}

impl fmt::Display for Todo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.archived { "x" } else { " " };
        write!(f, "[{}] {}  {}", mark, self.id, self.title)
    }
}

#[derive(Serialize)]
struct NewTodo<'a> {
    title: &'a str,
    archived: bool,
    #[serde(rename = "createdAt")]
    created_at: serde_json::Value,
}

#[derive(Serialize)]
struct ArchivedPatch {
    archived: bool,
}

/// The `todos` collection.
pub struct TodoService<'a, S: DocumentStore> {
    db: &'a Database<S>,
}

impl<'a, S: DocumentStore> TodoService<'a, S> {
    pub fn new(db: &'a Database<S>) -> Self {
        Self { db }
    }

    fn active_constraints() -> Vec<Constraint> {
        vec![
            where_field("archived", FilterOp::Equal, false),
            order_by("createdAt", Direction::Descending),
            limit(ACTIVE_LIMIT),
        ]
    }

    /// Live list of unarchived todos, newest first.
    pub fn watch_active(&self, scope: Option<&dyn TeardownHook>) -> Result<CollectionBinding, Error> {
        self.db
            .bind_collection(TODOS, Self::active_constraints(), scope)
    }

    pub fn watch(&self, id: &str, scope: Option<&dyn TeardownHook>) -> Result<DocumentBinding, Error> {
        self.db.bind_document(&format!("{}/{}", TODOS, id), scope)
    }

    /// Adds an unarchived todo stamped with the commit time.
    pub async fn create(&self, title: &str) -> Result<String, Error> {
        let id = self
            .db
            .create(
                TODOS,
                NewTodo {
                    title,
                    archived: false,
                    created_at: server_timestamp(),
                },
            )
            .await?;
        tracing::info!(todo = %id, "todo created");
        Ok(id)
    }

    pub async fn toggle_archived(&self, todo: &Todo) -> Result<(), Error> {
        self.db
            .patch(
                &todo.path(),
                ArchivedPatch {
                    archived: !todo.archived,
                },
            )
            .await
    }

    pub async fn remove(&self, todo: &Todo) -> Result<(), Error> {
        self.db.remove(&todo.path()).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Todo>, Error> {
        self.db
            .get_document_once(&format!("{}/{}", TODOS, id))
            .await?
            .as_ref()
            .map(Todo::from_document)
            .transpose()
    }

    /// One-shot list, newest first. Archived todos are included only when
    /// `include_archived` is set. Documents that are not todos are skipped.
    pub async fn list(&self, include_archived: bool) -> Result<Vec<Todo>, Error> {
        let constraints = if include_archived {
            vec![order_by("createdAt", Direction::Descending)]
        } else {
            Self::active_constraints()
        };
        let docs = self.db.get_collection_once(TODOS, constraints).await?;
        Ok(todos_from(&docs))
    }
}

/// Decodes a live collection value, skipping documents that are not todos.
pub fn todos_from(docs: &[Document]) -> Vec<Todo> {
    docs.iter()
        .filter_map(|doc| match Todo::from_document(doc) {
            Ok(todo) => Some(todo),
            Err(e) => {
                tracing::warn!(path = %doc.path(), "skipping malformed todo: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InitOptions;
    use crate::reactive::Scope;
    use crate::store::{Credentials, MemoryStore, SetOptions};
    use serde_json::json;

    async fn database() -> Database<MemoryStore> {
        let db = Database::new();
        db.initialize(&Credentials::for_project("todos-test"), &InitOptions::default())
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_create_stamps_fields() {
        let db = database().await;
        let todos = TodoService::new(&db);
        let id = todos.create("Buy milk").await.unwrap();

        let todo = todos.get(&id).await.unwrap().unwrap();
        assert_eq!(todo.id, id);
        assert_eq!(todo.title, "Buy milk");
        assert!(!todo.archived);
        assert!(todo.created_at.is_some());
    }

    #[tokio::test]
    async fn test_watch_active_newest_first() {
        let db = database().await;
        let todos = TodoService::new(&db);
        let scope = Scope::new("TodoList");
        let binding = todos.watch_active(Some(&scope)).unwrap();
        assert!(binding.is_loading());

        let first = todos.create("one").await.unwrap();
        let second = todos.create("two").await.unwrap();
        let third = todos.create("three").await.unwrap();

        let ids: Vec<String> = binding
            .value()
            .with(|docs| docs.iter().map(|d| d.id().to_string()).collect());
        assert_eq!(ids, vec![third, second, first]);
        assert!(!binding.is_loading());
    }

    #[tokio::test]
    async fn test_archived_leave_active_list() {
        let db = database().await;
        let todos = TodoService::new(&db);
        let binding = todos.watch_active(None).unwrap();
        let id = todos.create("done soon").await.unwrap();
        todos.create("still open").await.unwrap();

        let todo = todos.get(&id).await.unwrap().unwrap();
        todos.toggle_archived(&todo).await.unwrap();

        let active = binding.value().with(|docs| todos_from(docs));
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "still open");

        let all = todos.list(true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|t| t.id == id && t.archived));
    }

    #[tokio::test]
    async fn test_toggle_twice_restores() {
        let db = database().await;
        let todos = TodoService::new(&db);
        let id = todos.create("flip").await.unwrap();

        let todo = todos.get(&id).await.unwrap().unwrap();
        todos.toggle_archived(&todo).await.unwrap();
        let todo = todos.get(&id).await.unwrap().unwrap();
        assert!(todo.archived);
        todos.toggle_archived(&todo).await.unwrap();
        assert!(!todos.get(&id).await.unwrap().unwrap().archived);
    }

    #[tokio::test]
    async fn test_remove_and_watch() {
        let db = database().await;
        let todos = TodoService::new(&db);
        let id = todos.create("gone").await.unwrap();
        let binding = todos.watch(&id, None).unwrap();
        db.settle().await.unwrap();
        assert!(binding.value().get().is_some());

        let todo = todos.get(&id).await.unwrap().unwrap();
        todos.remove(&todo).await.unwrap();
        assert!(binding.value().get().is_none());
        assert!(todos.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_documents_are_skipped() {
        let db = database().await;
        db.replace("todos/bad", json!({"archived": false}), SetOptions::default())
            .await
            .unwrap();
        let docs = db.get_collection_once(TODOS, Vec::new()).await.unwrap();
        assert!(todos_from(&docs).is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_malformed_documents() {
        let db = database().await;
        let todos = TodoService::new(&db);
        let id = todos.create("real").await.unwrap();
        db.replace(
            "todos/bad",
            json!({"archived": false, "createdAt": "2026-01-01T00:00:00.000000000Z"}),
            SetOptions::default(),
        )
        .await
        .unwrap();

        for include_archived in [false, true] {
            let list = todos.list(include_archived).await.unwrap();
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].id, id);
        }
    }

    #[test]
    fn test_display() {
        let todo = Todo {
            id: "abc".to_string(),
            title: "Write tests".to_string(),
            archived: true,
            created_at: None,
        };
        assert_eq!(todo.to_string(), "[x] abc  Write tests");
    }
}
