use serde::Serialize;

use crate::binding::DocumentBinding;
use crate::database::Database;
use crate::error::{Error, StoreError};
use crate::reactive::TeardownHook;
use crate::store::{into_fields, server_timestamp, Document, DocumentStore, Fields, SetOptions};

const PROFILE_DOC: &str = "main";

/// Document path of a user's profile record.
pub fn profile_path(uid: &str) -> String {
    format!("users/{}/profile/{}", uid, PROFILE_DOC)
}

fn checked_path(uid: &str) -> Result<String, Error> {
    if uid.is_empty() || uid.contains('/') {
        return Err(StoreError::invalid_argument(format!("invalid user id: '{}'", uid)).into());
    }
    Ok(profile_path(uid))
}

fn stamped(data: impl Serialize) -> Result<Fields, Error> {
    let mut fields = into_fields(data)?;
    fields.insert("updatedAt".to_string(), server_timestamp());
    Ok(fields)
}

/// One profile record per user.
pub struct ProfileService<'a, S: DocumentStore> {
    db: &'a Database<S>,
}

impl<'a, S: DocumentStore> ProfileService<'a, S> {
    pub fn new(db: &'a Database<S>) -> Self {
        Self { db }
    }

    pub fn watch(&self, uid: &str, scope: Option<&dyn TeardownHook>) -> Result<DocumentBinding, Error> {
        self.db.bind_document(&checked_path(uid)?, scope)
    }

    pub async fn get(&self, uid: &str) -> Result<Option<Document>, Error> {
        self.db.get_document_once(&checked_path(uid)?).await
    }

    /// Saves profile fields, merging into what is already stored.
    pub async fn save(&self, uid: &str, data: impl Serialize) -> Result<(), Error> {
        self.save_with(uid, data, SetOptions::merge()).await
    }

    pub async fn save_with(
        &self,
        uid: &str,
        data: impl Serialize,
        options: SetOptions,
    ) -> Result<(), Error> {
        let path = checked_path(uid)?;
        self.db.replace(&path, stamped(data)?, options).await?;
        tracing::debug!(%uid, merge = options.merge, "profile saved");
        Ok(())
    }

    /// Updates fields of an existing profile.
    pub async fn update(&self, uid: &str, partial: impl Serialize) -> Result<(), Error> {
        let path = checked_path(uid)?;
        self.db.patch(&path, stamped(partial)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InitOptions;
    use crate::error::ErrorCode;
    use crate::store::{Credentials, MemoryStore};
    use serde_json::json;

    async fn database() -> Database<MemoryStore> {
        let db = Database::new();
        db.initialize(&Credentials::for_project("profile-test"), &InitOptions::default())
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_save_merges_by_default() {
        let db = database().await;
        let profiles = ProfileService::new(&db);
        profiles.save("u1", json!({"name": "Ada"})).await.unwrap();
        profiles.save("u1", json!({"theme": "dark"})).await.unwrap();

        let doc = profiles.get("u1").await.unwrap().unwrap();
        assert_eq!(doc.get_str("name"), Some("Ada"));
        assert_eq!(doc.get_str("theme"), Some("dark"));
        assert!(doc.get_str("updatedAt").is_some());
        assert_eq!(doc.path(), "users/u1/profile/main");
    }

    #[tokio::test]
    async fn test_save_without_merge_replaces() {
        let db = database().await;
        let profiles = ProfileService::new(&db);
        profiles.save("u1", json!({"name": "Ada"})).await.unwrap();
        profiles
            .save_with("u1", json!({"theme": "light"}), SetOptions::default())
            .await
            .unwrap();

        let doc = profiles.get("u1").await.unwrap().unwrap();
        assert_eq!(doc.get("name"), None);
        assert_eq!(doc.get_str("theme"), Some("light"));
    }

    #[tokio::test]
    async fn test_update_requires_existing_profile() {
        let db = database().await;
        let profiles = ProfileService::new(&db);
        let err = profiles.update("u2", json!({"name": "Grace"})).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotFound));

        profiles.save("u2", json!({"name": "Grace"})).await.unwrap();
        let before = profiles.get("u2").await.unwrap().unwrap();
        profiles.update("u2", json!({"name": "Grace H."})).await.unwrap();
        let after = profiles.get("u2").await.unwrap().unwrap();

        assert_eq!(after.get_str("name"), Some("Grace H."));
        assert!(after.get_str("updatedAt") > before.get_str("updatedAt"));
    }

    #[tokio::test]
    async fn test_watch_follows_saves() {
        let db = database().await;
        let profiles = ProfileService::new(&db);
        let binding = profiles.watch("u3", None).unwrap();
        profiles.save("u3", json!({"name": "Linus"})).await.unwrap();

        let doc = binding.value().get().unwrap();
        assert_eq!(doc.get_str("name"), Some("Linus"));
        assert!(!binding.is_loading());
    }

    #[tokio::test]
    async fn test_rejects_bad_uid() {
        let db = database().await;
        let profiles = ProfileService::new(&db);
        for uid in ["", "a/b"] {
            let err = profiles.get(uid).await.unwrap_err();
            assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
        }
    }
}
