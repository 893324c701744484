//! SQLite-backed offline cache for [`super::MemoryStore`].
//!
//! Several projects may share one cache directory; every row belongs to the
//! project that wrote it and is only visible to that project.

use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::value::Fields;
use crate::error::StoreError;

/// File name of the cache database inside the persistence directory.
pub const CACHE_FILE: &str = "offline-cache.db";

#[derive(Clone)]
pub(crate) struct OfflineCache {
    pool: SqlitePool,
    project: String,
}

impl OfflineCache {
    /// Opens (or creates) the cache database and runs migrations. Reads and
    /// writes are scoped to `project`.
    pub async fn open(dir: &Path, project: &str) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|e| {
            StoreError::unavailable(format!(
                "cannot create cache directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let db_url = format!("sqlite:{}?mode=rwc", dir.join(CACHE_FILE).display());
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(cache_error)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(cache_error)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| cache_error(e.into()))?;

        Ok(Self {
            pool,
            project: project.to_string(),
        })
    }

    /// Every cached document as `(path, fields)`. Rows that no longer parse
    /// are skipped.
    pub async fn load_all(&self) -> Result<Vec<(String, Fields)>, StoreError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT path, data FROM documents WHERE project = ? ORDER BY path")
                .bind(&self.project)
                .fetch_all(&self.pool)
                .await
                .map_err(cache_error)?;

        let mut docs = Vec::with_capacity(rows.len());
        for (path, data) in rows {
            match serde_json::from_str::<Fields>(&data) {
                Ok(fields) => docs.push((path, fields)),
                Err(e) => tracing::warn!(%path, "skipping unreadable cached document: {}", e),
            }
        }
        Ok(docs)
    }

    pub async fn put(&self, path: &str, fields: &Fields) -> Result<(), StoreError> {
        let data = serde_json::to_string(fields)
            .map_err(|e| StoreError::new(crate::error::ErrorCode::Internal, e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO documents (project, path, data, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(project, path) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.project)
        .bind(path)
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(cache_error)?;
        Ok(())
    }

    pub async fn remove(&self, path: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM documents WHERE project = ? AND path = ?")
            .bind(&self.project)
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(cache_error)?;
        Ok(())
    }
}

fn cache_error(e: sqlx::Error) -> StoreError {
    StoreError::unavailable(format!("offline cache: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn fields(value: serde_json::Value) -> Fields {
        crate::store::into_fields(value).unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path().join("nested").join("cache");

        OfflineCache::open(&dir, "demo").await.unwrap();

        assert!(dir.join(CACHE_FILE).exists());
    }

    #[tokio::test]
    async fn test_put_overwrites_and_remove_deletes() {
        let temp_dir = tempdir().unwrap();
        let cache = OfflineCache::open(temp_dir.path(), "demo").await.unwrap();

        cache.put("todos/a", &fields(json!({"title": "one"}))).await.unwrap();
        cache.put("todos/a", &fields(json!({"title": "two"}))).await.unwrap();
        cache.put("todos/b", &fields(json!({"title": "three"}))).await.unwrap();
        cache.remove("todos/b").await.unwrap();

        let docs = cache.load_all().await.unwrap();
        assert_eq!(docs, vec![("todos/a".to_string(), fields(json!({"title": "two"})))]);
    }

    #[tokio::test]
    async fn test_reopen_keeps_documents() {
        let temp_dir = tempdir().unwrap();
        {
            let cache = OfflineCache::open(temp_dir.path(), "demo").await.unwrap();
            cache.put("users/u1/profile/main", &fields(json!({"name": "Ada"}))).await.unwrap();
        }
        let cache = OfflineCache::open(temp_dir.path(), "demo").await.unwrap();
        let docs = cache.load_all().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, "users/u1/profile/main");
    }

    #[tokio::test]
    async fn test_projects_do_not_share_rows() {
        let temp_dir = tempdir().unwrap();
        let alpha = OfflineCache::open(temp_dir.path(), "alpha").await.unwrap();
        let beta = OfflineCache::open(temp_dir.path(), "beta").await.unwrap();

        alpha.put("secrets/s", &fields(json!({"owner": "alpha"}))).await.unwrap();
        beta.put("secrets/s", &fields(json!({"owner": "beta"}))).await.unwrap();
        beta.remove("secrets/s").await.unwrap();

        assert!(beta.load_all().await.unwrap().is_empty());
        let docs = alpha.load_all().await.unwrap();
        assert_eq!(docs, vec![("secrets/s".to_string(), fields(json!({"owner": "alpha"})))]);
    }
}
