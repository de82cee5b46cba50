//! Resumable per-category progress store (C9, §4.9).
//!
//! Backed by `sqlx` against a SQLite file opened with synchronous writes, the
//! same relational-file approach the donor crate uses for its own persistence
//! (`sqlx` with the `sqlite` feature). `PRAGMA synchronous=FULL` plus WAL mode
//! gives the "visible after crash" durability §4.9 requires; serialized writes
//! come from SQLite's single-writer semantics.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::CrawlError;

/// Progress for a single `(site_name, category_url)` pair (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryState {
    pub site_name: String,
    pub category_url: String,
    pub last_page: u32,
    pub last_product_count: u64,
    pub last_run_ts: DateTime<Utc>,
}

pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub async fn connect(database_path: &std::path::Path) -> Result<Self, CrawlError> {
        if let Some(parent) = database_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CrawlError::StateStoreError(format!("creating {}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| CrawlError::StateStoreError(format!("connecting: {e}")))?;

        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS category_state (
                site_name TEXT NOT NULL,
                category_url TEXT NOT NULL,
                last_page INTEGER NOT NULL,
                last_product_count INTEGER NOT NULL,
                last_run_ts TEXT NOT NULL,
                PRIMARY KEY (site_name, category_url)
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| CrawlError::StateStoreError(format!("migrating: {e}")))?;

        Ok(Self { pool })
    }

    pub async fn get(&self, site_name: &str, category_url: &str) -> Result<Option<CategoryState>, CrawlError> {
        let row = sqlx::query_as::<_, (String, String, i64, i64, String)>(
            "SELECT site_name, category_url, last_page, last_product_count, last_run_ts
             FROM category_state WHERE site_name = ? AND category_url = ?",
        )
        .bind(site_name)
        .bind(category_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CrawlError::StateStoreError(format!("get: {e}")))?;

        Ok(row.map(|(site_name, category_url, last_page, last_product_count, last_run_ts)| CategoryState {
            site_name,
            category_url,
            last_page: last_page as u32,
            last_product_count: last_product_count as u64,
            last_run_ts: DateTime::parse_from_rfc3339(&last_run_ts)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    /// Atomic replace-or-insert. Called only after a product has durably
    /// committed to the sheet (§3 invariant: never before).
    pub async fn upsert(&self, state: &CategoryState) -> Result<(), CrawlError> {
        sqlx::query(
            r"INSERT INTO category_state (site_name, category_url, last_page, last_product_count, last_run_ts)
              VALUES (?, ?, ?, ?, ?)
              ON CONFLICT(site_name, category_url) DO UPDATE SET
                last_page = excluded.last_page,
                last_product_count = excluded.last_product_count,
                last_run_ts = excluded.last_run_ts",
        )
        .bind(&state.site_name)
        .bind(&state.category_url)
        .bind(state.last_page as i64)
        .bind(state.last_product_count as i64)
        .bind(state.last_run_ts.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| CrawlError::StateStoreError(format!("upsert: {e}")))?;

        Ok(())
    }

    pub async fn iter_site_state(&self, site_name: &str) -> Result<Vec<CategoryState>, CrawlError> {
        let rows = sqlx::query_as::<_, (String, String, i64, i64, String)>(
            "SELECT site_name, category_url, last_page, last_product_count, last_run_ts
             FROM category_state WHERE site_name = ?",
        )
        .bind(site_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CrawlError::StateStoreError(format!("iter_site_state: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(site_name, category_url, last_page, last_product_count, last_run_ts)| CategoryState {
                site_name,
                category_url,
                last_page: last_page as u32,
                last_product_count: last_product_count as u64,
                last_run_ts: DateTime::parse_from_rfc3339(&last_run_ts)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    pub async fn reset_site(&self, site_name: &str) -> Result<(), CrawlError> {
        sqlx::query("DELETE FROM category_state WHERE site_name = ?")
            .bind(site_name)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::StateStoreError(format!("reset_site: {e}")))?;
        Ok(())
    }

    pub async fn reset_category(&self, site_name: &str, category_url: &str) -> Result<(), CrawlError> {
        sqlx::query("DELETE FROM category_state WHERE site_name = ? AND category_url = ?")
            .bind(site_name)
            .bind(category_url)
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::StateStoreError(format!("reset_category: {e}")))?;
        Ok(())
    }

    pub async fn reset_all(&self) -> Result<(), CrawlError> {
        sqlx::query("DELETE FROM category_state")
            .execute(&self.pool)
            .await
            .map_err(|e| CrawlError::StateStoreError(format!("reset_all: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::connect(&dir.path().join("state.db")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let (store, _dir) = temp_store().await;
        let state = CategoryState {
            site_name: "site-a".to_string(),
            category_url: "https://x/cat".to_string(),
            last_page: 2,
            last_product_count: 3,
            last_run_ts: Utc::now(),
        };
        store.upsert(&state).await.unwrap();
        let fetched = store.get("site-a", "https://x/cat").await.unwrap().unwrap();
        assert_eq!(fetched.last_page, 2);
        assert_eq!(fetched.last_product_count, 3);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let (store, _dir) = temp_store().await;
        let mut state = CategoryState {
            site_name: "site-a".to_string(),
            category_url: "https://x/cat".to_string(),
            last_page: 1,
            last_product_count: 1,
            last_run_ts: Utc::now(),
        };
        store.upsert(&state).await.unwrap();
        state.last_page = 3;
        state.last_product_count = 7;
        store.upsert(&state).await.unwrap();

        let rows = store.iter_site_state("site-a").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].last_product_count, 7);
    }

    #[tokio::test]
    async fn reset_category_removes_only_that_row() {
        let (store, _dir) = temp_store().await;
        for cat in ["a", "b"] {
            store
                .upsert(&CategoryState {
                    site_name: "site-a".to_string(),
                    category_url: format!("https://x/{cat}"),
                    last_page: 1,
                    last_product_count: 1,
                    last_run_ts: Utc::now(),
                })
                .await
                .unwrap();
        }
        store.reset_category("site-a", "https://x/a").await.unwrap();
        let rows = store.iter_site_state("site-a").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category_url, "https://x/b");
    }
}
