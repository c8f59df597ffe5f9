//! Persistent cache tier backed by SQLite.
//!
//! One table keyed by fingerprint, holding the serialized payload and its
//! insertion timestamp, plus an index on the timestamp for TTL sweeps:
//!
//! ```sql
//! data(key TEXT PRIMARY KEY, val TEXT, ts INTEGER, created_at INTEGER, updated_at INTEGER)
//! ```
//!
//! The tier is advisory: callers log failures and continue with the memory
//! tier, so no store error ever propagates into a request path.

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Row, SqlitePool,
};
use std::{path::Path, str::FromStr};
use tracing::{debug, info};

/// Errors from the persistent tier.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Aggregate statistics over the persistent tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub entries: i64,
    pub oldest_ts: Option<i64>,
    pub newest_ts: Option<i64>,
}

/// SQLite-backed key/value store for cache entries.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) the store at `path`. The parent directory
    /// is created first, matching the configured `cache.db_file` contract.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created or the
    /// database cannot be opened or migrated.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!(path = %path.display(), "persistent cache opened");
        Ok(store)
    }

    /// Opens an in-memory store, for tests and db-less operation checks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the in-memory database cannot be created.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single connection keeps every operation on the same in-memory db.
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS data (
                key        TEXT PRIMARY KEY,
                val        TEXT NOT NULL,
                ts         INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_data_ts ON data (ts)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetches `(payload, inserted_at)` for a key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on driver failure.
    pub async fn get(&self, key: &str) -> Result<Option<(String, i64)>, StoreError> {
        let row = sqlx::query("SELECT val, ts FROM data WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some((row.try_get("val")?, row.try_get("ts")?))),
            None => Ok(None),
        }
    }

    /// Upserts a payload under `key` with insertion timestamp `ts`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on driver failure.
    pub async fn put(&self, key: &str, val: &str, ts: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO data (key, val, ts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 val = excluded.val,
                 ts = excluded.ts,
                 updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(val)
        .bind(ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes one key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on driver failure.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM data WHERE key = ?1").bind(key).execute(&self.pool).await?;
        Ok(())
    }

    /// TTL sweep primitive: removes every entry inserted before `cutoff`,
    /// returning how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on driver failure.
    pub async fn delete_older_than(&self, cutoff: i64) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM data WHERE ts < ?1").bind(cutoff).execute(&self.pool).await?;
        let removed = result.rows_affected();
        if removed > 0 {
            debug!(removed, cutoff, "swept expired persistent entries");
        }
        Ok(removed)
    }

    /// Number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on driver failure.
    pub async fn count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM data").fetch_one(&self.pool).await?;
        Ok(row.try_get("cnt")?)
    }

    /// Entry count plus oldest/newest insertion timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on driver failure.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt, MIN(ts) AS min_ts, MAX(ts) AS max_ts FROM data",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreStats {
            entries: row.try_get("cnt")?,
            oldest_ts: row.try_get("min_ts")?,
            newest_ts: row.try_get("max_ts")?,
        })
    }

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on driver failure.
    pub async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM data").execute(&self.pool).await?;
        Ok(())
    }

    /// Closes the connection pool. Idempotent.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
