//! services/api/src/adapters/trial_store.rs
//!
//! This module contains the trial-ledger adapter, the concrete implementation
//! of the `TrialStore` port. Records live in a single SQLite key/value table;
//! values are JSON documents so the persisted layout matches the record's
//! serde shape byte for byte.

use astrobot_core::{
    domain::TrialRecord,
    ports::{PortError, PortResult, TrialStore},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// A trial-ledger adapter backed by SQLite.
#[derive(Clone)]
pub struct SqliteTrialStore {
    pool: SqlitePool,
}

impl SqliteTrialStore {
    /// Connects to the database and ensures the ledger table exists.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Wraps an existing pool (used by tests with `sqlite::memory:`).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trial_records (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TrialStore for SqliteTrialStore {
    /// Loads a record. A row whose JSON no longer parses is an error, which
    /// the caller's fallback ladder distinguishes from an absent row.
    async fn load(&self, key: &str) -> PortResult<Option<TrialRecord>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT value FROM trial_records WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;

        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str::<TrialRecord>(&raw)
                .map(Some)
                .map_err(|e| PortError::Unexpected(format!("corrupted trial record: {e}"))),
        }
    }

    async fn save(&self, key: &str, record: &TrialRecord) -> PortResult<()> {
        let value = serde_json::to_string(record)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        sqlx::query(
            "INSERT INTO trial_records (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}
