//! # SQLite Cycle Store
//!
//! Append-only persistence for poll cycles, one SQLite database file per
//! process run. Provides an idempotent schema bootstrap and a single `append`
//! per cycle; the `sqlx` pool is capped at one connection so appends are
//! serialized at the store, never interleaved by concurrent writers.
//!
//! Row shape: `timestamp` (primary key, Unix seconds) plus one TEXT column
//! per telemetry category, named by the category key and holding that
//! category's data serialized as JSON. Categories with no data in a cycle
//! store the JSON `null` literal, keeping the row shape uniform across the
//! closed category set. A second cycle with the same timestamp is a
//! primary-key conflict surfaced as [`StoreError::WriteError`], never a
//! silent overwrite.

use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;

use crate::core::category::TelemetryCategory;
use crate::core::model::PollCycle;

/// Custom error types for cycle store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open telemetry database: {0}")]
    ConnectionError(String),
    #[error("Telemetry write failed: {0}")]
    WriteError(String),
    #[error("Telemetry read failed: {0}")]
    ReadError(String),
}

/// A wrapper around the per-run SQLite database.
pub struct TelemetryDb {
    pool: SqlitePool,
}

impl TelemetryDb {
    /// Opens (creating if missing) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        // One connection: appends serialize at the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Creates the telemetry table for a fresh run. Idempotent.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let sql = create_table_sql();
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::WriteError(e.to_string()))?;
        Ok(())
    }

    /// Appends one row for `cycle`, keyed by its timestamp.
    pub async fn append(&self, cycle: &PollCycle) -> Result<(), StoreError> {
        let sql = insert_sql();
        let mut query = sqlx::query(&sql).bind(cycle.timestamp);
        for category in TelemetryCategory::ALL {
            let value = cycle
                .record(category)
                .map(|record| record.data.clone())
                .unwrap_or(serde_json::Value::Null);
            query = query.bind(value.to_string());
        }

        query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::WriteError(e.to_string()))?;
        Ok(())
    }

    /// Point lookup of one category's stored value for one cycle. Returns
    /// `None` when no row carries `timestamp`.
    pub async fn read_category(
        &self,
        timestamp: i64,
        category: TelemetryCategory,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let sql = format!(
            "SELECT \"{}\" FROM telemetry WHERE timestamp = ?",
            category.as_key()
        );
        let row = sqlx::query(&sql)
            .bind(timestamp)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::ReadError(e.to_string()))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let text: String = row
                    .try_get(0)
                    .map_err(|e| StoreError::ReadError(e.to_string()))?;
                let value = serde_json::from_str(&text)
                    .map_err(|e| StoreError::ReadError(e.to_string()))?;
                Ok(Some(value))
            }
        }
    }

    /// Number of persisted cycles.
    pub async fn cycle_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) FROM telemetry")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::ReadError(e.to_string()))?;
        row.try_get(0).map_err(|e| StoreError::ReadError(e.to_string()))
    }
}

/// Database file for this run: stamped with the startup local time so every
/// run appends to a fresh file.
pub fn run_database_path(data_dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%m-%d_%H-%M-%S");
    data_dir.join(format!("tss_data_{}.db", stamp))
}

fn quoted_columns() -> String {
    TelemetryCategory::ALL
        .iter()
        .map(|category| format!("\"{}\"", category.as_key()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn create_table_sql() -> String {
    let columns = TelemetryCategory::ALL
        .iter()
        .map(|category| format!("\"{}\" TEXT", category.as_key()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS telemetry(timestamp INTEGER PRIMARY KEY, {})",
        columns
    )
}

fn insert_sql() -> String {
    let placeholders = vec!["?"; TelemetryCategory::ALL.len() + 1].join(", ");
    format!(
        "INSERT INTO telemetry (timestamp, {}) VALUES ({})",
        quoted_columns(),
        placeholders
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::TelemetryRecord;
    use serde_json::{json, Value};

    fn cycle_at(timestamp: i64) -> PollCycle {
        let records = TelemetryCategory::ALL
            .iter()
            .map(|category| TelemetryRecord {
                category: *category,
                data: json!({"ts": timestamp, "key": category.as_key()}),
                timestamp,
            })
            .collect();
        PollCycle::new(timestamp, records)
    }

    async fn fresh_db(dir: &tempfile::TempDir) -> TelemetryDb {
        let db = TelemetryDb::open(&dir.path().join("telemetry.db"))
            .await
            .unwrap();
        db.initialize().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = fresh_db(&dir).await;
        db.initialize().await.unwrap();
        assert_eq!(db.cycle_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_distinct_timestamps_are_independently_retrievable() {
        let dir = tempfile::tempdir().unwrap();
        let db = fresh_db(&dir).await;

        db.append(&cycle_at(100)).await.unwrap();
        db.append(&cycle_at(101)).await.unwrap();

        assert_eq!(db.cycle_count().await.unwrap(), 2);
        let stored = db
            .read_category(100, TelemetryCategory::RoverTelemetry)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["ts"], 100);
        let stored = db
            .read_category(101, TelemetryCategory::LtvErrors)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["key"], "ltv:errors");
    }

    #[tokio::test]
    async fn test_duplicate_timestamp_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = fresh_db(&dir).await;

        db.append(&cycle_at(42)).await.unwrap();
        let second = db.append(&cycle_at(42)).await;
        assert!(matches!(second, Err(StoreError::WriteError(_))));
        assert_eq!(db.cycle_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_absent_category_stores_json_null() {
        let dir = tempfile::tempdir().unwrap();
        let db = fresh_db(&dir).await;

        // A cycle missing every record still writes a uniform row.
        db.append(&PollCycle::new(7, Vec::new())).await.unwrap();
        let stored = db
            .read_category(7, TelemetryCategory::EvaError)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, Value::Null);
    }

    #[tokio::test]
    async fn test_missing_row_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let db = fresh_db(&dir).await;
        let stored = db
            .read_category(9999, TelemetryCategory::EvaUia)
            .await
            .unwrap();
        assert!(stored.is_none());
    }
}
