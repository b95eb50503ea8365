// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL record repository.
//!
//! ```sql
//! CREATE TABLE cve_records (
//!   id VARCHAR(64) PRIMARY KEY,
//!   title TEXT NOT NULL,
//!   description TEXT NOT NULL,
//!   date_published VARCHAR(40) NOT NULL,  -- RFC 3339 with offset
//!   date_updated VARCHAR(40) NOT NULL
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! Timestamps are stored as RFC 3339 text since the `Any` driver has no
//! portable datetime mapping. MySQL returns TEXT columns as bytes through
//! `Any`, so reads try `String` first and fall back to `Vec<u8>`.
//!
//! Insert uses `ON CONFLICT(id) DO NOTHING` (SQLite) or `INSERT IGNORE`
//! (MySQL); zero affected rows means the id already existed.

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::collections::HashMap;
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{BatchWriteResult, RecordStore, StorageError};
use crate::record::NormalizedRecord;
use crate::resilience::retry::{retry, RetryConfig};
use crate::timestamp::{format_timestamp, parse_timestamp};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// MySQL max_allowed_packet is typically 16MB; descriptions can be long.
const CHUNK_SIZE: usize = 200;

pub struct SqlRecordStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlRecordStore {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// create the table if needed.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 4 } else { 10 })
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS cve_records (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                date_published TEXT NOT NULL,
                date_updated TEXT NOT NULL
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS cve_records (
                id VARCHAR(64) PRIMARY KEY,
                title TEXT NOT NULL,
                description MEDIUMTEXT NOT NULL,
                date_published VARCHAR(40) NOT NULL,
                date_updated VARCHAR(40) NOT NULL,
                INDEX idx_date_updated (date_updated)
            )
            "#
        };

        retry("sql_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 AS present FROM cve_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(row.is_some())
    }

    fn row_to_record(id: &str, row: &AnyRow) -> Result<NormalizedRecord, StorageError> {
        let title = text_column(row, "title")?;
        let description = text_column(row, "description")?;
        let published = text_column(row, "date_published")?;
        let updated = text_column(row, "date_updated")?;

        let parse = |column: &str, value: &str| {
            parse_timestamp(value).map_err(|e| {
                StorageError::Backend(format!("Row {} has unreadable {} '{}': {}", id, column, value, e))
            })
        };

        Ok(NormalizedRecord {
            id: id.to_string(),
            title,
            description,
            date_published: parse("date_published", &published)?,
            date_updated: parse("date_updated", &updated)?,
        })
    }

    /// Write one chunk as a single multi-row upsert.
    async fn upsert_chunk(&self, chunk: &[NormalizedRecord]) -> Result<usize, StorageError> {
        let placeholders: Vec<&str> = (0..chunk.len()).map(|_| "(?, ?, ?, ?, ?)").collect();

        let sql = if self.is_sqlite {
            format!(
                "INSERT INTO cve_records (id, title, description, date_published, date_updated) VALUES {} \
                 ON CONFLICT(id) DO UPDATE SET \
                    title = excluded.title, \
                    description = excluded.description, \
                    date_published = excluded.date_published, \
                    date_updated = excluded.date_updated",
                placeholders.join(", ")
            )
        } else {
            format!(
                "INSERT INTO cve_records (id, title, description, date_published, date_updated) VALUES {} \
                 ON DUPLICATE KEY UPDATE \
                    title = VALUES(title), \
                    description = VALUES(description), \
                    date_published = VALUES(date_published), \
                    date_updated = VALUES(date_updated)",
                placeholders.join(", ")
            )
        };

        let rows: Vec<BoundRow> = chunk.iter().map(BoundRow::from).collect();

        retry("sql_upsert_batch", &RetryConfig::batch_write(), || {
            let sql = sql.clone();
            let rows = rows.clone();
            async move {
                let mut query = sqlx::query(&sql);
                for row in &rows {
                    query = query
                        .bind(&row.id)
                        .bind(&row.title)
                        .bind(&row.description)
                        .bind(&row.date_published)
                        .bind(&row.date_updated);
                }
                query
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                Ok(())
            }
        })
        .await?;

        Ok(chunk.len())
    }

    /// Count how many of `ids` are present.
    async fn verify_ids(&self, ids: &[&str]) -> Result<usize, StorageError> {
        let mut total_found = 0usize;

        for chunk in ids.chunks(CHUNK_SIZE) {
            let placeholders: Vec<&str> = (0..chunk.len()).map(|_| "?").collect();
            let sql = format!(
                "SELECT COUNT(*) AS cnt FROM cve_records WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }

            let result = query
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let count: i64 = result
                .try_get("cnt")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            total_found += count as usize;
        }

        Ok(total_found)
    }
}

/// Owned bind values so the retry closure can rebuild the query.
#[derive(Clone)]
struct BoundRow {
    id: String,
    title: String,
    description: String,
    date_published: String,
    date_updated: String,
}

impl From<&NormalizedRecord> for BoundRow {
    fn from(record: &NormalizedRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            date_published: format_timestamp(&record.date_published),
            date_updated: format_timestamp(&record.date_updated),
        }
    }
}

/// Read a TEXT column as String (SQLite) or bytes (MySQL via Any).
fn text_column(row: &AnyRow, column: &str) -> Result<String, StorageError> {
    row.try_get::<String, _>(column)
        .ok()
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .ok_or_else(|| StorageError::Backend(format!("Column '{}' is not readable as text", column)))
}

#[async_trait]
impl RecordStore for SqlRecordStore {
    async fn insert(&self, record: &NormalizedRecord) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO cve_records (id, title, description, date_published, date_updated) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT(id) DO NOTHING"
        } else {
            "INSERT IGNORE INTO cve_records (id, title, description, date_published, date_updated) \
             VALUES (?, ?, ?, ?, ?)"
        };
        let row = BoundRow::from(record);

        let affected = retry("sql_insert", &RetryConfig::query(), || async {
            sqlx::query(sql)
                .bind(&row.id)
                .bind(&row.title)
                .bind(&row.description)
                .bind(&row.date_published)
                .bind(&row.date_updated)
                .execute(&self.pool)
                .await
                .map(|r| r.rows_affected())
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        if affected == 0 {
            return Err(StorageError::DuplicateKey(record.id.clone()));
        }
        Ok(())
    }

    async fn update_by_id(&self, id: &str, record: &NormalizedRecord) -> Result<(), StorageError> {
        let row = BoundRow::from(record);

        let affected = retry("sql_update", &RetryConfig::query(), || async {
            sqlx::query(
                "UPDATE cve_records SET title = ?, description = ?, date_published = ?, date_updated = ? WHERE id = ?",
            )
            .bind(&row.title)
            .bind(&row.description)
            .bind(&row.date_published)
            .bind(&row.date_updated)
            .bind(id)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        // MySQL reports changed rows, not matched rows, so an identical
        // rewrite also returns 0
        if affected == 0 && !self.exists(id).await? {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<NormalizedRecord>, StorageError> {
        let row = retry("sql_get", &RetryConfig::query(), || async {
            sqlx::query(
                "SELECT title, description, date_published, date_updated FROM cve_records WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        row.map(|row| Self::row_to_record(id, &row)).transpose()
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("SELECT COUNT(*) AS cnt FROM cve_records")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let count: i64 = result
            .try_get("cnt")
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(count as u64)
    }

    async fn upsert_batch(&self, records: &[NormalizedRecord]) -> Result<BatchWriteResult, StorageError> {
        if records.is_empty() {
            return Ok(BatchWriteResult {
                written: 0,
                verified: true,
            });
        }

        // A multi-row upsert rejects repeated keys on some engines; last one wins
        let mut positions: HashMap<&str, usize> = HashMap::with_capacity(records.len());
        let mut deduped: Vec<&NormalizedRecord> = Vec::with_capacity(records.len());
        for record in records {
            match positions.get(record.id.as_str()) {
                Some(&i) => deduped[i] = record,
                None => {
                    positions.insert(record.id.as_str(), deduped.len());
                    deduped.push(record);
                }
            }
        }
        let deduped: Vec<NormalizedRecord> = deduped.into_iter().cloned().collect();

        let mut written = 0usize;
        for chunk in deduped.chunks(CHUNK_SIZE) {
            written += self.upsert_chunk(chunk).await?;
        }

        let ids: Vec<&str> = deduped.iter().map(|r| r.id.as_str()).collect();
        let found = self.verify_ids(&ids).await?;
        let verified = found == deduped.len();
        if verified {
            debug!(written, "Batch upsert verified");
        } else {
            warn!(expected = deduped.len(), actual = found, "Batch verification mismatch");
        }

        Ok(BatchWriteResult { written, verified })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    async fn open(dir: &Path) -> SqlRecordStore {
        let url = format!("sqlite://{}?mode=rwc", dir.join("catalog.db").display());
        SqlRecordStore::new(&url).await.unwrap()
    }

    fn record(id: &str, title: &str, updated: &str) -> NormalizedRecord {
        NormalizedRecord {
            id: id.to_string(),
            title: title.to_string(),
            description: format!("{} description", id),
            date_published: parse_timestamp("2024-01-01T00:00:00Z").unwrap(),
            date_updated: parse_timestamp(updated).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_then_get_round_trips_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;

        let rec = record("CVE-2024-0001", "t", "2024-03-01T12:00:00.123+02:00");
        store.insert(&rec).await.unwrap();

        let got = store.get("CVE-2024-0001").await.unwrap().unwrap();
        assert_eq!(got, rec);
        assert_eq!(got.date_updated.offset().local_minus_utc(), 2 * 3600);
        store.close().await;
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;
        assert!(store.get("CVE-2024-0001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_leaves_row_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;

        store.insert(&record("CVE-2024-0001", "first", "2024-01-02T00:00:00Z")).await.unwrap();
        let err = store
            .insert(&record("CVE-2024-0001", "second", "2024-01-03T00:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::DuplicateKey(_)));
        assert_eq!(store.get("CVE-2024-0001").await.unwrap().unwrap().title, "first");
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;

        store.insert(&record("CVE-2024-0001", "old", "2024-01-02T00:00:00Z")).await.unwrap();
        let newer = record("CVE-2024-0001", "new", "2024-02-02T00:00:00Z");
        store.update_by_id("CVE-2024-0001", &newer).await.unwrap();

        assert_eq!(store.get("CVE-2024-0001").await.unwrap().unwrap(), newer);
    }

    #[tokio::test]
    async fn test_identical_update_is_not_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;

        let rec = record("CVE-2024-0001", "same", "2024-01-02T00:00:00Z");
        store.insert(&rec).await.unwrap();
        store.update_by_id("CVE-2024-0001", &rec).await.unwrap();
        store.update_by_id("CVE-2024-0001", &rec).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;

        let err = store
            .update_by_id("CVE-2024-0009", &record("CVE-2024-0009", "x", "2024-01-02T00:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(ref id) if id == "CVE-2024-0009"));
        assert_eq!(store.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_batch_inserts_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;

        store.insert(&record("CVE-2024-0001", "old", "2024-01-02T00:00:00Z")).await.unwrap();

        let mut batch: Vec<_> = (2..=450)
            .map(|i| record(&format!("CVE-2024-{:04}", i), "bulk", "2024-01-02T00:00:00Z"))
            .collect();
        batch.push(record("CVE-2024-0001", "replaced", "2024-05-05T00:00:00Z"));

        let result = store.upsert_batch(&batch).await.unwrap();
        assert_eq!(result.written, 450);
        assert!(result.verified);
        assert_eq!(store.count_all().await.unwrap(), 450);
        assert_eq!(store.get("CVE-2024-0001").await.unwrap().unwrap().title, "replaced");
    }

    #[tokio::test]
    async fn test_upsert_batch_repeated_id_last_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;

        let batch = vec![
            record("CVE-2024-0001", "a", "2024-01-02T00:00:00Z"),
            record("CVE-2024-0001", "b", "2024-01-03T00:00:00Z"),
        ];
        let result = store.upsert_batch(&batch).await.unwrap();
        assert_eq!(result.written, 1);
        assert_eq!(store.get("CVE-2024-0001").await.unwrap().unwrap().title, "b");
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path()).await;
        let result = store.upsert_batch(&[]).await.unwrap();
        assert_eq!(result, BatchWriteResult { written: 0, verified: true });
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(dir.path()).await;
            store.insert(&record("CVE-2024-0001", "t", "2024-01-02T00:00:00Z")).await.unwrap();
            store.close().await;
        }
        let store = open(dir.path()).await;
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bad_url_fails_after_startup_retries() {
        let err = SqlRecordStore::new("sqlite:///nonexistent-dir/a/b/c.db").await;
        assert!(matches!(err, Err(StorageError::Backend(_))));
    }
}
