//! SQLite-backed state store
//!
//! Each compare-and-set is a single conditional statement, so SQLite's own
//! write serialization provides the per-key atomicity.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::error::StoreError;
use super::store::{StateStore, StoreResult};
use super::types::{RecordStamp, ResourceKey, ResourceRecord, ResourceType, Timestamp};

/// State store persisted in the `resource_records` table
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the records table
    pub async fn init(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resource_records (
                resource_type TEXT NOT NULL,
                id TEXT NOT NULL,
                payload TEXT NOT NULL,
                last_timestamp INTEGER NOT NULL,
                last_modified_by TEXT NOT NULL,
                last_device_id TEXT NOT NULL,
                is_public INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL,
                PRIMARY KEY (resource_type, id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_timestamp ON resource_records(last_timestamp);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_if_absent(&self, record: &ResourceRecord) -> StoreResult<bool> {
        let payload = serde_json::to_string(&record.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO resource_records (
                resource_type, id, payload, last_timestamp,
                last_modified_by, last_device_id, is_public, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_type, id) DO NOTHING
            "#,
        )
        .bind(record.resource_type.as_str())
        .bind(&record.id)
        .bind(&payload)
        .bind(record.last_timestamp)
        .bind(&record.last_modified_by)
        .bind(&record.last_device_id)
        .bind(record.is_public)
        .bind(record.version as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn replace_if_matches(
        &self,
        key: &ResourceKey,
        expected: RecordStamp,
        record: &ResourceRecord,
    ) -> StoreResult<bool> {
        let payload = serde_json::to_string(&record.payload)?;

        let result = sqlx::query(
            r#"
            UPDATE resource_records SET
                payload = ?,
                last_timestamp = ?,
                last_modified_by = ?,
                last_device_id = ?,
                is_public = ?,
                version = ?
            WHERE resource_type = ? AND id = ? AND last_timestamp = ? AND version = ?
            "#,
        )
        .bind(&payload)
        .bind(record.last_timestamp)
        .bind(&record.last_modified_by)
        .bind(&record.last_device_id)
        .bind(record.is_public)
        .bind(record.version as i64)
        .bind(key.resource_type.as_str())
        .bind(&key.id)
        .bind(expected.last_timestamp)
        .bind(expected.version as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_if_matches(&self, key: &ResourceKey, expected: RecordStamp) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM resource_records
            WHERE resource_type = ? AND id = ? AND last_timestamp = ? AND version = ?
            "#,
        )
        .bind(key.resource_type.as_str())
        .bind(&key.id)
        .bind(expected.last_timestamp)
        .bind(expected.version as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &ResourceKey) -> StoreResult<Option<ResourceRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT resource_type, id, payload, last_timestamp,
                   last_modified_by, last_device_id, is_public, version
            FROM resource_records
            WHERE resource_type = ? AND id = ?
            "#,
        )
        .bind(key.resource_type.as_str())
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_record()).transpose()
    }

    async fn compare_and_set(
        &self,
        key: &ResourceKey,
        expected: Option<RecordStamp>,
        new: Option<ResourceRecord>,
    ) -> StoreResult<bool> {
        match (expected, new) {
            (None, Some(record)) => self.insert_if_absent(&record).await,
            (Some(stamp), Some(record)) => self.replace_if_matches(key, stamp, &record).await,
            (Some(stamp), None) => self.delete_if_matches(key, stamp).await,
            (None, None) => Ok(self.get(key).await?.is_none()),
        }
    }

    async fn scan_since(&self, cursor: Option<Timestamp>) -> StoreResult<Vec<ResourceRecord>> {
        let rows = match cursor {
            Some(cursor) => {
                sqlx::query_as::<_, RecordRow>(
                    r#"
                    SELECT resource_type, id, payload, last_timestamp,
                           last_modified_by, last_device_id, is_public, version
                    FROM resource_records
                    WHERE last_timestamp > ?
                    ORDER BY last_timestamp ASC, id ASC
                    "#,
                )
                .bind(cursor)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RecordRow>(
                    r#"
                    SELECT resource_type, id, payload, last_timestamp,
                           last_modified_by, last_device_id, is_public, version
                    FROM resource_records
                    ORDER BY last_timestamp ASC, id ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(|r| r.into_record()).collect()
    }

    async fn len(&self) -> StoreResult<usize> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM resource_records")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0 as usize)
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    resource_type: String,
    id: String,
    payload: String,
    last_timestamp: i64,
    last_modified_by: String,
    last_device_id: String,
    is_public: bool,
    version: i64,
}

impl RecordRow {
    fn into_record(self) -> StoreResult<ResourceRecord> {
        let resource_type = ResourceType::parse(&self.resource_type);
        if resource_type == ResourceType::Unknown {
            return Err(StoreError::Corrupt {
                key: format!("{}_{}", self.resource_type, self.id),
                reason: "unknown resource type".to_string(),
            });
        }

        let payload = serde_json::from_str(&self.payload)?;

        Ok(ResourceRecord {
            id: self.id,
            resource_type,
            payload,
            last_timestamp: self.last_timestamp,
            last_modified_by: self.last_modified_by,
            last_device_id: self.last_device_id,
            is_public: self.is_public,
            version: self.version as u64,
        })
    }
}
