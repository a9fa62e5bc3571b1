use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

use super::is_foreign_key_violation;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, Display, EnumString, Default,
)]
#[repr(i32)]
pub enum FileStatus {
    #[default]
    UploadPending = 0,
    Scanning = 1,
    Available = 2,
    Rejected = 3,
    Quarantined = 4,
    Archived = 5,
}

/// Metadata for a stored upload. The bytes live at `storage_path`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub storage_path: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    /// Hex SHA-256 of the content
    pub checksum: String,
    pub status: FileStatus,
    pub profile_json: Option<String>,
    pub created_by_user_id: i64,
    pub correlation_id: Option<Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateFileRecord {
    pub storage_path: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub checksum: String,
    #[serde(default)]
    pub status: FileStatus,
    pub profile_json: Option<String>,
    pub created_by_user_id: i64,
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Error)]
pub enum FileRecordError {
    #[error("file record not found")]
    NotFound,
    #[error("file record conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl fmt::Display for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FileRecord:{}:F:{}:C:{}:S:{}:v{}",
            self.id, self.filename, self.content_type, self.status, self.version
        )
    }
}

impl FileRecord {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, FileRecordError> {
        let record = sqlx::query_as::<_, FileRecord>("SELECT * FROM file_records WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(record)
    }

    pub async fn find_by_checksum(
        pool: &SqlitePool,
        checksum: &str,
    ) -> Result<Vec<Self>, FileRecordError> {
        let records = sqlx::query_as::<_, FileRecord>(
            "SELECT * FROM file_records WHERE checksum = $1 ORDER BY id ASC",
        )
        .bind(checksum)
        .fetch_all(pool)
        .await?;
        Ok(records)
    }

    pub async fn create<'e, E>(executor: E, data: &CreateFileRecord) -> Result<Self, FileRecordError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, FileRecord>(
            r#"INSERT INTO file_records (
                   storage_path, filename, content_type, size_bytes, checksum, status,
                   profile_json, created_by_user_id, correlation_id, created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
               RETURNING *"#,
        )
        .bind(&data.storage_path)
        .bind(&data.filename)
        .bind(&data.content_type)
        .bind(data.size_bytes)
        .bind(&data.checksum)
        .bind(data.status)
        .bind(&data.profile_json)
        .bind(data.created_by_user_id)
        .bind(data.correlation_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                return FileRecordError::Conflict("Uploader does not exist".to_string());
            }
            FileRecordError::from(e)
        })
    }

    pub async fn set_status<'e, E>(
        executor: E,
        id: i64,
        status: FileStatus,
    ) -> Result<Self, FileRecordError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, FileRecord>(
            r#"UPDATE file_records
               SET status = $2, version = version + 1, updated_at = $3
               WHERE id = $1
               RETURNING *"#,
        )
        .bind(id)
        .bind(status)
        .bind(Utc::now())
        .fetch_optional(executor)
        .await?
        .ok_or(FileRecordError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_pool, seed_user};

    #[tokio::test]
    async fn status_transitions_bump_version() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "uploader").await;
        let correlation_id = Uuid::new_v4();

        let record = FileRecord::create(
            &pool,
            &CreateFileRecord {
                storage_path: "uploads/a.png".to_string(),
                filename: "a.png".to_string(),
                content_type: "image/png".to_string(),
                size_bytes: 42,
                checksum: "deadbeef".to_string(),
                created_by_user_id: owner.id,
                correlation_id: Some(correlation_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(record.status, FileStatus::UploadPending);
        assert_eq!(record.correlation_id, Some(correlation_id));

        let available = FileRecord::set_status(&pool, record.id, FileStatus::Available)
            .await
            .unwrap();
        assert_eq!(available.version, 2);
        assert_eq!(
            available.to_string(),
            format!("FileRecord:{}:F:a.png:C:image/png:S:Available:v2", record.id)
        );

        let missing = FileRecord::set_status(&pool, 9_999, FileStatus::Archived)
            .await
            .unwrap_err();
        assert!(matches!(missing, FileRecordError::NotFound));

        let same = FileRecord::find_by_checksum(&pool, "deadbeef").await.unwrap();
        assert_eq!(same.len(), 1);
    }
}
