use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use thiserror::Error;

use super::is_unique_violation;

/// Lookup row classifying users, workspaces and audit events.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SystemType {
    pub id: i64,
    pub code: String,
    pub display_name: String,
    pub metadata_json: Option<String>,
    pub is_active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSystemType {
    pub code: String,
    pub display_name: String,
    pub metadata_json: Option<String>,
}

#[derive(Debug, Error)]
pub enum SystemTypeError {
    #[error("system type not found")]
    NotFound,
    #[error("system type conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SystemType:{}:Code:{}:v{}",
            self.id, self.code, self.version
        )
    }
}

impl SystemType {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, SystemTypeError> {
        let row = sqlx::query_as::<_, SystemType>("SELECT * FROM system_types WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn find_by_code(
        pool: &SqlitePool,
        code: &str,
    ) -> Result<Option<Self>, SystemTypeError> {
        let row = sqlx::query_as::<_, SystemType>("SELECT * FROM system_types WHERE code = $1")
            .bind(code)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn list_active(pool: &SqlitePool) -> Result<Vec<Self>, SystemTypeError> {
        let rows = sqlx::query_as::<_, SystemType>(
            "SELECT * FROM system_types WHERE is_active = 1 ORDER BY code ASC",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn create<'e, E>(executor: E, data: &CreateSystemType) -> Result<Self, SystemTypeError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, SystemType>(
            r#"INSERT INTO system_types (code, display_name, metadata_json, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $4)
               RETURNING *"#,
        )
        .bind(&data.code)
        .bind(&data.display_name)
        .bind(&data.metadata_json)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return SystemTypeError::Conflict(format!(
                    "System type '{}' already exists",
                    data.code
                ));
            }
            SystemTypeError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_pool;

    fn billing() -> CreateSystemType {
        CreateSystemType {
            code: "BILLING".to_string(),
            display_name: "Billing".to_string(),
            metadata_json: None,
        }
    }

    #[tokio::test]
    async fn create_applies_defaults_and_code_is_unique() {
        let (pool, _temp_dir) = create_test_pool().await;

        let created = SystemType::create(&pool, &billing()).await.unwrap();
        assert!(created.is_active);
        assert_eq!(created.version, 1);
        assert_eq!(
            created.to_string(),
            format!("SystemType:{}:Code:BILLING:v1", created.id)
        );

        let err = SystemType::create(&pool, &billing()).await.unwrap_err();
        assert!(matches!(err, SystemTypeError::Conflict(_)));

        let by_code = SystemType::find_by_code(&pool, "BILLING").await.unwrap().unwrap();
        assert_eq!(by_code.id, created.id);
        let by_id = SystemType::find_by_id(&pool, created.id).await.unwrap().unwrap();
        assert_eq!(by_id.display_name, "Billing");
        assert!(SystemType::find_by_code(&pool, "billing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_active_skips_inactive_rows() {
        let (pool, _temp_dir) = create_test_pool().await;

        let billing = SystemType::create(&pool, &billing()).await.unwrap();
        let legacy = SystemType::create(
            &pool,
            &CreateSystemType {
                code: "LEGACY".to_string(),
                display_name: "Legacy".to_string(),
                metadata_json: Some("{\"retired\":true}".to_string()),
            },
        )
        .await
        .unwrap();
        sqlx::query("UPDATE system_types SET is_active = 0 WHERE id = $1")
            .bind(legacy.id)
            .execute(&pool)
            .await
            .unwrap();

        let codes: Vec<String> = SystemType::list_active(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.code)
            .collect();
        assert!(codes.contains(&billing.code));
        assert!(!codes.contains(&"LEGACY".to_string()));
    }
}
