use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use strum_macros::{Display, EnumString};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum SubjectType {
    User,
    Role,
}

/// CRUD permission bits for a subject on a resource. A `resource_id` of `None`
/// covers every resource of `resource_type`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Grant {
    pub id: i64,
    pub resource_type: String,
    pub resource_id: Option<i64>,
    pub subject_type: String,
    pub subject_id: i64,
    pub can_create: bool,
    pub can_read: bool,
    pub can_update: bool,
    pub can_delete: bool,
    pub deny_wins: bool,
    pub granted_by: Option<i64>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGrant {
    pub resource_type: String,
    pub resource_id: Option<i64>,
    pub subject_type: SubjectType,
    pub subject_id: i64,
    #[serde(default)]
    pub can_create: bool,
    #[serde(default)]
    pub can_read: bool,
    #[serde(default)]
    pub can_update: bool,
    #[serde(default)]
    pub can_delete: bool,
    #[serde(default = "default_deny_wins")]
    pub deny_wins: bool,
    pub granted_by: Option<i64>,
}

fn default_deny_wins() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("grant not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl Grant {
    pub async fn create<'e, E>(executor: E, data: &CreateGrant) -> Result<Self, GrantError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let grant = sqlx::query_as::<_, Grant>(
            r#"INSERT INTO grants (
                   resource_type, resource_id, subject_type, subject_id,
                   can_create, can_read, can_update, can_delete, deny_wins, granted_by,
                   created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
               RETURNING *"#,
        )
        .bind(&data.resource_type)
        .bind(data.resource_id)
        .bind(data.subject_type.to_string())
        .bind(data.subject_id)
        .bind(data.can_create)
        .bind(data.can_read)
        .bind(data.can_update)
        .bind(data.can_delete)
        .bind(data.deny_wins)
        .bind(data.granted_by)
        .bind(Utc::now())
        .fetch_one(executor)
        .await?;
        Ok(grant)
    }

    /// Grants that apply to one subject on one resource: the exact resource
    /// plus the type-wide rows.
    pub async fn find_for_subject(
        pool: &SqlitePool,
        subject_type: SubjectType,
        subject_id: i64,
        resource_type: &str,
        resource_id: Option<i64>,
    ) -> Result<Vec<Self>, GrantError> {
        let grants = sqlx::query_as::<_, Grant>(
            r#"SELECT * FROM grants
               WHERE subject_type = $1
                 AND subject_id = $2
                 AND resource_type = $3
                 AND (resource_id IS NULL OR resource_id = $4)
               ORDER BY id ASC"#,
        )
        .bind(subject_type.to_string())
        .bind(subject_id)
        .bind(resource_type)
        .bind(resource_id)
        .fetch_all(pool)
        .await?;
        Ok(grants)
    }

    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<u64, GrantError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM grants WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
