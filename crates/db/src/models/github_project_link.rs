use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use thiserror::Error;

use super::is_foreign_key_violation;

/// Remote repository a project is connected to. No calls are made to GitHub;
/// this is the locally stored link only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GitHubProjectLink {
    pub id: i64,
    pub owner_user_id: i64,
    pub remote_url: String,
    pub external_id: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGitHubProjectLink {
    pub owner_user_id: i64,
    pub remote_url: String,
    pub external_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum GitHubProjectLinkError {
    #[error("github project link not found")]
    NotFound,
    #[error("github project link conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl fmt::Display for GitHubProjectLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GitHubProjectLink:{}:U:{}:R:{}:v{}",
            self.id, self.owner_user_id, self.remote_url, self.version
        )
    }
}

impl GitHubProjectLink {
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: i64,
    ) -> Result<Option<Self>, GitHubProjectLinkError> {
        let link = sqlx::query_as::<_, GitHubProjectLink>(
            "SELECT * FROM github_project_links WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(link)
    }

    pub async fn list_by_owner(
        pool: &SqlitePool,
        owner_user_id: i64,
    ) -> Result<Vec<Self>, GitHubProjectLinkError> {
        let links = sqlx::query_as::<_, GitHubProjectLink>(
            "SELECT * FROM github_project_links WHERE owner_user_id = $1 ORDER BY id ASC",
        )
        .bind(owner_user_id)
        .fetch_all(pool)
        .await?;
        Ok(links)
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateGitHubProjectLink,
    ) -> Result<Self, GitHubProjectLinkError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, GitHubProjectLink>(
            r#"INSERT INTO github_project_links (owner_user_id, remote_url, external_id, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $4)
               RETURNING *"#,
        )
        .bind(data.owner_user_id)
        .bind(&data.remote_url)
        .bind(&data.external_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                return GitHubProjectLinkError::Conflict("Owner does not exist".to_string());
            }
            GitHubProjectLinkError::from(e)
        })
    }

    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<u64, GitHubProjectLinkError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM github_project_links WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
