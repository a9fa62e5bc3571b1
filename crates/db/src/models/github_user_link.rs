use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool};
use thiserror::Error;

use super::{is_unique_violation, row_exists};

/// Cached GitHub identity, optionally bound to a local user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GitHubUserLink {
    pub id: i64,
    pub local_user_id: Option<i64>,
    pub github_user_id: i64,
    pub login: String,
    pub avatar_url: Option<String>,
    /// ETag of the last profile fetch, for conditional refreshes
    pub etag: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub profile_json: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateGitHubUserLink {
    pub local_user_id: Option<i64>,
    pub github_user_id: i64,
    pub login: String,
    pub avatar_url: Option<String>,
    pub etag: Option<String>,
    pub profile_json: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateGitHubUserLink {
    pub local_user_id: Option<i64>,
    pub login: Option<String>,
    pub avatar_url: Option<String>,
    pub etag: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub profile_json: Option<String>,
    pub version: Option<i64>,
}

#[derive(Debug, Error)]
pub enum GitHubUserLinkError {
    #[error("github user link not found")]
    NotFound,
    #[error("github user link conflict: {0}")]
    Conflict(String),
    #[error("version mismatch")]
    VersionMismatch,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl fmt::Display for GitHubUserLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GitHubUserLink:{}:G:{}:L:{}:v{}",
            self.id, self.github_user_id, self.login, self.version
        )
    }
}

impl GitHubUserLink {
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: i64,
    ) -> Result<Option<Self>, GitHubUserLinkError> {
        let link = sqlx::query_as::<_, GitHubUserLink>("SELECT * FROM github_user_links WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(link)
    }

    pub async fn find_by_github_user_id(
        pool: &SqlitePool,
        github_user_id: i64,
    ) -> Result<Option<Self>, GitHubUserLinkError> {
        let link = sqlx::query_as::<_, GitHubUserLink>(
            "SELECT * FROM github_user_links WHERE github_user_id = $1",
        )
        .bind(github_user_id)
        .fetch_optional(pool)
        .await?;
        Ok(link)
    }

    pub async fn find_by_local_user_id(
        pool: &SqlitePool,
        local_user_id: i64,
    ) -> Result<Option<Self>, GitHubUserLinkError> {
        let link = sqlx::query_as::<_, GitHubUserLink>(
            "SELECT * FROM github_user_links WHERE local_user_id = $1",
        )
        .bind(local_user_id)
        .fetch_optional(pool)
        .await?;
        Ok(link)
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateGitHubUserLink,
    ) -> Result<Self, GitHubUserLinkError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, GitHubUserLink>(
            r#"INSERT INTO github_user_links (
                   local_user_id, github_user_id, login, avatar_url, etag, profile_json,
                   created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
               RETURNING *"#,
        )
        .bind(data.local_user_id)
        .bind(data.github_user_id)
        .bind(&data.login)
        .bind(&data.avatar_url)
        .bind(&data.etag)
        .bind(&data.profile_json)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return GitHubUserLinkError::Conflict(format!(
                    "GitHub user {} is already linked",
                    data.github_user_id
                ));
            }
            GitHubUserLinkError::from(e)
        })
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        data: &UpdateGitHubUserLink,
    ) -> Result<Self, GitHubUserLinkError> {
        let updated = sqlx::query_as::<_, GitHubUserLink>(
            r#"UPDATE github_user_links
               SET local_user_id  = COALESCE($2, local_user_id),
                   login          = COALESCE($3, login),
                   avatar_url     = COALESCE($4, avatar_url),
                   etag           = COALESCE($5, etag),
                   last_synced_at = COALESCE($6, last_synced_at),
                   profile_json   = COALESCE($7, profile_json),
                   version        = version + 1,
                   updated_at     = $8
               WHERE id = $1
                 AND version = COALESCE($9, version)
               RETURNING *"#,
        )
        .bind(id)
        .bind(data.local_user_id)
        .bind(&data.login)
        .bind(&data.avatar_url)
        .bind(&data.etag)
        .bind(data.last_synced_at)
        .bind(&data.profile_json)
        .bind(Utc::now())
        .bind(data.version)
        .fetch_optional(&mut *conn)
        .await?;

        match updated {
            Some(link) => Ok(link),
            None if row_exists(&mut *conn, "github_user_links", id).await? => {
                Err(GitHubUserLinkError::VersionMismatch)
            }
            None => Err(GitHubUserLinkError::NotFound),
        }
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<u64, GitHubUserLinkError> {
        let result = sqlx::query("DELETE FROM github_user_links WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
