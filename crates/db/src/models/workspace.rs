use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool};
use thiserror::Error;

use super::{Visibility, is_foreign_key_violation, is_unique_violation, row_exists};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub system_type_id: Option<i64>,
    pub name: String,
    /// Globally unique URL key
    pub slug: String,
    pub owner_user_id: i64,
    pub default_visibility: Visibility,
    pub description: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateWorkspace {
    pub system_type_id: Option<i64>,
    pub name: String,
    pub slug: String,
    pub owner_user_id: i64,
    #[serde(default)]
    pub default_visibility: Visibility,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateWorkspace {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub default_visibility: Option<Visibility>,
    pub description: Option<String>,
    pub version: Option<i64>,
}

/// Membership of a user in a workspace. Removal is soft: `removed_at` is set
/// and the row stays for history.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkspaceMember {
    pub id: i64,
    pub workspace_id: i64,
    pub user_id: i64,
    pub role: i64,
    pub joined_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing, default)]
    pub invite_token: Option<String>,
    pub invite_expires_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateWorkspaceMember {
    pub user_id: i64,
    #[serde(default)]
    pub role: i64,
    pub joined_at: Option<DateTime<Utc>>,
    pub invite_token: Option<String>,
    pub invite_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateWorkspaceMember {
    pub role: Option<i64>,
    pub joined_at: Option<DateTime<Utc>>,
    pub version: Option<i64>,
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace not found")]
    NotFound,
    #[error("workspace member not found")]
    MemberNotFound,
    #[error("workspace conflict: {0}")]
    Conflict(String),
    #[error("version mismatch")]
    VersionMismatch,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Workspace:{}:S:{}:Owner:{}:v{}",
            self.id, self.slug, self.owner_user_id, self.version
        )
    }
}

impl fmt::Display for WorkspaceMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WorkspaceMember:{}:W:{}:U:{}:R:{}:v{}",
            self.id, self.workspace_id, self.user_id, self.role, self.version
        )
    }
}

impl Workspace {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, WorkspaceError> {
        let workspace = sqlx::query_as::<_, Workspace>("SELECT * FROM workspaces WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(workspace)
    }

    pub async fn find_by_slug(
        pool: &SqlitePool,
        slug: &str,
    ) -> Result<Option<Self>, WorkspaceError> {
        let workspace = sqlx::query_as::<_, Workspace>("SELECT * FROM workspaces WHERE slug = $1")
            .bind(slug)
            .fetch_optional(pool)
            .await?;
        Ok(workspace)
    }

    pub async fn list_by_owner(
        pool: &SqlitePool,
        owner_user_id: i64,
    ) -> Result<Vec<Self>, WorkspaceError> {
        let workspaces = sqlx::query_as::<_, Workspace>(
            "SELECT * FROM workspaces WHERE owner_user_id = $1 ORDER BY name ASC",
        )
        .bind(owner_user_id)
        .fetch_all(pool)
        .await?;
        Ok(workspaces)
    }

    pub async fn list(pool: &SqlitePool) -> Result<Vec<Self>, WorkspaceError> {
        let workspaces =
            sqlx::query_as::<_, Workspace>("SELECT * FROM workspaces ORDER BY name ASC")
                .fetch_all(pool)
                .await?;
        Ok(workspaces)
    }

    pub async fn create<'e, E>(executor: E, data: &CreateWorkspace) -> Result<Self, WorkspaceError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Workspace>(
            r#"INSERT INTO workspaces (
                   system_type_id, name, slug, owner_user_id, default_visibility, description,
                   created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
               RETURNING *"#,
        )
        .bind(data.system_type_id)
        .bind(&data.name)
        .bind(&data.slug)
        .bind(data.owner_user_id)
        .bind(data.default_visibility)
        .bind(&data.description)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return WorkspaceError::Conflict(format!(
                    "Workspace slug '{}' is already taken",
                    data.slug
                ));
            }
            if is_foreign_key_violation(&e) {
                return WorkspaceError::Conflict("Owner does not exist".to_string());
            }
            WorkspaceError::from(e)
        })
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        data: &UpdateWorkspace,
    ) -> Result<Self, WorkspaceError> {
        let updated = sqlx::query_as::<_, Workspace>(
            r#"UPDATE workspaces
               SET name               = COALESCE($2, name),
                   slug               = COALESCE($3, slug),
                   default_visibility = COALESCE($4, default_visibility),
                   description        = COALESCE($5, description),
                   version            = version + 1,
                   updated_at         = $6
               WHERE id = $1
                 AND version = COALESCE($7, version)
               RETURNING *"#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.slug)
        .bind(data.default_visibility)
        .bind(&data.description)
        .bind(Utc::now())
        .bind(data.version)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return WorkspaceError::Conflict(format!(
                    "Workspace slug '{}' is already taken",
                    data.slug.as_deref().unwrap_or_default()
                ));
            }
            WorkspaceError::from(e)
        })?;

        match updated {
            Some(workspace) => Ok(workspace),
            None if row_exists(&mut *conn, "workspaces", id).await? => {
                Err(WorkspaceError::VersionMismatch)
            }
            None => Err(WorkspaceError::NotFound),
        }
    }

    /// Hard delete. Members, groups, projects and boards cascade.
    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<u64, WorkspaceError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

impl WorkspaceMember {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, WorkspaceError> {
        let member =
            sqlx::query_as::<_, WorkspaceMember>("SELECT * FROM workspace_members WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(member)
    }

    pub async fn find_by_workspace_and_user(
        pool: &SqlitePool,
        workspace_id: i64,
        user_id: i64,
    ) -> Result<Option<Self>, WorkspaceError> {
        let member = sqlx::query_as::<_, WorkspaceMember>(
            "SELECT * FROM workspace_members WHERE workspace_id = $1 AND user_id = $2",
        )
        .bind(workspace_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(member)
    }

    /// Active members only; soft-removed rows are skipped.
    pub async fn list_by_workspace(
        pool: &SqlitePool,
        workspace_id: i64,
    ) -> Result<Vec<Self>, WorkspaceError> {
        let members = sqlx::query_as::<_, WorkspaceMember>(
            r#"SELECT * FROM workspace_members
               WHERE workspace_id = $1 AND removed_at IS NULL
               ORDER BY id ASC"#,
        )
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
        Ok(members)
    }

    pub async fn create<'e, E>(
        executor: E,
        workspace_id: i64,
        data: &CreateWorkspaceMember,
    ) -> Result<Self, WorkspaceError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, WorkspaceMember>(
            r#"INSERT INTO workspace_members (
                   workspace_id, user_id, role, joined_at, invite_token, invite_expires_at,
                   created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
               RETURNING *"#,
        )
        .bind(workspace_id)
        .bind(data.user_id)
        .bind(data.role)
        .bind(data.joined_at)
        .bind(&data.invite_token)
        .bind(data.invite_expires_at)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return WorkspaceError::Conflict(format!(
                    "User {} is already a member of workspace {}",
                    data.user_id, workspace_id
                ));
            }
            if is_foreign_key_violation(&e) {
                return WorkspaceError::Conflict("Workspace or user does not exist".to_string());
            }
            WorkspaceError::from(e)
        })
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        data: &UpdateWorkspaceMember,
    ) -> Result<Self, WorkspaceError> {
        let updated = sqlx::query_as::<_, WorkspaceMember>(
            r#"UPDATE workspace_members
               SET role       = COALESCE($2, role),
                   joined_at  = COALESCE($3, joined_at),
                   version    = version + 1,
                   updated_at = $4
               WHERE id = $1
                 AND version = COALESCE($5, version)
               RETURNING *"#,
        )
        .bind(id)
        .bind(data.role)
        .bind(data.joined_at)
        .bind(Utc::now())
        .bind(data.version)
        .fetch_optional(&mut *conn)
        .await?;

        match updated {
            Some(member) => Ok(member),
            None if row_exists(&mut *conn, "workspace_members", id).await? => {
                Err(WorkspaceError::VersionMismatch)
            }
            None => Err(WorkspaceError::MemberNotFound),
        }
    }

    /// Mark the membership removed. Already-removed rows keep their original
    /// `removed_at`.
    pub async fn soft_remove<'e, E>(executor: E, id: i64) -> Result<Self, WorkspaceError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, WorkspaceMember>(
            r#"UPDATE workspace_members
               SET removed_at = COALESCE(removed_at, $2),
                   version    = version + 1,
                   updated_at = $2
               WHERE id = $1
               RETURNING *"#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(executor)
        .await?
        .ok_or(WorkspaceError::MemberNotFound)
    }

    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<u64, WorkspaceError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM workspace_members WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_pool, seed_user};

    #[tokio::test]
    async fn slug_is_unique() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "owner").await;
        let data = CreateWorkspace {
            name: "Acme".to_string(),
            slug: "acme".to_string(),
            owner_user_id: owner.id,
            ..Default::default()
        };

        let workspace = Workspace::create(&pool, &data).await.unwrap();
        assert_eq!(workspace.version, 1);
        assert_eq!(workspace.default_visibility, Visibility::Private);
        assert_eq!(
            workspace.to_string(),
            format!("Workspace:{}:S:acme:Owner:{}:v1", workspace.id, owner.id)
        );

        let err = Workspace::create(&pool, &data).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Conflict(_)));
    }

    #[tokio::test]
    async fn membership_is_unique_and_soft_removed() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "owner").await;
        let member_user = seed_user(&pool, "member").await;
        let workspace = Workspace::create(
            &pool,
            &CreateWorkspace {
                name: "Acme".to_string(),
                slug: "acme".to_string(),
                owner_user_id: owner.id,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let data = CreateWorkspaceMember {
            user_id: member_user.id,
            ..Default::default()
        };
        let member = WorkspaceMember::create(&pool, workspace.id, &data)
            .await
            .unwrap();
        let dup = WorkspaceMember::create(&pool, workspace.id, &data)
            .await
            .unwrap_err();
        assert!(matches!(dup, WorkspaceError::Conflict(_)));

        let removed = WorkspaceMember::soft_remove(&pool, member.id).await.unwrap();
        assert!(removed.removed_at.is_some());
        assert_eq!(removed.version, 2);

        let active = WorkspaceMember::list_by_workspace(&pool, workspace.id)
            .await
            .unwrap();
        assert!(active.is_empty());

        let still_there = WorkspaceMember::find_by_workspace_and_user(&pool, workspace.id, member_user.id)
            .await
            .unwrap();
        assert!(still_there.is_some());
    }

    #[tokio::test]
    async fn update_checks_version() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "owner").await;
        let workspace = Workspace::create(
            &pool,
            &CreateWorkspace {
                name: "Acme".to_string(),
                slug: "acme".to_string(),
                owner_user_id: owner.id,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let stale = UpdateWorkspace {
            name: Some("Renamed".to_string()),
            version: Some(7),
            ..Default::default()
        };
        let err = Workspace::update(&mut conn, workspace.id, &stale).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::VersionMismatch));

        let unchanged = Workspace::find_by_id(&pool, workspace.id).await.unwrap().unwrap();
        assert_eq!(unchanged.name, "Acme");
        assert_eq!(unchanged.version, 1);

        let fresh = UpdateWorkspace {
            version: Some(1),
            ..stale
        };
        let updated = Workspace::update(&mut conn, workspace.id, &fresh).await.unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.version, 2);
        assert!(updated.updated_at >= workspace.updated_at);
    }
}
