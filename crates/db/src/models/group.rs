use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool};
use thiserror::Error;

use super::{is_foreign_key_violation, is_unique_violation, row_exists};

/// Named set of users inside a workspace
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateGroup {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateGroup {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub version: Option<i64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GroupMember {
    pub id: i64,
    pub group_id: i64,
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

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group not found")]
    NotFound,
    #[error("group member not found")]
    MemberNotFound,
    #[error("group conflict: {0}")]
    Conflict(String),
    #[error("version mismatch")]
    VersionMismatch,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Group:{}:W:{}:S:{}:v{}",
            self.id, self.workspace_id, self.slug, self.version
        )
    }
}

impl fmt::Display for GroupMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GroupMember:{}:G:{}:U:{}:R:{}:v{}",
            self.id, self.group_id, self.user_id, self.role, self.version
        )
    }
}

impl Group {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, GroupError> {
        let group = sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(group)
    }

    pub async fn find_by_workspace_and_slug(
        pool: &SqlitePool,
        workspace_id: i64,
        slug: &str,
    ) -> Result<Option<Self>, GroupError> {
        let group = sqlx::query_as::<_, Group>(
            "SELECT * FROM groups WHERE workspace_id = $1 AND slug = $2",
        )
        .bind(workspace_id)
        .bind(slug)
        .fetch_optional(pool)
        .await?;
        Ok(group)
    }

    pub async fn list_by_workspace(
        pool: &SqlitePool,
        workspace_id: i64,
    ) -> Result<Vec<Self>, GroupError> {
        let groups = sqlx::query_as::<_, Group>(
            "SELECT * FROM groups WHERE workspace_id = $1 ORDER BY name ASC",
        )
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
        Ok(groups)
    }

    pub async fn create<'e, E>(
        executor: E,
        workspace_id: i64,
        data: &CreateGroup,
    ) -> Result<Self, GroupError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Group>(
            r#"INSERT INTO groups (workspace_id, name, slug, description, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $5)
               RETURNING *"#,
        )
        .bind(workspace_id)
        .bind(&data.name)
        .bind(&data.slug)
        .bind(&data.description)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return GroupError::Conflict(format!(
                    "Group slug '{}' is already used in this workspace",
                    data.slug
                ));
            }
            if is_foreign_key_violation(&e) {
                return GroupError::Conflict("Workspace does not exist".to_string());
            }
            GroupError::from(e)
        })
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        data: &UpdateGroup,
    ) -> Result<Self, GroupError> {
        let updated = sqlx::query_as::<_, Group>(
            r#"UPDATE groups
               SET name        = COALESCE($2, name),
                   slug        = COALESCE($3, slug),
                   description = COALESCE($4, description),
                   version     = version + 1,
                   updated_at  = $5
               WHERE id = $1
                 AND version = COALESCE($6, version)
               RETURNING *"#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.slug)
        .bind(&data.description)
        .bind(Utc::now())
        .bind(data.version)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return GroupError::Conflict("Group slug is already used in this workspace".into());
            }
            GroupError::from(e)
        })?;

        match updated {
            Some(group) => Ok(group),
            None if row_exists(&mut *conn, "groups", id).await? => Err(GroupError::VersionMismatch),
            None => Err(GroupError::NotFound),
        }
    }

    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<u64, GroupError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

impl GroupMember {
    pub async fn list_by_group(pool: &SqlitePool, group_id: i64) -> Result<Vec<Self>, GroupError> {
        let members = sqlx::query_as::<_, GroupMember>(
            r#"SELECT * FROM group_members
               WHERE group_id = $1 AND removed_at IS NULL
               ORDER BY id ASC"#,
        )
        .bind(group_id)
        .fetch_all(pool)
        .await?;
        Ok(members)
    }

    pub async fn add<'e, E>(
        executor: E,
        group_id: i64,
        user_id: i64,
        role: i64,
    ) -> Result<Self, GroupError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, GroupMember>(
            r#"INSERT INTO group_members (group_id, user_id, role, joined_at, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $4, $4)
               RETURNING *"#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(role)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return GroupError::Conflict(format!(
                    "User {} is already in group {}",
                    user_id, group_id
                ));
            }
            GroupError::from(e)
        })
    }

    pub async fn soft_remove<'e, E>(executor: E, id: i64) -> Result<Self, GroupError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, GroupMember>(
            r#"UPDATE group_members
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
        .ok_or(GroupError::MemberNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_pool, seed_user, seed_workspace};

    #[tokio::test]
    async fn slug_is_unique_per_workspace() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "owner").await;
        let first = seed_workspace(&pool, owner.id, "first").await;
        let second = seed_workspace(&pool, owner.id, "second").await;

        let data = CreateGroup {
            name: "Reviewers".to_string(),
            slug: "reviewers".to_string(),
            description: None,
        };
        let group = Group::create(&pool, first.id, &data).await.unwrap();
        assert_eq!(
            group.to_string(),
            format!("Group:{}:W:{}:S:reviewers:v1", group.id, first.id)
        );

        let dup = Group::create(&pool, first.id, &data).await.unwrap_err();
        assert!(matches!(dup, GroupError::Conflict(_)));

        // Same slug is fine in another workspace
        Group::create(&pool, second.id, &data).await.unwrap();
    }

    #[tokio::test]
    async fn members_are_listed_until_removed() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "owner").await;
        let workspace = seed_workspace(&pool, owner.id, "acme").await;
        let group = Group::create(
            &pool,
            workspace.id,
            &CreateGroup {
                name: "Ops".to_string(),
                slug: "ops".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();

        let member = GroupMember::add(&pool, group.id, owner.id, 1).await.unwrap();
        assert_eq!(GroupMember::list_by_group(&pool, group.id).await.unwrap().len(), 1);

        GroupMember::soft_remove(&pool, member.id).await.unwrap();
        assert!(GroupMember::list_by_group(&pool, group.id).await.unwrap().is_empty());
    }
}
