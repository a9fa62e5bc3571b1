//! Projects and the rows that hang off them: members and file attachments.
//!
//! Project slugs are unique within their workspace, not globally.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

use super::{Visibility, is_foreign_key_violation, is_unique_violation, row_exists};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, Display, EnumString, Default,
)]
#[repr(i32)]
pub enum ProjectStatus {
    #[default]
    Draft = 0,
    Launched = 1,
    Archived = 2,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub slug: String,
    pub owner_user_id: i64,
    pub status: ProjectStatus,
    pub visibility: Visibility,
    pub github_link_id: Option<i64>,
    pub description: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub slug: String,
    pub owner_user_id: i64,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub visibility: Visibility,
    pub github_link_id: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub status: Option<ProjectStatus>,
    pub visibility: Option<Visibility>,
    pub github_link_id: Option<i64>,
    pub description: Option<String>,
    pub version: Option<i64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProjectMember {
    pub id: i64,
    pub project_id: i64,
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
pub struct CreateProjectMember {
    pub user_id: i64,
    #[serde(default)]
    pub role: i64,
}

/// Link from a project to an uploaded file.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProjectAttachment {
    pub id: i64,
    pub project_id: i64,
    pub file_record_id: i64,
    pub role: String,
    pub uploaded_for_project_status: Option<ProjectStatus>,
    pub created_by_user_id: i64,
    pub correlation_id: Option<Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectAttachment {
    pub file_record_id: i64,
    #[serde(default = "default_attachment_role")]
    pub role: String,
    pub uploaded_for_project_status: Option<ProjectStatus>,
    pub created_by_user_id: i64,
    pub correlation_id: Option<Uuid>,
}

pub fn default_attachment_role() -> String {
    "supporting-doc".to_string()
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project not found")]
    NotFound,
    #[error("project member not found")]
    MemberNotFound,
    #[error("project conflict: {0}")]
    Conflict(String),
    #[error("version mismatch")]
    VersionMismatch,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Project:{}:W:{}:S:{}:v{}",
            self.id, self.workspace_id, self.slug, self.version
        )
    }
}

impl fmt::Display for ProjectMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProjectMember:{}:P:{}:U:{}:R:{}:v{}",
            self.id, self.project_id, self.user_id, self.role, self.version
        )
    }
}

impl fmt::Display for ProjectAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProjectAttachment:{}:P:{}:F:{}:R:{}:v{}",
            self.id, self.project_id, self.file_record_id, self.role, self.version
        )
    }
}

impl Project {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, ProjectError> {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(project)
    }

    pub async fn find_by_workspace_and_slug(
        pool: &SqlitePool,
        workspace_id: i64,
        slug: &str,
    ) -> Result<Option<Self>, ProjectError> {
        let project = sqlx::query_as::<_, Project>(
            "SELECT * FROM projects WHERE workspace_id = $1 AND slug = $2",
        )
        .bind(workspace_id)
        .bind(slug)
        .fetch_optional(pool)
        .await?;
        Ok(project)
    }

    pub async fn list_by_workspace(
        pool: &SqlitePool,
        workspace_id: i64,
    ) -> Result<Vec<Self>, ProjectError> {
        let projects = sqlx::query_as::<_, Project>(
            "SELECT * FROM projects WHERE workspace_id = $1 ORDER BY name ASC",
        )
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
        Ok(projects)
    }

    pub async fn create<'e, E>(
        executor: E,
        workspace_id: i64,
        data: &CreateProject,
    ) -> Result<Self, ProjectError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Project>(
            r#"INSERT INTO projects (
                   workspace_id, name, slug, owner_user_id, status, visibility,
                   github_link_id, description, created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
               RETURNING *"#,
        )
        .bind(workspace_id)
        .bind(&data.name)
        .bind(&data.slug)
        .bind(data.owner_user_id)
        .bind(data.status)
        .bind(data.visibility)
        .bind(data.github_link_id)
        .bind(&data.description)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return ProjectError::Conflict(format!(
                    "Project slug '{}' is already used in this workspace",
                    data.slug
                ));
            }
            if is_foreign_key_violation(&e) {
                return ProjectError::Conflict("Workspace or owner does not exist".to_string());
            }
            ProjectError::from(e)
        })
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        data: &UpdateProject,
    ) -> Result<Self, ProjectError> {
        let updated = sqlx::query_as::<_, Project>(
            r#"UPDATE projects
               SET name           = COALESCE($2, name),
                   slug           = COALESCE($3, slug),
                   status         = COALESCE($4, status),
                   visibility     = COALESCE($5, visibility),
                   github_link_id = COALESCE($6, github_link_id),
                   description    = COALESCE($7, description),
                   version        = version + 1,
                   updated_at     = $8
               WHERE id = $1
                 AND version = COALESCE($9, version)
               RETURNING *"#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.slug)
        .bind(data.status)
        .bind(data.visibility)
        .bind(data.github_link_id)
        .bind(&data.description)
        .bind(Utc::now())
        .bind(data.version)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return ProjectError::Conflict(
                    "Project slug is already used in this workspace".to_string(),
                );
            }
            ProjectError::from(e)
        })?;

        match updated {
            Some(project) => Ok(project),
            None if row_exists(&mut *conn, "projects", id).await? => {
                Err(ProjectError::VersionMismatch)
            }
            None => Err(ProjectError::NotFound),
        }
    }

    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<u64, ProjectError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

impl ProjectMember {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, ProjectError> {
        let member =
            sqlx::query_as::<_, ProjectMember>("SELECT * FROM project_members WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(member)
    }

    pub async fn find_by_project_and_user(
        pool: &SqlitePool,
        project_id: i64,
        user_id: i64,
    ) -> Result<Option<Self>, ProjectError> {
        let member = sqlx::query_as::<_, ProjectMember>(
            "SELECT * FROM project_members WHERE project_id = $1 AND user_id = $2",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(member)
    }

    pub async fn list_by_project(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<Self>, ProjectError> {
        let members = sqlx::query_as::<_, ProjectMember>(
            r#"SELECT * FROM project_members
               WHERE project_id = $1 AND removed_at IS NULL
               ORDER BY id ASC"#,
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;
        Ok(members)
    }

    pub async fn create<'e, E>(
        executor: E,
        project_id: i64,
        data: &CreateProjectMember,
    ) -> Result<Self, ProjectError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, ProjectMember>(
            r#"INSERT INTO project_members (project_id, user_id, role, joined_at, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $4, $4)
               RETURNING *"#,
        )
        .bind(project_id)
        .bind(data.user_id)
        .bind(data.role)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return ProjectError::Conflict(format!(
                    "User {} is already a member of project {}",
                    data.user_id, project_id
                ));
            }
            if is_foreign_key_violation(&e) {
                return ProjectError::Conflict("Project or user does not exist".to_string());
            }
            ProjectError::from(e)
        })
    }

    pub async fn soft_remove<'e, E>(executor: E, id: i64) -> Result<Self, ProjectError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, ProjectMember>(
            r#"UPDATE project_members
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
        .ok_or(ProjectError::MemberNotFound)
    }
}

impl ProjectAttachment {
    pub async fn list_by_project(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<Self>, ProjectError> {
        let attachments = sqlx::query_as::<_, ProjectAttachment>(
            "SELECT * FROM project_attachments WHERE project_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;
        Ok(attachments)
    }

    pub async fn create<'e, E>(
        executor: E,
        project_id: i64,
        data: &CreateProjectAttachment,
    ) -> Result<Self, ProjectError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ProjectAttachment>(
            r#"INSERT INTO project_attachments (
                   project_id, file_record_id, role, uploaded_for_project_status,
                   created_by_user_id, correlation_id, created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
               RETURNING *"#,
        )
        .bind(project_id)
        .bind(data.file_record_id)
        .bind(&data.role)
        .bind(data.uploaded_for_project_status)
        .bind(data.created_by_user_id)
        .bind(data.correlation_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return ProjectError::Conflict(format!(
                    "File {} is already attached to project {}",
                    data.file_record_id, project_id
                ));
            }
            if is_foreign_key_violation(&e) {
                return ProjectError::Conflict("Project or file does not exist".to_string());
            }
            ProjectError::from(e)
        })
    }

    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<u64, ProjectError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM project_attachments WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::file_record::{CreateFileRecord, FileRecord},
        test_utils::{create_test_pool, seed_project, seed_user, seed_workspace},
    };

    #[tokio::test]
    async fn slug_is_unique_within_workspace_only() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "owner").await;
        let ws_a = seed_workspace(&pool, owner.id, "alpha").await;
        let ws_b = seed_workspace(&pool, owner.id, "beta").await;

        let data = CreateProject {
            name: "Website".to_string(),
            slug: "website".to_string(),
            owner_user_id: owner.id,
            ..Default::default()
        };
        let project = Project::create(&pool, ws_a.id, &data).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Draft);
        assert_eq!(
            project.to_string(),
            format!("Project:{}:W:{}:S:website:v1", project.id, ws_a.id)
        );

        let dup = Project::create(&pool, ws_a.id, &data).await.unwrap_err();
        assert!(matches!(dup, ProjectError::Conflict(_)));

        Project::create(&pool, ws_b.id, &data).await.unwrap();
    }

    #[tokio::test]
    async fn status_update_bumps_version() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "owner").await;
        let workspace = seed_workspace(&pool, owner.id, "alpha").await;
        let project = seed_project(&pool, workspace.id, owner.id, "site").await;

        let launched = Project::update(
            &mut *pool.acquire().await.unwrap(),
            project.id,
            &UpdateProject {
                status: Some(ProjectStatus::Launched),
                version: Some(project.version),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(launched.status, ProjectStatus::Launched);
        assert_eq!(launched.version, 2);

        let err = Project::update(
            &mut *pool.acquire().await.unwrap(),
            project.id,
            &UpdateProject {
                status: Some(ProjectStatus::Archived),
                version: Some(project.version),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProjectError::VersionMismatch));
    }

    #[tokio::test]
    async fn attachment_defaults_role() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "owner").await;
        let workspace = seed_workspace(&pool, owner.id, "alpha").await;
        let project = seed_project(&pool, workspace.id, owner.id, "site").await;
        let file = FileRecord::create(
            &pool,
            &CreateFileRecord {
                storage_path: "uploads/brief.pdf".to_string(),
                filename: "brief.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                size_bytes: 1024,
                checksum: "abc123".to_string(),
                created_by_user_id: owner.id,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let body: CreateProjectAttachment = serde_json::from_value(serde_json::json!({
            "file_record_id": file.id,
            "created_by_user_id": owner.id,
        }))
        .unwrap();
        let attachment = ProjectAttachment::create(&pool, project.id, &body)
            .await
            .unwrap();
        assert_eq!(attachment.role, "supporting-doc");
        assert_eq!(
            attachment.to_string(),
            format!(
                "ProjectAttachment:{}:P:{}:F:{}:R:supporting-doc:v1",
                attachment.id, project.id, file.id
            )
        );

        let listed = ProjectAttachment::list_by_project(&pool, project.id)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }
}
