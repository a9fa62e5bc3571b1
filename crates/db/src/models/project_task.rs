use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use super::{is_foreign_key_violation, row_exists};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, Display, EnumString, Default,
)]
#[repr(i32)]
pub enum ProjectTaskStatus {
    #[default]
    Pending = 0,
    InProgress = 1,
    Blocked = 2,
    Completed = 3,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProjectTask {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: ProjectTaskStatus,
    pub estimate_hours: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateProjectTask {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: ProjectTaskStatus,
    pub estimate_hours: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProjectTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectTaskStatus>,
    pub estimate_hours: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
    pub version: Option<i64>,
}

#[derive(Debug, Error)]
pub enum ProjectTaskError {
    #[error("task not found")]
    NotFound,
    #[error("task conflict: {0}")]
    Conflict(String),
    #[error("version mismatch")]
    VersionMismatch,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl fmt::Display for ProjectTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProjectTask:{}:P:{}:S:{}:v{}",
            self.id, self.project_id, self.status, self.version
        )
    }
}

impl ProjectTask {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, ProjectTaskError> {
        let task = sqlx::query_as::<_, ProjectTask>("SELECT * FROM project_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(task)
    }

    /// Open tasks first, then by due date with undated tasks last.
    pub async fn list_by_project(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<Self>, ProjectTaskError> {
        let tasks = sqlx::query_as::<_, ProjectTask>(
            r#"SELECT * FROM project_tasks
               WHERE project_id = $1
               ORDER BY status = 3 ASC, due_date IS NULL ASC, due_date ASC, id ASC"#,
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;
        Ok(tasks)
    }

    pub async fn create<'e, E>(
        executor: E,
        project_id: i64,
        data: &CreateProjectTask,
    ) -> Result<Self, ProjectTaskError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ProjectTask>(
            r#"INSERT INTO project_tasks (
                   project_id, title, description, status, estimate_hours, due_date,
                   created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
               RETURNING *"#,
        )
        .bind(project_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.status)
        .bind(data.estimate_hours)
        .bind(data.due_date)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                return ProjectTaskError::Conflict(format!(
                    "Project {} does not exist",
                    project_id
                ));
            }
            ProjectTaskError::from(e)
        })
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        data: &UpdateProjectTask,
    ) -> Result<Self, ProjectTaskError> {
        let updated = sqlx::query_as::<_, ProjectTask>(
            r#"UPDATE project_tasks
               SET title          = COALESCE($2, title),
                   description    = COALESCE($3, description),
                   status         = COALESCE($4, status),
                   estimate_hours = COALESCE($5, estimate_hours),
                   due_date       = COALESCE($6, due_date),
                   version        = version + 1,
                   updated_at     = $7
               WHERE id = $1
                 AND version = COALESCE($8, version)
               RETURNING *"#,
        )
        .bind(id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.status)
        .bind(data.estimate_hours)
        .bind(data.due_date)
        .bind(Utc::now())
        .bind(data.version)
        .fetch_optional(&mut *conn)
        .await?;

        match updated {
            Some(task) => Ok(task),
            None if row_exists(&mut *conn, "project_tasks", id).await? => {
                Err(ProjectTaskError::VersionMismatch)
            }
            None => Err(ProjectTaskError::NotFound),
        }
    }

    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<u64, ProjectTaskError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM project_tasks WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::test_utils::{create_test_pool, seed_project, seed_user, seed_workspace};

    #[tokio::test]
    async fn completed_tasks_sort_last() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "owner").await;
        let workspace = seed_workspace(&pool, owner.id, "alpha").await;
        let project = seed_project(&pool, workspace.id, owner.id, "site").await;

        let done = ProjectTask::create(
            &pool,
            project.id,
            &CreateProjectTask {
                title: "Kickoff".to_string(),
                status: ProjectTaskStatus::Completed,
                due_date: Some(Utc::now() - Duration::days(3)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let later = ProjectTask::create(
            &pool,
            project.id,
            &CreateProjectTask {
                title: "Launch".to_string(),
                due_date: Some(Utc::now() + Duration::days(10)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let sooner = ProjectTask::create(
            &pool,
            project.id,
            &CreateProjectTask {
                title: "Design".to_string(),
                due_date: Some(Utc::now() + Duration::days(1)),
                estimate_hours: Some(6.5),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let ids: Vec<i64> = ProjectTask::list_by_project(&pool, project.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![sooner.id, later.id, done.id]);
    }

    #[tokio::test]
    async fn update_rejects_stale_version() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "owner").await;
        let workspace = seed_workspace(&pool, owner.id, "alpha").await;
        let project = seed_project(&pool, workspace.id, owner.id, "site").await;
        let task = ProjectTask::create(
            &pool,
            project.id,
            &CreateProjectTask {
                title: "Write copy".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let blocked = ProjectTask::update(
            &mut *pool.acquire().await.unwrap(),
            task.id,
            &UpdateProjectTask {
                status: Some(ProjectTaskStatus::Blocked),
                version: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(blocked.status, ProjectTaskStatus::Blocked);

        let err = ProjectTask::update(
            &mut *pool.acquire().await.unwrap(),
            task.id,
            &UpdateProjectTask {
                status: Some(ProjectTaskStatus::Completed),
                version: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProjectTaskError::VersionMismatch));
    }
}
