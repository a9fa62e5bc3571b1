use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool};

use super::KanbanError;
use crate::models::{OrNa, is_foreign_key_violation, is_unique_violation, row_exists};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct KanbanBoard {
    pub id: i64,
    pub workspace_id: i64,
    /// `None` for a workspace-wide board
    pub project_id: Option<i64>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub is_archived: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateKanbanBoard {
    pub project_id: Option<i64>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateKanbanBoard {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub is_archived: Option<bool>,
    pub version: Option<i64>,
}

impl fmt::Display for KanbanBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let project = match self.project_id {
            Some(id) => id.to_string(),
            None => "null".to_string(),
        };
        write!(
            f,
            "KanbanBoard:{}:W:{}:P:{}:S:{}:v{}",
            self.id, self.workspace_id, project, self.slug, self.version
        )
    }
}

impl KanbanBoard {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, KanbanError> {
        let board = sqlx::query_as::<_, KanbanBoard>("SELECT * FROM kanban_boards WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(board)
    }

    pub async fn find_by_scope_and_slug(
        pool: &SqlitePool,
        workspace_id: i64,
        project_id: Option<i64>,
        slug: &str,
    ) -> Result<Option<Self>, KanbanError> {
        let board = sqlx::query_as::<_, KanbanBoard>(
            r#"SELECT * FROM kanban_boards
               WHERE workspace_id = $1 AND project_id IS $2 AND slug = $3"#,
        )
        .bind(workspace_id)
        .bind(project_id)
        .bind(slug)
        .fetch_optional(pool)
        .await?;
        Ok(board)
    }

    /// All boards in the workspace, project-scoped ones included.
    pub async fn list_by_workspace(
        pool: &SqlitePool,
        workspace_id: i64,
    ) -> Result<Vec<Self>, KanbanError> {
        let boards = sqlx::query_as::<_, KanbanBoard>(
            "SELECT * FROM kanban_boards WHERE workspace_id = $1 ORDER BY name ASC, id ASC",
        )
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
        Ok(boards)
    }

    pub async fn list_by_project(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<Self>, KanbanError> {
        let boards = sqlx::query_as::<_, KanbanBoard>(
            "SELECT * FROM kanban_boards WHERE project_id = $1 ORDER BY name ASC, id ASC",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;
        Ok(boards)
    }

    pub async fn create<'e, E>(
        executor: E,
        workspace_id: i64,
        data: &CreateKanbanBoard,
    ) -> Result<Self, KanbanError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, KanbanBoard>(
            r#"INSERT INTO kanban_boards (
                   workspace_id, project_id, name, slug, description, created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $6)
               RETURNING *"#,
        )
        .bind(workspace_id)
        .bind(data.project_id)
        .bind(&data.name)
        .bind(&data.slug)
        .bind(&data.description)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return KanbanError::Conflict(format!(
                    "Board slug '{}' is already used in this scope",
                    data.slug
                ));
            }
            if is_foreign_key_violation(&e) {
                return KanbanError::Conflict("Workspace or project does not exist".to_string());
            }
            KanbanError::from(e)
        })
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        data: &UpdateKanbanBoard,
    ) -> Result<Self, KanbanError> {
        let updated = sqlx::query_as::<_, KanbanBoard>(
            r#"UPDATE kanban_boards
               SET name        = COALESCE($2, name),
                   slug        = COALESCE($3, slug),
                   description = COALESCE($4, description),
                   is_archived = COALESCE($5, is_archived),
                   version     = version + 1,
                   updated_at  = $6
               WHERE id = $1
                 AND version = COALESCE($7, version)
               RETURNING *"#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.slug)
        .bind(&data.description)
        .bind(data.is_archived)
        .bind(Utc::now())
        .bind(data.version)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return KanbanError::Conflict(format!(
                    "Board slug '{}' is already used in this scope",
                    OrNa(&data.slug)
                ));
            }
            KanbanError::from(e)
        })?;

        match updated {
            Some(board) => Ok(board),
            None if row_exists(&mut *conn, "kanban_boards", id).await? => {
                Err(KanbanError::VersionMismatch)
            }
            None => Err(KanbanError::BoardNotFound),
        }
    }

    /// Hard delete; columns and cards cascade.
    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<u64, KanbanError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM kanban_boards WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_pool, seed_project, seed_user, seed_workspace};

    #[tokio::test]
    async fn slug_is_unique_per_scope() {
        let (pool, _temp_dir) = create_test_pool().await;
        let owner = seed_user(&pool, "owner").await;
        let workspace = seed_workspace(&pool, owner.id, "acme").await;
        let project = seed_project(&pool, workspace.id, owner.id, "site").await;

        let workspace_board = CreateKanbanBoard {
            name: "Roadmap".to_string(),
            slug: "roadmap".to_string(),
            ..Default::default()
        };
        let board = KanbanBoard::create(&pool, workspace.id, &workspace_board)
            .await
            .unwrap();
        assert_eq!(
            board.to_string(),
            format!("KanbanBoard:{}:W:{}:P:null:S:roadmap:v1", board.id, workspace.id)
        );

        // Workspace-wide boards collide even though project_id is NULL
        let err = KanbanBoard::create(&pool, workspace.id, &workspace_board)
            .await
            .unwrap_err();
        assert!(matches!(err, KanbanError::Conflict(_)));

        let project_board = CreateKanbanBoard {
            project_id: Some(project.id),
            ..workspace_board
        };
        let scoped = KanbanBoard::create(&pool, workspace.id, &project_board)
            .await
            .unwrap();

        let found = KanbanBoard::find_by_scope_and_slug(&pool, workspace.id, None, "roadmap")
            .await
            .unwrap();
        assert_eq!(found.map(|b| b.id), Some(board.id));

        let found = KanbanBoard::find_by_scope_and_slug(
            &pool,
            workspace.id,
            Some(project.id),
            "roadmap",
        )
        .await
        .unwrap();
        assert_eq!(found.map(|b| b.id), Some(scoped.id));

        assert_eq!(
            KanbanBoard::list_by_workspace(&pool, workspace.id)
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            KanbanBoard::list_by_project(&pool, project.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
