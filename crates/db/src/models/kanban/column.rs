use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool};

use super::{KanbanError, validate_reorder};
use crate::{
    audit::AuditWriter,
    models::{
        audit_event::NewAuditEvent, is_foreign_key_violation, is_unique_violation, row_exists,
    },
    retry::{RetryConfig, with_retry},
};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct KanbanColumn {
    pub id: i64,
    pub board_id: i64,
    pub name: String,
    pub slug: String,
    pub position: i64,
    pub description: Option<String>,
    pub is_archived: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateKanbanColumn {
    pub name: String,
    pub slug: String,
    /// Appended after the last column when omitted
    pub position: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateKanbanColumn {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_archived: Option<bool>,
    pub version: Option<i64>,
}

impl fmt::Display for KanbanColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KanbanColumn:{}:B:{}:S:{}:Pos:{}:v{}",
            self.id, self.board_id, self.slug, self.position, self.version
        )
    }
}

impl KanbanColumn {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, KanbanError> {
        let column =
            sqlx::query_as::<_, KanbanColumn>("SELECT * FROM kanban_columns WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(column)
    }

    pub async fn list_by_board(pool: &SqlitePool, board_id: i64) -> Result<Vec<Self>, KanbanError> {
        let columns = sqlx::query_as::<_, KanbanColumn>(
            "SELECT * FROM kanban_columns WHERE board_id = $1 ORDER BY position ASC, id ASC",
        )
        .bind(board_id)
        .fetch_all(pool)
        .await?;
        Ok(columns)
    }

    pub async fn create<'e, E>(
        executor: E,
        board_id: i64,
        data: &CreateKanbanColumn,
    ) -> Result<Self, KanbanError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, KanbanColumn>(
            r#"INSERT INTO kanban_columns (
                   board_id, name, slug, position, description, created_at, updated_at
               )
               VALUES (
                   $1, $2, $3,
                   COALESCE($4, (SELECT COALESCE(MAX(position) + 1, 0) FROM kanban_columns WHERE board_id = $1)),
                   $5, $6, $6
               )
               RETURNING *"#,
        )
        .bind(board_id)
        .bind(&data.name)
        .bind(&data.slug)
        .bind(data.position)
        .bind(&data.description)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return KanbanError::Conflict(format!(
                    "Column slug '{}' is already used on this board",
                    data.slug
                ));
            }
            if is_foreign_key_violation(&e) {
                return KanbanError::BoardNotFound;
            }
            KanbanError::from(e)
        })
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        data: &UpdateKanbanColumn,
    ) -> Result<Self, KanbanError> {
        let updated = sqlx::query_as::<_, KanbanColumn>(
            r#"UPDATE kanban_columns
               SET name        = COALESCE($2, name),
                   description = COALESCE($3, description),
                   is_archived = COALESCE($4, is_archived),
                   version     = version + 1,
                   updated_at  = $5
               WHERE id = $1
                 AND version = COALESCE($6, version)
               RETURNING *"#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.is_archived)
        .bind(Utc::now())
        .bind(data.version)
        .fetch_optional(&mut *conn)
        .await?;

        match updated {
            Some(column) => Ok(column),
            None if row_exists(&mut *conn, "kanban_columns", id).await? => {
                Err(KanbanError::VersionMismatch)
            }
            None => Err(KanbanError::ColumnNotFound),
        }
    }

    /// Set `position = index` for each listed column and record `event`, all
    /// in one transaction. Columns not listed keep their position.
    pub async fn reorder(
        pool: &SqlitePool,
        board_id: i64,
        ordered_ids: &[i64],
        audit: &AuditWriter,
        event: &NewAuditEvent,
    ) -> Result<Vec<Self>, KanbanError> {
        let children: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM kanban_columns WHERE board_id = $1")
                .bind(board_id)
                .fetch_all(pool)
                .await?;
        validate_reorder(ordered_ids, &children)?;

        with_retry(&RetryConfig::default(), "reorder_kanban_columns", || async {
            let now = Utc::now();
            let mut tx = pool.begin().await?;
            for (index, id) in ordered_ids.iter().enumerate() {
                sqlx::query(
                    r#"UPDATE kanban_columns
                       SET position = $3, version = version + 1, updated_at = $4
                       WHERE id = $1 AND board_id = $2"#,
                )
                .bind(id)
                .bind(board_id)
                .bind(index as i64)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            audit.record_in_transaction(event, &mut *tx).await?;
            tx.commit().await
        })
        .await?;

        Self::list_by_board(pool, board_id).await
    }

    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<u64, KanbanError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM kanban_columns WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{
        models::kanban::{CreateKanbanBoard, KanbanBoard},
        test_utils::{create_test_pool, seed_user, seed_workspace},
    };

    fn reorder_event(board_id: i64) -> NewAuditEvent {
        NewAuditEvent::new("KanbanAudit", Uuid::new_v4()).target("KanbanBoard", Some(board_id))
    }

    async fn reorder_events(pool: &SqlitePool, board_id: i64) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_events WHERE target_type = 'KanbanBoard' AND target_id = $1",
        )
        .bind(board_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn board(pool: &SqlitePool) -> KanbanBoard {
        let owner = seed_user(pool, "owner").await;
        let workspace = seed_workspace(pool, owner.id, "acme").await;
        KanbanBoard::create(
            pool,
            workspace.id,
            &CreateKanbanBoard {
                name: "Sprint".to_string(),
                slug: "sprint".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    fn column(slug: &str) -> CreateKanbanColumn {
        CreateKanbanColumn {
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn columns_append_in_order() {
        let (pool, _temp_dir) = create_test_pool().await;
        let board = board(&pool).await;

        let todo = KanbanColumn::create(&pool, board.id, &column("todo")).await.unwrap();
        let doing = KanbanColumn::create(&pool, board.id, &column("doing")).await.unwrap();
        assert_eq!(todo.position, 0);
        assert_eq!(doing.position, 1);
        assert_eq!(
            doing.to_string(),
            format!("KanbanColumn:{}:B:{}:S:doing:Pos:1:v1", doing.id, board.id)
        );

        let dup = KanbanColumn::create(&pool, board.id, &column("todo"))
            .await
            .unwrap_err();
        assert!(matches!(dup, KanbanError::Conflict(_)));
    }

    #[tokio::test]
    async fn reorder_rewrites_positions() {
        let (pool, _temp_dir) = create_test_pool().await;
        let board = board(&pool).await;

        let a = KanbanColumn::create(&pool, board.id, &column("a")).await.unwrap();
        let b = KanbanColumn::create(&pool, board.id, &column("b")).await.unwrap();
        let c = KanbanColumn::create(&pool, board.id, &column("c")).await.unwrap();

        let reordered = KanbanColumn::reorder(
            &pool,
            board.id,
            &[c.id, a.id, b.id],
            &AuditWriter::new(pool.clone()),
            &reorder_event(board.id),
        )
        .await
        .unwrap();
        let order: Vec<(i64, i64)> = reordered.iter().map(|col| (col.id, col.position)).collect();
        assert_eq!(order, vec![(c.id, 0), (a.id, 1), (b.id, 2)]);
        assert!(reordered.iter().all(|col| col.version == 2));
        assert_eq!(reorder_events(&pool, board.id).await, 1);
    }

    #[tokio::test]
    async fn reorder_rejects_columns_from_other_boards() {
        let (pool, _temp_dir) = create_test_pool().await;
        let board = board(&pool).await;
        let other = KanbanBoard::create(
            &pool,
            board.workspace_id,
            &CreateKanbanBoard {
                name: "Other".to_string(),
                slug: "other".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let mine = KanbanColumn::create(&pool, board.id, &column("mine")).await.unwrap();
        let theirs = KanbanColumn::create(&pool, other.id, &column("theirs"))
            .await
            .unwrap();

        let err = KanbanColumn::reorder(
            &pool,
            board.id,
            &[theirs.id, mine.id],
            &AuditWriter::new(pool.clone()),
            &reorder_event(board.id),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KanbanError::InvalidReorder(_)));

        let untouched = KanbanColumn::find_by_id(&pool, mine.id).await.unwrap().unwrap();
        assert_eq!(untouched.position, 0);
        assert_eq!(reorder_events(&pool, board.id).await, 0);
        assert_eq!(untouched.version, 1);
    }
}
