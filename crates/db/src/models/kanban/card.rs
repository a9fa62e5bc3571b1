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
pub struct KanbanCard {
    pub id: i64,
    pub column_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub position: i64,
    pub is_blocked: bool,
    pub is_archived: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateKanbanCard {
    pub title: String,
    pub description: Option<String>,
    pub position: Option<i64>,
}

/// Setting `column_id` moves the card; it lands at the end of the target
/// column unless `position` is also given.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateKanbanCard {
    pub column_id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub position: Option<i64>,
    pub is_blocked: Option<bool>,
    pub is_archived: Option<bool>,
    pub version: Option<i64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct KanbanCardAttachment {
    pub id: i64,
    pub card_id: i64,
    pub file_record_id: i64,
    pub created_by_user_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct KanbanCardAssignee {
    pub id: i64,
    pub card_id: i64,
    pub project_member_id: i64,
    pub assigned_at: DateTime<Utc>,
    pub created_by_user_id: i64,
}

impl fmt::Display for KanbanCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KanbanCard:{}:C:{}:P:{}:T:{}:v{}",
            self.id, self.column_id, self.position, self.title, self.version
        )
    }
}

impl KanbanCard {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, KanbanError> {
        let card = sqlx::query_as::<_, KanbanCard>("SELECT * FROM kanban_cards WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(card)
    }

    pub async fn list_by_column(
        pool: &SqlitePool,
        column_id: i64,
    ) -> Result<Vec<Self>, KanbanError> {
        let cards = sqlx::query_as::<_, KanbanCard>(
            "SELECT * FROM kanban_cards WHERE column_id = $1 ORDER BY position ASC, id ASC",
        )
        .bind(column_id)
        .fetch_all(pool)
        .await?;
        Ok(cards)
    }

    pub async fn create<'e, E>(
        executor: E,
        column_id: i64,
        data: &CreateKanbanCard,
    ) -> Result<Self, KanbanError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, KanbanCard>(
            r#"INSERT INTO kanban_cards (
                   column_id, title, description, position, created_at, updated_at
               )
               VALUES (
                   $1, $2, $3,
                   COALESCE($4, (SELECT COALESCE(MAX(position) + 1, 0) FROM kanban_cards WHERE column_id = $1)),
                   $5, $5
               )
               RETURNING *"#,
        )
        .bind(column_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.position)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                return KanbanError::ColumnNotFound;
            }
            KanbanError::from(e)
        })
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        data: &UpdateKanbanCard,
    ) -> Result<Self, KanbanError> {
        // Moving to another column without an explicit position appends to
        // it. Naming the card's current column keeps its position.
        let position = match (data.column_id, data.position) {
            (Some(column_id), None) => sqlx::query_scalar::<_, i64>(
                r#"SELECT CASE
                              WHEN column_id = $2 THEN position
                              ELSE (SELECT COALESCE(MAX(position) + 1, 0)
                                      FROM kanban_cards
                                     WHERE column_id = $2)
                          END
                     FROM kanban_cards
                    WHERE id = $1"#,
            )
            .bind(id)
            .bind(column_id)
            .fetch_optional(&mut *conn)
            .await?,
            (_, position) => position,
        };

        let updated = sqlx::query_as::<_, KanbanCard>(
            r#"UPDATE kanban_cards
               SET column_id   = COALESCE($2, column_id),
                   title       = COALESCE($3, title),
                   description = COALESCE($4, description),
                   position    = COALESCE($5, position),
                   is_blocked  = COALESCE($6, is_blocked),
                   is_archived = COALESCE($7, is_archived),
                   version     = version + 1,
                   updated_at  = $8
               WHERE id = $1
                 AND version = COALESCE($9, version)
               RETURNING *"#,
        )
        .bind(id)
        .bind(data.column_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(position)
        .bind(data.is_blocked)
        .bind(data.is_archived)
        .bind(Utc::now())
        .bind(data.version)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                return KanbanError::ColumnNotFound;
            }
            KanbanError::from(e)
        })?;

        match updated {
            Some(card) => Ok(card),
            None if row_exists(&mut *conn, "kanban_cards", id).await? => {
                Err(KanbanError::VersionMismatch)
            }
            None => Err(KanbanError::CardNotFound),
        }
    }

    /// Set `position = index` for each listed card and record `event`, all
    /// in one transaction. Cards not listed keep their position.
    pub async fn reorder_within_column(
        pool: &SqlitePool,
        column_id: i64,
        ordered_ids: &[i64],
        audit: &AuditWriter,
        event: &NewAuditEvent,
    ) -> Result<Vec<Self>, KanbanError> {
        let children: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM kanban_cards WHERE column_id = $1")
                .bind(column_id)
                .fetch_all(pool)
                .await?;
        validate_reorder(ordered_ids, &children)?;

        with_retry(&RetryConfig::default(), "reorder_kanban_cards", || async {
            let now = Utc::now();
            let mut tx = pool.begin().await?;
            for (index, id) in ordered_ids.iter().enumerate() {
                sqlx::query(
                    r#"UPDATE kanban_cards
                       SET position = $3, version = version + 1, updated_at = $4
                       WHERE id = $1 AND column_id = $2"#,
                )
                .bind(id)
                .bind(column_id)
                .bind(index as i64)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            audit.record_in_transaction(event, &mut *tx).await?;
            tx.commit().await
        })
        .await?;

        Self::list_by_column(pool, column_id).await
    }

    pub async fn delete<'e, E>(executor: E, id: i64) -> Result<u64, KanbanError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM kanban_cards WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn add_attachment<'e, E>(
        executor: E,
        card_id: i64,
        file_record_id: i64,
        created_by_user_id: i64,
    ) -> Result<KanbanCardAttachment, KanbanError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, KanbanCardAttachment>(
            r#"INSERT INTO kanban_card_attachments (card_id, file_record_id, created_by_user_id, created_at)
               VALUES ($1, $2, $3, $4)
               RETURNING *"#,
        )
        .bind(card_id)
        .bind(file_record_id)
        .bind(created_by_user_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return KanbanError::Conflict("File is already attached to this card".to_string());
            }
            if is_foreign_key_violation(&e) {
                return KanbanError::Conflict("Card, file or user does not exist".to_string());
            }
            KanbanError::from(e)
        })
    }

    pub async fn list_attachments(
        pool: &SqlitePool,
        card_id: i64,
    ) -> Result<Vec<KanbanCardAttachment>, KanbanError> {
        let attachments = sqlx::query_as::<_, KanbanCardAttachment>(
            "SELECT * FROM kanban_card_attachments WHERE card_id = $1 ORDER BY id ASC",
        )
        .bind(card_id)
        .fetch_all(pool)
        .await?;
        Ok(attachments)
    }

    pub async fn add_assignee<'e, E>(
        executor: E,
        card_id: i64,
        project_member_id: i64,
        created_by_user_id: i64,
    ) -> Result<KanbanCardAssignee, KanbanError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, KanbanCardAssignee>(
            r#"INSERT INTO kanban_card_assignees (card_id, project_member_id, assigned_at, created_by_user_id)
               VALUES ($1, $2, $3, $4)
               RETURNING *"#,
        )
        .bind(card_id)
        .bind(project_member_id)
        .bind(Utc::now())
        .bind(created_by_user_id)
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return KanbanError::Conflict("Member is already assigned to this card".to_string());
            }
            if is_foreign_key_violation(&e) {
                return KanbanError::Conflict("Card, member or user does not exist".to_string());
            }
            KanbanError::from(e)
        })
    }

    pub async fn list_assignees(
        pool: &SqlitePool,
        card_id: i64,
    ) -> Result<Vec<KanbanCardAssignee>, KanbanError> {
        let assignees = sqlx::query_as::<_, KanbanCardAssignee>(
            "SELECT * FROM kanban_card_assignees WHERE card_id = $1 ORDER BY assigned_at ASC, id ASC",
        )
        .bind(card_id)
        .fetch_all(pool)
        .await?;
        Ok(assignees)
    }

    pub async fn remove_assignee<'e, E>(
        executor: E,
        card_id: i64,
        project_member_id: i64,
    ) -> Result<u64, KanbanError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "DELETE FROM kanban_card_assignees WHERE card_id = $1 AND project_member_id = $2",
        )
        .bind(card_id)
        .bind(project_member_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
