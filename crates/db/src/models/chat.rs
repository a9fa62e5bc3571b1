use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use super::{OrNa, is_foreign_key_violation};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, Display, EnumString, Default,
)]
#[repr(i32)]
pub enum ChatRoomType {
    #[default]
    Global = 0,
    ProjectChannel = 1,
    WorkspaceChannel = 2,
    DirectMessage = 3,
    Group = 4,
    System = 5,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, Display, EnumString, Default,
)]
#[repr(i32)]
pub enum ChatRoomRole {
    #[default]
    Member = 0,
    Moderator = 1,
    Admin = 2,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: i64,
    pub project_id: Option<i64>,
    pub workspace_id: Option<i64>,
    pub name: String,
    pub room_type: ChatRoomType,
    pub owner_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateChatRoom {
    pub project_id: Option<i64>,
    pub workspace_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub room_type: ChatRoomType,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChatRoomMember {
    pub room_id: i64,
    pub user_id: i64,
    pub role: ChatRoomRole,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MessageContent {
    pub id: i64,
    pub text: Option<String>,
    pub metadata_json: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub room_id: i64,
    pub project_id: Option<i64>,
    pub sender_id: i64,
    pub receiver_id: Option<i64>,
    pub parent_message_id: Option<i64>,
    pub message_content_id: i64,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    /// Joined from `message_contents`
    pub text: Option<String>,
    pub metadata_json: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PostChatMessage {
    pub sender_id: i64,
    pub receiver_id: Option<i64>,
    pub parent_message_id: Option<i64>,
    pub text: Option<String>,
    pub metadata_json: Option<String>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat room not found")]
    RoomNotFound,
    #[error("chat message not found")]
    NotFound,
    #[error("chat conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl fmt::Display for ChatRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChatRoom:{}:T:{}:P:{}:W:{}:N:{}",
            self.id,
            self.room_type,
            OrNa(&self.project_id),
            OrNa(&self.workspace_id),
            self.name
        )
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChatMessage:{}:R:{}:S:{}:Parent:{}",
            self.id,
            self.room_id,
            self.sender_id,
            OrNa(&self.parent_message_id)
        )
    }
}

const MESSAGE_SELECT: &str = r#"SELECT m.id, m.room_id, m.project_id, m.sender_id, m.receiver_id,
       m.parent_message_id, m.message_content_id, m.is_edited, m.created_at, m.edited_at,
       c.text, c.metadata_json
FROM chat_messages m
JOIN message_contents c ON c.id = m.message_content_id"#;

impl ChatRoom {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, ChatError> {
        let room = sqlx::query_as::<_, ChatRoom>("SELECT * FROM chat_rooms WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(room)
    }

    /// Open rooms, optionally narrowed to a project.
    pub async fn list(pool: &SqlitePool, project_id: Option<i64>) -> Result<Vec<Self>, ChatError> {
        let rooms = sqlx::query_as::<_, ChatRoom>(
            r#"SELECT * FROM chat_rooms
               WHERE archived_at IS NULL
                 AND ($1 IS NULL OR project_id = $1)
               ORDER BY name ASC, id ASC"#,
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;
        Ok(rooms)
    }

    pub async fn create<'e, E>(executor: E, data: &CreateChatRoom) -> Result<Self, ChatError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ChatRoom>(
            r#"INSERT INTO chat_rooms (project_id, workspace_id, name, room_type, owner_id, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING *"#,
        )
        .bind(data.project_id)
        .bind(data.workspace_id)
        .bind(&data.name)
        .bind(data.room_type)
        .bind(data.owner_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                return ChatError::Conflict("Project, workspace or owner does not exist".to_string());
            }
            ChatError::from(e)
        })
    }

    pub async fn archive<'e, E>(executor: E, id: i64) -> Result<Self, ChatError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ChatRoom>(
            r#"UPDATE chat_rooms SET archived_at = COALESCE(archived_at, $2)
               WHERE id = $1
               RETURNING *"#,
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(executor)
        .await?
        .ok_or(ChatError::RoomNotFound)
    }
}

impl ChatRoomMember {
    /// Joining again after leaving reopens the membership with the new role.
    pub async fn join<'e, E>(
        executor: E,
        room_id: i64,
        user_id: i64,
        role: ChatRoomRole,
    ) -> Result<Self, ChatError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ChatRoomMember>(
            r#"INSERT INTO chat_room_members (room_id, user_id, role, joined_at)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (room_id, user_id) DO UPDATE
                   SET role = excluded.role,
                       joined_at = CASE WHEN left_at IS NULL THEN joined_at ELSE excluded.joined_at END,
                       left_at = NULL
               RETURNING *"#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(role)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                return ChatError::RoomNotFound;
            }
            ChatError::from(e)
        })
    }

    pub async fn leave<'e, E>(executor: E, room_id: i64, user_id: i64) -> Result<Self, ChatError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ChatRoomMember>(
            r#"UPDATE chat_room_members SET left_at = COALESCE(left_at, $3)
               WHERE room_id = $1 AND user_id = $2
               RETURNING *"#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_optional(executor)
        .await?
        .ok_or(ChatError::NotFound)
    }

    pub async fn list_active(pool: &SqlitePool, room_id: i64) -> Result<Vec<Self>, ChatError> {
        let members = sqlx::query_as::<_, ChatRoomMember>(
            r#"SELECT * FROM chat_room_members
               WHERE room_id = $1 AND left_at IS NULL
               ORDER BY joined_at ASC"#,
        )
        .bind(room_id)
        .fetch_all(pool)
        .await?;
        Ok(members)
    }
}

impl ChatMessage {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, ChatError> {
        let sql = format!("{MESSAGE_SELECT} WHERE m.id = $1");
        let message = sqlx::query_as::<_, ChatMessage>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(message)
    }

    /// Oldest first.
    pub async fn list_by_room(
        pool: &SqlitePool,
        room_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, ChatError> {
        let sql = format!(
            "{MESSAGE_SELECT} WHERE m.room_id = $1 ORDER BY m.created_at ASC, m.id ASC LIMIT $2 OFFSET $3"
        );
        let messages = sqlx::query_as::<_, ChatMessage>(&sql)
            .bind(room_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;
        Ok(messages)
    }

    /// Writes the content row and the message row in one transaction. The
    /// message inherits the room's project.
    pub async fn post(
        pool: &SqlitePool,
        room_id: i64,
        data: &PostChatMessage,
    ) -> Result<Self, ChatError> {
        let mut tx = pool.begin().await?;

        let room_project: Option<Option<i64>> =
            sqlx::query_scalar("SELECT project_id FROM chat_rooms WHERE id = $1")
                .bind(room_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(project_id) = room_project else {
            return Err(ChatError::RoomNotFound);
        };

        let content_id: i64 = sqlx::query_scalar(
            "INSERT INTO message_contents (text, metadata_json) VALUES ($1, $2) RETURNING id",
        )
        .bind(&data.text)
        .bind(&data.metadata_json)
        .fetch_one(&mut *tx)
        .await?;

        let message_id: i64 = sqlx::query_scalar(
            r#"INSERT INTO chat_messages (
                   room_id, project_id, sender_id, receiver_id, parent_message_id,
                   message_content_id, created_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id"#,
        )
        .bind(room_id)
        .bind(project_id)
        .bind(data.sender_id)
        .bind(data.receiver_id)
        .bind(data.parent_message_id)
        .bind(content_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                return ChatError::Conflict("Sender, receiver or parent does not exist".to_string());
            }
            ChatError::from(e)
        })?;

        let sql = format!("{MESSAGE_SELECT} WHERE m.id = $1");
        let message = sqlx::query_as::<_, ChatMessage>(&sql)
            .bind(message_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }

    pub async fn edit(pool: &SqlitePool, id: i64, text: &str) -> Result<Self, ChatError> {
        let mut tx = pool.begin().await?;

        let content_id: Option<i64> =
            sqlx::query_scalar("SELECT message_content_id FROM chat_messages WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let content_id = content_id.ok_or(ChatError::NotFound)?;

        sqlx::query("UPDATE message_contents SET text = $2 WHERE id = $1")
            .bind(content_id)
            .bind(text)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE chat_messages SET is_edited = 1, edited_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let sql = format!("{MESSAGE_SELECT} WHERE m.id = $1");
        let message = sqlx::query_as::<_, ChatMessage>(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_pool, seed_user};

    #[tokio::test]
    async fn post_and_thread_messages() {
        let (pool, _temp_dir) = create_test_pool().await;
        let alice = seed_user(&pool, "alice").await;
        let bob = seed_user(&pool, "bob").await;

        let room = ChatRoom::create(
            &pool,
            &CreateChatRoom {
                name: "general".to_string(),
                owner_id: Some(alice.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(room.room_type, ChatRoomType::Global);
        assert_eq!(
            room.to_string(),
            format!("ChatRoom:{}:T:Global:P:n/a:W:n/a:N:general", room.id)
        );

        let root = ChatMessage::post(
            &pool,
            room.id,
            &PostChatMessage {
                sender_id: alice.id,
                text: Some("hello".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let reply = ChatMessage::post(
            &pool,
            room.id,
            &PostChatMessage {
                sender_id: bob.id,
                parent_message_id: Some(root.id),
                text: Some("hi".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(reply.parent_message_id, Some(root.id));
        assert_eq!(reply.text.as_deref(), Some("hi"));

        let edited = ChatMessage::edit(&pool, root.id, "hello all").await.unwrap();
        assert!(edited.is_edited);
        assert!(edited.edited_at.is_some());

        let listed = ChatMessage::list_by_room(&pool, room.id, 50, 0).await.unwrap();
        let texts: Vec<_> = listed.iter().map(|m| m.text.clone().unwrap_or_default()).collect();
        assert_eq!(texts, vec!["hello all".to_string(), "hi".to_string()]);

        let missing = ChatMessage::post(&pool, 9_999, &PostChatMessage::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, ChatError::RoomNotFound));
    }

    #[tokio::test]
    async fn rejoining_clears_left_at() {
        let (pool, _temp_dir) = create_test_pool().await;
        let alice = seed_user(&pool, "alice").await;
        let room = ChatRoom::create(
            &pool,
            &CreateChatRoom {
                name: "ops".to_string(),
                room_type: ChatRoomType::Group,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        ChatRoomMember::join(&pool, room.id, alice.id, ChatRoomRole::Member)
            .await
            .unwrap();
        let left = ChatRoomMember::leave(&pool, room.id, alice.id).await.unwrap();
        assert!(left.left_at.is_some());
        assert!(ChatRoomMember::list_active(&pool, room.id).await.unwrap().is_empty());

        let back = ChatRoomMember::join(&pool, room.id, alice.id, ChatRoomRole::Moderator)
            .await
            .unwrap();
        assert!(back.left_at.is_none());
        assert_eq!(back.role, ChatRoomRole::Moderator);
        assert_eq!(ChatRoomMember::list_active(&pool, room.id).await.unwrap().len(), 1);
    }
}
