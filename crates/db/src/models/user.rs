//! Local user accounts.
//!
//! Usernames and emails are matched on their normalized form (trimmed,
//! upper-cased); both normalized columns are unique. Password material is
//! optional so that externally-provisioned accounts can exist without it, and
//! is never serialized or rendered.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use super::{OrNa, is_unique_violation, row_exists};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, Display, EnumString, Default,
)]
#[repr(i32)]
pub enum SignupRoute {
    #[default]
    SelfService = 0,
    AdminSeed = 10,
    AdminCreated = 20,
    External = 30,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, Display, EnumString, Default,
)]
#[repr(i32)]
pub enum SignupStatus {
    #[default]
    Active = 0,
    PendingApproval = 10,
    Declined = 20,
    Approved = 30,
    Suspended = 40,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub system_type_id: Option<i64>,
    pub username: String,
    pub normalized_username: String,
    pub email: String,
    pub normalized_email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_salt: Option<String>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub display_name: Option<String>,
    pub verified: bool,
    pub github_id: Option<i64>,
    pub signup_route: SignupRoute,
    pub signup_status: SignupStatus,
    pub joining_purpose: Option<String>,
    pub supporting_documents_path: Option<String>,
    pub is_admin_seeded: bool,
    pub default_password_issued_at: Option<DateTime<Utc>>,
    pub profile_json: Option<String>,
    pub created_by: Option<i64>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub system_type_id: Option<i64>,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub password_salt: Option<String>,
    #[serde(default)]
    pub signup_route: SignupRoute,
    #[serde(default)]
    pub signup_status: SignupStatus,
    pub github_id: Option<i64>,
    pub joining_purpose: Option<String>,
    pub supporting_documents_path: Option<String>,
    #[serde(default)]
    pub is_admin_seeded: bool,
    pub default_password_issued_at: Option<DateTime<Utc>>,
    pub profile_json: Option<String>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub is_active: Option<bool>,
    pub verified: Option<bool>,
    pub signup_status: Option<SignupStatus>,
    pub github_id: Option<i64>,
    pub profile_json: Option<String>,
    /// Expected current version; `None` skips the concurrency check.
    pub version: Option<i64>,
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,
    #[error("user conflict: {0}")]
    Conflict(String),
    #[error("version mismatch")]
    VersionMismatch,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "User:{}:SysType={}:U={}:E={}:Route={}:Status={}:Active={}:Ver={}",
            self.id,
            OrNa(&self.system_type_id),
            self.normalized_username,
            self.normalized_email,
            self.signup_route,
            self.signup_status,
            self.is_active,
            self.version
        )
    }
}

impl User {
    pub fn normalize(value: &str) -> String {
        value.trim().to_uppercase()
    }

    /// Externally-routed signups wait for an administrator.
    pub fn needs_approval(&self) -> bool {
        self.signup_route == SignupRoute::External
            && self.signup_status == SignupStatus::PendingApproval
    }

    /// A default password was issued but no real hash has been set yet.
    pub fn must_change_password(&self) -> bool {
        self.default_password_issued_at.is_some()
            && self
                .password_hash
                .as_deref()
                .is_none_or(|hash| hash.trim().is_empty())
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, UserError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<Self>, UserError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE normalized_email = $1")
            .bind(Self::normalize(email))
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    pub async fn find_by_username(
        pool: &SqlitePool,
        username: &str,
    ) -> Result<Option<Self>, UserError> {
        let user =
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE normalized_username = $1")
                .bind(Self::normalize(username))
                .fetch_optional(pool)
                .await?;
        Ok(user)
    }

    pub async fn find_by_github_id(
        pool: &SqlitePool,
        github_id: i64,
    ) -> Result<Option<Self>, UserError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE github_id = $1")
            .bind(github_id)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    pub async fn list(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<Self>, UserError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users ORDER BY normalized_username ASC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(users)
    }

    pub async fn create<'e, E>(executor: E, data: &CreateUser) -> Result<Self, UserError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, User>(
            r#"INSERT INTO users (
                   system_type_id, username, normalized_username, email, normalized_email,
                   password_hash, password_salt, display_name, github_id,
                   signup_route, signup_status, joining_purpose, supporting_documents_path,
                   is_admin_seeded, default_password_issued_at, profile_json, created_by,
                   created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $18)
               RETURNING *"#,
        )
        .bind(data.system_type_id)
        .bind(data.username.trim())
        .bind(Self::normalize(&data.username))
        .bind(data.email.trim())
        .bind(Self::normalize(&data.email))
        .bind(&data.password_hash)
        .bind(&data.password_salt)
        .bind(&data.display_name)
        .bind(data.github_id)
        .bind(data.signup_route)
        .bind(data.signup_status)
        .bind(&data.joining_purpose)
        .bind(&data.supporting_documents_path)
        .bind(data.is_admin_seeded)
        .bind(data.default_password_issued_at)
        .bind(&data.profile_json)
        .bind(data.created_by)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return UserError::Conflict(format!(
                    "Username '{}' or email '{}' is already registered",
                    data.username, data.email
                ));
            }
            UserError::from(e)
        })
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        data: &UpdateUser,
    ) -> Result<Self, UserError> {
        let normalized_email = data.email.as_deref().map(Self::normalize);

        let updated = sqlx::query_as::<_, User>(
            r#"UPDATE users
               SET email            = COALESCE($2, email),
                   normalized_email = COALESCE($3, normalized_email),
                   display_name     = COALESCE($4, display_name),
                   is_active        = COALESCE($5, is_active),
                   verified         = COALESCE($6, verified),
                   signup_status    = COALESCE($7, signup_status),
                   github_id        = COALESCE($8, github_id),
                   profile_json     = COALESCE($9, profile_json),
                   version          = version + 1,
                   updated_at       = $10
               WHERE id = $1
                 AND version = COALESCE($11, version)
               RETURNING *"#,
        )
        .bind(id)
        .bind(data.email.as_deref().map(str::trim))
        .bind(normalized_email)
        .bind(&data.display_name)
        .bind(data.is_active)
        .bind(data.verified)
        .bind(data.signup_status)
        .bind(data.github_id)
        .bind(&data.profile_json)
        .bind(Utc::now())
        .bind(data.version)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return UserError::Conflict("Email is already registered".to_string());
            }
            UserError::from(e)
        })?;

        match updated {
            Some(user) => Ok(user),
            None if row_exists(&mut *conn, "users", id).await? => Err(UserError::VersionMismatch),
            None => Err(UserError::NotFound),
        }
    }

    pub async fn record_login(pool: &SqlitePool, id: i64) -> Result<(), UserError> {
        let result = sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(UserError::NotFound);
        }
        Ok(())
    }
}
