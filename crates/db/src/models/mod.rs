//! Database models for ProjectsPlus.
//!
//! Every mutable row carries `version`, `created_at` and `updated_at`. Updates
//! go through optimistic locking: the caller passes the version it last read and
//! the write only lands while that version is still current.
//!
//! Audit rows live in [`audit_event`] and are written through
//! [`crate::audit::AuditWriter`], never through the repositories here.

pub mod audit_event;
pub mod chat;
pub mod file_record;
pub mod github_project_link;
pub mod github_user_link;
pub mod grant;
pub mod group;
pub mod kanban;
pub mod project;
pub mod project_task;
pub mod system_type;
pub mod user;
pub mod workspace;

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, Type};
use strum_macros::{Display, EnumString};

/// Visibility shared by workspaces and projects.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, Display, EnumString, Default,
)]
#[repr(i32)]
pub enum Visibility {
    #[default]
    Private = 0,
    Public = 1,
}

/// True when the error is a UNIQUE or PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// True when the error is a FOREIGN KEY constraint violation.
pub(crate) fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

/// Distinguishes "row is gone" from "row moved on" after a version-checked
/// update matched nothing.
pub(crate) async fn row_exists(
    conn: &mut SqliteConnection,
    table: &'static str,
    id: i64,
) -> Result<bool, sqlx::Error> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = $1)");
    sqlx::query_scalar::<_, bool>(&sql)
        .bind(id)
        .fetch_one(conn)
        .await
}

/// Renders `Option` values the way log lines expect: the value or `n/a`.
pub(crate) struct OrNa<'a, T>(pub &'a Option<T>);

impl<T: std::fmt::Display> std::fmt::Display for OrNa<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("n/a"),
        }
    }
}
