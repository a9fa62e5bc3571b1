//! Test utilities for database tests.
//!
//! Pool creation copies a migrated template database, and the `seed_*`
//! helpers insert the minimal parent rows most fixtures need.

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::OnceCell;

use crate::models::{
    project::{CreateProject, Project},
    user::{CreateUser, User},
    workspace::{CreateWorkspace, Workspace},
};

/// Shared template database for faster test setup.
/// The template has migrations already applied.
static TEMPLATE_DIR: OnceLock<TempDir> = OnceLock::new();
static TEMPLATE_READY: OnceCell<()> = OnceCell::const_new();

/// Get or create the template database directory.
/// This creates a database with migrations applied that can be copied for tests.
fn get_template_dir() -> &'static TempDir {
    TEMPLATE_DIR.get_or_init(|| TempDir::new().expect("Failed to create template temp dir"))
}

/// Ensure the template database is ready (migrations applied).
async fn ensure_template_ready() {
    TEMPLATE_READY
        .get_or_init(|| async {
            let template_path = get_template_dir().path().join("template.db");

            let options =
                SqliteConnectOptions::from_str(&format!("sqlite://{}", template_path.display()))
                    .expect("Invalid template database URL")
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal);

            let pool = SqlitePoolOptions::new()
                .min_connections(0)
                .max_connections(1)
                .connect_with(options)
                .await
                .expect("Failed to create template pool");

            // Run migrations on template
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations on template");

            // Close the pool to release the file
            pool.close().await;

            tracing::debug!("Template database ready at {:?}", template_path);
        })
        .await;
}

/// Create a test database pool with migrations applied.
///
/// This uses a template database approach for speed:
/// 1. First test creates a template database with migrations
/// 2. Subsequent tests copy the template file (much faster than re-running migrations)
///
/// Returns the pool and a TempDir that must be kept alive for the duration of the test.
pub async fn create_test_pool() -> (SqlitePool, TempDir) {
    // Ensure template is ready
    ensure_template_ready().await;

    // Create a temp dir for this test
    let temp_dir = TempDir::new().expect("Failed to create test temp dir");
    let db_path = temp_dir.path().join("test.db");

    // Copy template database to test location
    let template_path = get_template_dir().path().join("template.db");
    std::fs::copy(&template_path, &db_path).expect("Failed to copy template database");

    // Also copy WAL and SHM files if they exist (they shouldn't after pool.close())
    let wal_path = template_path.with_extension("db-wal");
    let shm_path = template_path.with_extension("db-shm");
    if wal_path.exists() {
        let _ = std::fs::copy(&wal_path, db_path.with_extension("db-wal"));
    }
    if shm_path.exists() {
        let _ = std::fs::copy(&shm_path, db_path.with_extension("db-shm"));
    }

    // Create pool for the copied database
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))
        .expect("Invalid test database URL")
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .expect("Failed to create test pool");

    (pool, temp_dir)
}

/// Insert an active user named `username` with a derived email.
pub async fn seed_user(pool: &SqlitePool, username: &str) -> User {
    User::create(
        pool,
        &CreateUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            ..Default::default()
        },
    )
    .await
    .expect("Failed to seed user")
}

pub async fn seed_workspace(pool: &SqlitePool, owner_user_id: i64, slug: &str) -> Workspace {
    Workspace::create(
        pool,
        &CreateWorkspace {
            name: slug.to_string(),
            slug: slug.to_string(),
            owner_user_id,
            ..Default::default()
        },
    )
    .await
    .expect("Failed to seed workspace")
}

pub async fn seed_project(
    pool: &SqlitePool,
    workspace_id: i64,
    owner_user_id: i64,
    slug: &str,
) -> Project {
    Project::create(
        pool,
        workspace_id,
        &CreateProject {
            name: slug.to_string(),
            slug: slug.to_string(),
            owner_user_id,
            ..Default::default()
        },
    )
    .await
    .expect("Failed to seed project")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_pool() {
        let (pool, _temp_dir) = create_test_pool().await;

        // Verify the pool works and has tables
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_events")
            .fetch_one(&pool)
            .await
            .expect("Failed to query audit_events table");

        assert_eq!(result.0, 0); // Empty table
    }

    #[tokio::test]
    async fn test_template_reuse() {
        // Create two pools to verify template reuse works
        let (pool1, _temp1) = create_test_pool().await;
        let (pool2, _temp2) = create_test_pool().await;

        // Both should work
        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_events")
            .fetch_one(&pool1)
            .await
            .expect("Pool 1 should work");

        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_events")
            .fetch_one(&pool2)
            .await
            .expect("Pool 2 should work");
    }
}
