//! Pool setup checks: every pooled connection gets the same pragmas, and a
//! freshly opened database has the full schema.

use db::DBService;
use tempfile::TempDir;

async fn open_service() -> (DBService, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let service = DBService::open(&temp_dir.path().join("nested").join("db.sqlite"))
        .await
        .expect("Failed to open database");
    (service, temp_dir)
}

#[tokio::test]
async fn pool_uses_wal_and_enforces_foreign_keys() {
    let (service, _dir) = open_service().await;

    let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&service.pool)
        .await
        .unwrap();
    assert_eq!(journal_mode.to_lowercase(), "wal");

    let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&service.pool)
        .await
        .unwrap();
    assert_eq!(foreign_keys, 1);

    // 1 = NORMAL
    let synchronous: i64 = sqlx::query_scalar("PRAGMA synchronous")
        .fetch_one(&service.pool)
        .await
        .unwrap();
    assert_eq!(synchronous, 1);

    let temp_store: i64 = sqlx::query_scalar("PRAGMA temp_store")
        .fetch_one(&service.pool)
        .await
        .unwrap();
    assert_eq!(temp_store, 2);
}

#[tokio::test]
async fn pragmas_hold_on_every_pooled_connection() {
    let (service, _dir) = open_service().await;

    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(service.pool.acquire().await.unwrap());
    }
    for conn in held.iter_mut() {
        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut **conn)
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }
}

#[tokio::test]
async fn schema_is_migrated_and_integrity_checks_pass() {
    let (service, _dir) = open_service().await;

    for table in [
        "users",
        "workspaces",
        "workspace_members",
        "projects",
        "project_members",
        "project_tasks",
        "kanban_boards",
        "kanban_columns",
        "kanban_cards",
        "chat_rooms",
        "chat_messages",
        "audit_events",
    ] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = $1)",
        )
        .bind(table)
        .fetch_one(&service.pool)
        .await
        .unwrap();
        assert!(exists, "missing table {table}");
    }

    db::check_database_integrity(&service.pool).await.unwrap();
    service.shutdown().await;
}

#[tokio::test]
async fn reopening_an_existing_database_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("db.sqlite");

    let first = DBService::open(&path).await.unwrap();
    sqlx::query(
        "INSERT INTO users (username, normalized_username, email, normalized_email, created_at, updated_at)
         VALUES ('ada', 'ADA', 'ada@example.com', 'ADA@EXAMPLE.COM', datetime('now'), datetime('now'))",
    )
    .execute(&first.pool)
    .await
    .unwrap();
    first.shutdown().await;

    let second = DBService::open(&path).await.unwrap();
    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&second.pool)
        .await
        .unwrap();
    assert_eq!(users, 1);
}
