use std::{path::Path, str::FromStr, time::Duration};

use sqlx::{
    Error, Executor, Pool, Sqlite,
    sqlite::{
        SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
        SqliteSynchronous,
    },
};
use tracing::{error, info};
use utils::assets::database_path;

pub mod audit;
pub mod models;
pub mod retry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use audit::{
    AuditError, AuditQueryRepository, AuditWriter, AuthenticationAudit, AuthorizationAudit,
};
pub use retry::{RetryConfig, is_retryable_error, with_retry};

// ============================================================================
// Connection Pool Configuration
// ============================================================================

/// Default maximum connections in the pool.
/// SQLite benefits from limited connections due to single-writer model.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Minimum idle connections to maintain.
const DEFAULT_MIN_CONNECTIONS: u32 = 2;

/// Connection acquisition timeout in seconds.
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Idle connection timeout in seconds (10 minutes).
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Get max connections from environment or use default.
fn get_max_connections() -> u32 {
    std::env::var("PP_SQLITE_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|&n| n > 0 && n <= 100)
        .unwrap_or(DEFAULT_MAX_CONNECTIONS)
}

/// Pragmas applied to every new pooled connection via `after_connect`.
///
/// `synchronous` is set after `mmap_size` so mmap'ed writes keep their fsync
/// guarantees.
async fn apply_connection_pragmas(conn: &mut SqliteConnection) -> Result<(), Error> {
    conn.execute("PRAGMA temp_store = 2").await?;

    #[cfg(debug_assertions)]
    conn.execute("PRAGMA mmap_size = 67108864").await?; // 64MB

    #[cfg(not(debug_assertions))]
    conn.execute("PRAGMA mmap_size = 268435456").await?; // 256MB

    conn.execute("PRAGMA synchronous = NORMAL").await?;
    conn.execute("PRAGMA cache_size = -64000").await?;
    conn.execute("PRAGMA foreign_keys = ON").await?;

    Ok(())
}

/// Run `PRAGMA quick_check` and fail when SQLite reports anything but `ok`.
pub async fn check_database_integrity(pool: &Pool<Sqlite>) -> Result<(), Error> {
    let result: String = sqlx::query_scalar("PRAGMA quick_check")
        .fetch_one(pool)
        .await?;

    if result != "ok" {
        return Err(Error::Protocol(format!(
            "Database integrity check failed: {}",
            result
        )));
    }

    Ok(())
}

#[derive(Clone)]
pub struct DBService {
    pub pool: Pool<Sqlite>,
}

impl DBService {
    /// Open the database at [`database_path`], verify it, and apply pending migrations.
    pub async fn new() -> Result<DBService, Error> {
        Self::open(&database_path()).await
    }

    pub async fn open(db_path: &Path) -> Result<DBService, Error> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }

        let database_url = format!("sqlite://{}", db_path.to_string_lossy());
        let max_connections = get_max_connections();

        info!(
            path = %db_path.display(),
            max_connections = max_connections,
            min_connections = DEFAULT_MIN_CONNECTIONS,
            "Initializing SQLite connection pool"
        );

        let options = SqliteConnectOptions::from_str(&database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(DEFAULT_MIN_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
            .idle_timeout(Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)))
            .after_connect(|conn, _meta| {
                Box::pin(async move { apply_connection_pragmas(conn).await })
            })
            .connect_with(options)
            .await?;

        match check_database_integrity(&pool).await {
            Ok(()) => info!("Database integrity check passed"),
            Err(e) => {
                error!(error = %e, "DATABASE CORRUPTION DETECTED");
                return Err(e);
            }
        }

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(DBService { pool })
    }

    /// Wrap an existing pool. Migrations are assumed to be applied.
    pub fn from_pool(pool: Pool<Sqlite>) -> DBService {
        DBService { pool }
    }

    /// Flush the WAL into the main database file and close the pool.
    pub async fn shutdown(&self) {
        info!("Running final WAL checkpoint...");
        match sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
        {
            Ok(_) => info!("Final WAL checkpoint completed"),
            Err(e) => tracing::warn!("Final WAL checkpoint failed (data may still be in WAL): {}", e),
        }

        self.pool.close().await;
        info!("Database connection pool closed");
    }
}
