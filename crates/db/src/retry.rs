//! Retry policies for database writes.
//!
//! Two shapes are in use: exponential backoff with jitter for transient SQLite
//! lock contention (SQLITE_BUSY / SQLITE_LOCKED) on multi-statement writes, and
//! a fixed-delay policy for best-effort audit writes.

use std::future::Future;
use std::time::Duration;

use sqlx::Error as SqlxError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    Exponential,
    Fixed,
}

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (caps the exponential growth).
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0) to add randomness to delays.
    pub jitter_factor: f64,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 50,
            max_delay_ms: 2000,
            jitter_factor: 0.2,
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            jitter_factor: 0.2,
            backoff: Backoff::Exponential,
        }
    }

    /// `max_attempts` tries in total with the same pause between each.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let delay_ms = delay.as_millis() as u64;
        Self {
            max_retries: max_attempts.saturating_sub(1),
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            jitter_factor: 0.0,
            backoff: Backoff::Fixed,
        }
    }

    /// Total number of attempts, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay to wait after the failed attempt numbered `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped_delay = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt))
                .min(self.max_delay_ms),
        };

        let jitter = if self.jitter_factor > 0.0 {
            let jitter_range = (capped_delay as f64 * self.jitter_factor) as u64;
            if jitter_range > 0 {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .subsec_nanos() as u64;
                now % jitter_range
            } else {
                0
            }
        } else {
            0
        };

        Duration::from_millis(capped_delay + jitter)
    }
}

/// Check if an error is a transient SQLite error that should be retried.
///
/// SQLite error codes considered retryable:
/// - 5 = SQLITE_BUSY
/// - 6 = SQLITE_LOCKED
/// - 10 = SQLITE_IOERR and its extended codes (`code & 0xFF == 10`)
pub fn is_retryable_error(e: &SqlxError) -> bool {
    let SqlxError::Database(db_err) = e else {
        return false;
    };
    let Some(code) = db_err.code() else {
        return false;
    };
    let code_str = code.as_ref();
    if matches!(code_str, "5" | "6" | "10") {
        return true;
    }
    code_str
        .parse::<u32>()
        .is_ok_and(|code_num| code_num > 10 && (code_num & 0xFF) == 10)
}

/// Execute a database operation, retrying transient SQLite errors.
///
/// ```ignore
/// use db::retry::{RetryConfig, with_retry};
///
/// let result = with_retry(&RetryConfig::default(), "reorder_columns", || async {
///     let mut tx = pool.begin().await?;
///     // ...
///     tx.commit().await
/// }).await?;
/// ```
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, SqlxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SqlxError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_retryable_error(&e) && attempt < config.max_retries => {
                let delay = config.delay_for(attempt);

                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = ?e,
                    "Transient SQLite error (BUSY/LOCKED/IOERR), retrying with backoff"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt > 0 {
                    tracing::error!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = ?e,
                        "Database operation failed after all retries"
                    );
                }
                return Err(e);
            }
        }
    }
}
