//! Console logging plus an optional daily-rotating JSON log file.
//!
//! # Configuration
//!
//! - `PP_FILE_LOGGING`: "true" or "1" turns the file layer on
//! - `PP_LOG_DIR`: log directory, defaults to `{asset_dir}/logs`
//! - `PP_LOG_MAX_FILES`: daily files to keep (default 7)
//!
//! Each file line is one JSON object:
//! ```json
//! {"timestamp":"2026-01-05T10:30:00Z","level":"INFO","target":"server","message":"..."}
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};
use utils::assets::log_dir;

const LOG_FILE_PREFIX: &str = "projectsplus.log";
const DEFAULT_MAX_FILES: usize = 7;

#[derive(Debug, Clone)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub log_dir: PathBuf,
    /// Daily files retained after pruning
    pub max_files: usize,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        let enabled = std::env::var("PP_FILE_LOGGING")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let log_dir = std::env::var("PP_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| log_dir());

        let max_files = std::env::var("PP_LOG_MAX_FILES")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_FILES);

        Self {
            enabled,
            log_dir,
            max_files,
        }
    }
}

/// Directives for our crates at `log_level`, everything else at `warn`.
fn filter_directives(log_level: &str) -> String {
    format!(
        "warn,server={level},db={level},utils={level}",
        level = log_level
    )
}

fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(filter_directives(log_level)).unwrap_or_else(|e| {
        eprintln!("Invalid log level '{log_level}' ({e}), falling back to info");
        EnvFilter::new(filter_directives("info"))
    })
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer when dropped, so hold it for
/// the lifetime of the process. `None` when file logging is off.
pub fn init_logging(log_level: &str) -> Option<WorkerGuard> {
    let config = FileLoggingConfig::default();
    let console_layer = tracing_subscriber::fmt::layer().with_filter(build_filter(log_level));

    if !config.enabled {
        tracing_subscriber::registry().with(console_layer).init();
        return None;
    }

    if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!("Failed to create log directory {:?}: {}", config.log_dir, e);
        tracing_subscriber::registry().with(console_layer).init();
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(build_filter(log_level));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(
        log_dir = ?config.log_dir,
        max_files = config.max_files,
        "File logging enabled"
    );

    let log_dir = config.log_dir.clone();
    let max_files = config.max_files;
    std::thread::spawn(move || {
        cleanup_old_logs(&log_dir, max_files);
    });

    Some(guard)
}

/// Keeps the newest `max_files` log files and deletes the rest.
fn cleanup_old_logs(log_dir: &Path, max_files: usize) -> usize {
    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut log_files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX))
        })
        .filter_map(|e| {
            e.metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(|t| (e.path(), t))
        })
        .collect();

    // newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in log_files.into_iter().skip(max_files) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                tracing::debug!(path = ?path, "Removed old log file");
            }
            Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to remove old log file"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use std::{
        fs::{self, File},
        time::{Duration, SystemTime},
    };

    use super::*;

    #[test]
    fn filter_scopes_our_crates() {
        assert_eq!(
            filter_directives("debug"),
            "warn,server=debug,db=debug,utils=debug"
        );
    }

    #[test]
    fn cleanup_keeps_newest_log_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        for day in 0..4u64 {
            let path = dir.path().join(format!("{LOG_FILE_PREFIX}.2026-01-0{}", day + 1));
            let file = File::create(&path).unwrap();
            file.set_modified(now - Duration::from_secs(86_400 * (4 - day)))
                .unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 2), 2);

        let mut remaining: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                format!("{LOG_FILE_PREFIX}.2026-01-03"),
                format!("{LOG_FILE_PREFIX}.2026-01-04"),
                "unrelated.txt".to_string(),
            ]
        );
    }
}
