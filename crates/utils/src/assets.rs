use std::path::PathBuf;

use directories::ProjectDirs;

const PROJECT_ROOT: &str = env!("CARGO_MANIFEST_DIR");

fn expand_tilde(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Root directory for the database, logs and other runtime files.
///
/// Respects `PP_ASSET_DIR`. Debug builds default to `dev_assets/` at the
/// workspace root, release builds to the platform data directory.
pub fn asset_dir() -> PathBuf {
    if let Ok(path) = std::env::var("PP_ASSET_DIR") {
        return expand_tilde(&path);
    }

    if cfg!(debug_assertions) {
        PathBuf::from(PROJECT_ROOT).join("../../dev_assets")
    } else {
        ProjectDirs::from("io", "projectsplus", "projectsplus")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".projectsplus"))
    }
    // ✔ macOS → ~/Library/Application Support/io.projectsplus.projectsplus
    // ✔ Linux → ~/.local/share/projectsplus   (respects XDG_DATA_HOME)
    // ✔ Windows → %APPDATA%\projectsplus\projectsplus
}

/// Get the database file path.
///
/// Respects the `PP_DATABASE_PATH` environment variable for custom locations.
/// Supports tilde expansion (e.g., `~/projectsplus/db.sqlite`).
///
/// Default: `{asset_dir}/db.sqlite`
pub fn database_path() -> PathBuf {
    if let Ok(path) = std::env::var("PP_DATABASE_PATH") {
        return expand_tilde(&path);
    }
    asset_dir().join("db.sqlite")
}

/// Default directory for rolling log files: `{asset_dir}/logs`
pub fn log_dir() -> PathBuf {
    asset_dir().join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_database_path_default() {
        // SAFETY: Tests run serially via #[serial] attribute
        unsafe { env::remove_var("PP_DATABASE_PATH") };
        let path = database_path();
        assert!(path.ends_with("db.sqlite"));
    }

    #[test]
    #[serial]
    fn test_database_path_env_override() {
        // SAFETY: Tests run serially via #[serial] attribute
        unsafe { env::set_var("PP_DATABASE_PATH", "/custom/path/test.db") };
        let path = database_path();
        unsafe { env::remove_var("PP_DATABASE_PATH") };
        assert_eq!(path, PathBuf::from("/custom/path/test.db"));
    }

    #[test]
    #[serial]
    fn test_database_path_tilde_expansion() {
        // SAFETY: Tests run serially via #[serial] attribute
        unsafe { env::set_var("PP_DATABASE_PATH", "~/projectsplus/db.sqlite") };
        let path = database_path();
        unsafe { env::remove_var("PP_DATABASE_PATH") };
        assert!(!path.to_string_lossy().contains('~'));
    }

    #[test]
    #[serial]
    fn test_asset_dir_env_override() {
        let temp = tempfile::tempdir().unwrap();
        let custom = temp.path().join("assets");
        // SAFETY: Tests run serially via #[serial] attribute
        unsafe { env::set_var("PP_ASSET_DIR", custom.to_str().unwrap()) };
        let dir = asset_dir();
        let logs = log_dir();
        unsafe { env::remove_var("PP_ASSET_DIR") };
        assert_eq!(dir, custom);
        assert_eq!(logs, custom.join("logs"));
    }
}
