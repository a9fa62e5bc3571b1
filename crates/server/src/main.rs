use std::net::SocketAddr;

use anyhow::{self, Error as AnyhowError};
use db::DBService;
use server::{AppState, file_logging, routes};
use sqlx::Error as SqlxError;
use thiserror::Error;
use utils::assets::asset_dir;

const DEFAULT_PORT: u16 = 5150;

#[derive(Debug, Error)]
pub enum ProjectsPlusError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] SqlxError),
    #[error(transparent)]
    Other(#[from] AnyhowError),
}

#[tokio::main]
async fn main() -> Result<(), ProjectsPlusError> {
    // Load .env file if present (for development)
    dotenvy::dotenv().ok();

    // The guard flushes the file log on drop
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _file_log_guard = file_logging::init_logging(&log_level);

    if !asset_dir().exists() {
        std::fs::create_dir_all(asset_dir())?;
    }

    let db = DBService::new().await?;
    let state = AppState::new(db.clone());
    let app_router = routes::router(state);

    let port = std::env::var("BACKEND_PORT")
        .or_else(|_| std::env::var("PORT"))
        .ok()
        .map(|raw| {
            raw.trim()
                .parse::<u16>()
                .map_err(|e| anyhow::anyhow!("invalid port '{raw}': {e}"))
        })
        .transpose()?
        .unwrap_or(DEFAULT_PORT);

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    let actual_port = listener.local_addr()?.port();

    tracing::info!("Server running on http://{host}:{actual_port}");

    axum::serve(
        listener,
        app_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Flush the WAL only after the last request has finished
    db.shutdown().await;

    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
            } else {
                tracing::error!("Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }

    tracing::info!("Shutdown signal received");
}
