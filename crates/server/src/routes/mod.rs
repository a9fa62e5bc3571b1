use axum::{Router, middleware::from_fn, routing::get};
use sqlx::SqliteConnection;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    AppState,
    error::ApiError,
    middleware::{AuditScope, audit_scope_middleware},
};

pub mod audit;
pub mod chat;
pub mod health;
pub mod kanban;
pub mod projects;
pub mod users;
pub mod workspaces;

pub const WORKSPACE_AUDIT: &str = "WorkspaceAudit";
pub const PROJECT_AUDIT: &str = "ProjectAudit";
pub const KANBAN_AUDIT: &str = "KanbanAudit";

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health::health_check))
        .merge(users::router())
        .merge(workspaces::router(&state))
        .merge(projects::router(&state))
        .merge(kanban::router(&state))
        .merge(chat::router(&state))
        .merge(audit::router())
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(from_fn(audit_scope_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Records a domain audit event on the caller's transaction, so the event
/// commits or rolls back together with the change it describes.
pub(crate) async fn audit_change(
    state: &AppState,
    scope: &AuditScope,
    conn: &mut SqliteConnection,
    event_type: &str,
    target_type: &str,
    target_id: i64,
    payload: serde_json::Value,
) -> Result<i64, ApiError> {
    let event = scope
        .event(event_type)
        .target(target_type, Some(target_id))
        .payload(&payload);
    let id = state.audit().write_in_transaction(&event, conn).await?;
    Ok(id)
}
