//! Middleware that loads the row named by a path parameter and stores it in
//! request extensions, so handlers can take `Extension<T>` instead of looking
//! it up themselves.
//!
//! Parameters are read by name, which lets the same loader sit on routes that
//! carry additional path segments such as `/{workspace_id}/members/{member_id}`.

use std::collections::HashMap;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use db::models::{
    chat::ChatRoom,
    kanban::{KanbanBoard, KanbanColumn},
    project::Project,
    workspace::Workspace,
};

use crate::AppState;

fn path_id(params: &HashMap<String, String>, key: &str) -> Result<i64, StatusCode> {
    params
        .get(key)
        .and_then(|raw| raw.parse::<i64>().ok())
        .ok_or(StatusCode::BAD_REQUEST)
}

/// Shared body of every loader: look the row up, 404 when absent, 500 on a
/// database error, otherwise insert it and continue.
macro_rules! load_into_extensions {
    ($name:ident, $model:ty, $key:literal, $label:literal) => {
        pub async fn $name(
            State(state): State<AppState>,
            Path(params): Path<HashMap<String, String>>,
            mut request: Request,
            next: Next,
        ) -> Result<Response, StatusCode> {
            let id = path_id(&params, $key)?;
            let row = match <$model>::find_by_id(&state.db().pool, id).await {
                Ok(Some(row)) => row,
                Ok(None) => {
                    tracing::warn!(id, "{} not found", $label);
                    return Err(StatusCode::NOT_FOUND);
                }
                Err(e) => {
                    tracing::error!(id, error = %e, "Failed to fetch {}", $label);
                    return Err(StatusCode::INTERNAL_SERVER_ERROR);
                }
            };

            request.extensions_mut().insert(row);
            Ok(next.run(request).await)
        }
    };
}

load_into_extensions!(load_workspace_middleware, Workspace, "workspace_id", "Workspace");
load_into_extensions!(load_project_middleware, Project, "project_id", "Project");
load_into_extensions!(load_board_middleware, KanbanBoard, "board_id", "Board");
load_into_extensions!(load_column_middleware, KanbanColumn, "column_id", "Column");
load_into_extensions!(load_room_middleware, ChatRoom, "room_id", "Chat room");
