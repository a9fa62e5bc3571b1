use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{delete, get},
};
use db::models::workspace::{
    CreateWorkspace, CreateWorkspaceMember, UpdateWorkspace, Workspace, WorkspaceMember,
};
use serde_json::json;
use utils::response::ApiResponse;

use crate::{
    AppState,
    error::ApiError,
    middleware::{AuditScope, load_workspace_middleware},
    routes::{WORKSPACE_AUDIT, audit_change},
};

pub async fn list_workspaces(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<Workspace>>>, ApiError> {
    let workspaces = Workspace::list(&state.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(workspaces)))
}

pub async fn create_workspace(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Json(payload): Json<CreateWorkspace>,
) -> Result<ResponseJson<ApiResponse<Workspace>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let workspace = Workspace::create(&mut *tx, &payload).await?;
    audit_change(
        &state,
        &scope,
        &mut tx,
        WORKSPACE_AUDIT,
        "Workspace",
        workspace.id,
        json!({ "action": "create", "slug": workspace.slug }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%workspace, correlation_id = %scope.correlation_id(), "Workspace created");
    Ok(ResponseJson(ApiResponse::success(workspace)))
}

pub async fn get_workspace(
    Extension(workspace): Extension<Workspace>,
) -> Result<ResponseJson<ApiResponse<Workspace>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(workspace)))
}

pub async fn update_workspace(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(existing): Extension<Workspace>,
    Json(payload): Json<UpdateWorkspace>,
) -> Result<ResponseJson<ApiResponse<Workspace>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let workspace = Workspace::update(&mut *tx, existing.id, &payload).await?;
    audit_change(
        &state,
        &scope,
        &mut tx,
        WORKSPACE_AUDIT,
        "Workspace",
        workspace.id,
        json!({
            "action": "update",
            "fromVersion": existing.version,
            "toVersion": workspace.version,
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%workspace, "Workspace updated");
    Ok(ResponseJson(ApiResponse::success(workspace)))
}

pub async fn delete_workspace(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(workspace): Extension<Workspace>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let rows = Workspace::delete(&mut *tx, workspace.id).await?;
    if rows == 0 {
        return Err(ApiError::NotFound("workspace not found".to_string()));
    }
    audit_change(
        &state,
        &scope,
        &mut tx,
        WORKSPACE_AUDIT,
        "Workspace",
        workspace.id,
        json!({ "action": "delete", "slug": workspace.slug }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%workspace, "Workspace deleted");
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(workspace): Extension<Workspace>,
) -> Result<ResponseJson<ApiResponse<Vec<WorkspaceMember>>>, ApiError> {
    let members = WorkspaceMember::list_by_workspace(&state.db().pool, workspace.id).await?;
    Ok(ResponseJson(ApiResponse::success(members)))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(workspace): Extension<Workspace>,
    Json(payload): Json<CreateWorkspaceMember>,
) -> Result<ResponseJson<ApiResponse<WorkspaceMember>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let member = WorkspaceMember::create(&mut *tx, workspace.id, &payload).await?;
    audit_change(
        &state,
        &scope,
        &mut tx,
        WORKSPACE_AUDIT,
        "WorkspaceMember",
        member.id,
        json!({
            "action": "addMember",
            "workspaceId": workspace.id,
            "userId": member.user_id,
            "role": member.role,
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%member, "Workspace member added");
    Ok(ResponseJson(ApiResponse::success(member)))
}

/// Soft removal: the membership row stays with `removed_at` set.
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(workspace): Extension<Workspace>,
    Path((_, member_id)): Path<(i64, i64)>,
) -> Result<ResponseJson<ApiResponse<WorkspaceMember>>, ApiError> {
    let existing = WorkspaceMember::find_by_id(&state.db().pool, member_id)
        .await?
        .filter(|member| member.workspace_id == workspace.id)
        .ok_or_else(|| ApiError::NotFound("workspace member not found".to_string()))?;

    let mut tx = state.db().pool.begin().await?;
    let member = WorkspaceMember::soft_remove(&mut *tx, existing.id).await?;
    audit_change(
        &state,
        &scope,
        &mut tx,
        WORKSPACE_AUDIT,
        "WorkspaceMember",
        member.id,
        json!({
            "action": "removeMember",
            "workspaceId": workspace.id,
            "userId": member.user_id,
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%member, "Workspace member removed");
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub fn router(state: &AppState) -> Router<AppState> {
    let workspace_router = Router::new()
        .route(
            "/",
            get(get_workspace)
                .put(update_workspace)
                .delete(delete_workspace),
        )
        .route("/members", get(list_members).post(add_member))
        .route("/members/{member_id}", delete(remove_member))
        .layer(from_fn_with_state(state.clone(), load_workspace_middleware));

    let inner = Router::new()
        .route("/", get(list_workspaces).post(create_workspace))
        .nest("/{workspace_id}", workspace_router);

    Router::new().nest("/workspaces", inner)
}
