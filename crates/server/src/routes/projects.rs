use axum::{
    Extension, Json, Router,
    extract::State,
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::get,
};
use db::models::{
    project::{CreateProject, CreateProjectMember, Project, ProjectMember, UpdateProject},
    project_task::{CreateProjectTask, ProjectTask},
    workspace::Workspace,
};
use serde_json::json;
use utils::response::ApiResponse;

use crate::{
    AppState,
    error::ApiError,
    middleware::{AuditScope, load_project_middleware, load_workspace_middleware},
    routes::{PROJECT_AUDIT, audit_change},
};

pub async fn list_workspace_projects(
    State(state): State<AppState>,
    Extension(workspace): Extension<Workspace>,
) -> Result<ResponseJson<ApiResponse<Vec<Project>>>, ApiError> {
    let projects = Project::list_by_workspace(&state.db().pool, workspace.id).await?;
    Ok(ResponseJson(ApiResponse::success(projects)))
}

pub async fn create_project(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(workspace): Extension<Workspace>,
    Json(payload): Json<CreateProject>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let project = Project::create(&mut *tx, workspace.id, &payload).await?;
    audit_change(
        &state,
        &scope,
        &mut tx,
        PROJECT_AUDIT,
        "Project",
        project.id,
        json!({
            "action": "create",
            "workspaceId": workspace.id,
            "slug": project.slug,
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%project, correlation_id = %scope.correlation_id(), "Project created");
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn get_project(
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn update_project(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(existing): Extension<Project>,
    Json(payload): Json<UpdateProject>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let project = Project::update(&mut *tx, existing.id, &payload).await?;
    audit_change(
        &state,
        &scope,
        &mut tx,
        PROJECT_AUDIT,
        "Project",
        project.id,
        json!({
            "action": "update",
            "fromVersion": existing.version,
            "toVersion": project.version,
            "status": project.status.to_string(),
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%project, "Project updated");
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let rows = Project::delete(&mut *tx, project.id).await?;
    if rows == 0 {
        return Err(ApiError::NotFound("project not found".to_string()));
    }
    audit_change(
        &state,
        &scope,
        &mut tx,
        PROJECT_AUDIT,
        "Project",
        project.id,
        json!({
            "action": "delete",
            "workspaceId": project.workspace_id,
            "slug": project.slug,
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%project, "Project deleted");
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<Vec<ProjectMember>>>, ApiError> {
    let members = ProjectMember::list_by_project(&state.db().pool, project.id).await?;
    Ok(ResponseJson(ApiResponse::success(members)))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(project): Extension<Project>,
    Json(payload): Json<CreateProjectMember>,
) -> Result<ResponseJson<ApiResponse<ProjectMember>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let member = ProjectMember::create(&mut *tx, project.id, &payload).await?;
    audit_change(
        &state,
        &scope,
        &mut tx,
        PROJECT_AUDIT,
        "ProjectMember",
        member.id,
        json!({
            "action": "addMember",
            "projectId": project.id,
            "userId": member.user_id,
            "role": member.role,
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%member, "Project member added");
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<Vec<ProjectTask>>>, ApiError> {
    let tasks = ProjectTask::list_by_project(&state.db().pool, project.id).await?;
    Ok(ResponseJson(ApiResponse::success(tasks)))
}

pub async fn create_task(
    State(state): State<AppState>,
    Extension(scope): Extension<AuditScope>,
    Extension(project): Extension<Project>,
    Json(payload): Json<CreateProjectTask>,
) -> Result<ResponseJson<ApiResponse<ProjectTask>>, ApiError> {
    let mut tx = state.db().pool.begin().await?;
    let task = ProjectTask::create(&mut *tx, project.id, &payload).await?;
    audit_change(
        &state,
        &scope,
        &mut tx,
        PROJECT_AUDIT,
        "ProjectTask",
        task.id,
        json!({
            "action": "createTask",
            "projectId": project.id,
            "title": task.title,
        }),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(%task, "Project task created");
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub fn router(state: &AppState) -> Router<AppState> {
    let workspace_projects = Router::new()
        .route(
            "/workspaces/{workspace_id}/projects",
            get(list_workspace_projects).post(create_project),
        )
        .layer(from_fn_with_state(state.clone(), load_workspace_middleware));

    let project_router = Router::new()
        .route(
            "/",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/members", get(list_members).post(add_member))
        .route("/tasks", get(list_tasks).post(create_task))
        .layer(from_fn_with_state(state.clone(), load_project_middleware));

    Router::new()
        .merge(workspace_projects)
        .nest("/projects/{project_id}", project_router)
}
