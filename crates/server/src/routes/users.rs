use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::user::{CreateUser, UpdateUser, User};
use serde::Deserialize;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

const DEFAULT_PAGE_LIMIT: i64 = 50;
const MAX_PAGE_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct UserListParams {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// GET /api/users
pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<UserListParams>,
) -> Result<ResponseJson<ApiResponse<Vec<User>>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);
    let users = User::list(&state.db().pool, limit, offset).await?;
    Ok(ResponseJson(ApiResponse::success(users)))
}

/// POST /api/users
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUser>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    let user = User::create(&state.db().pool, &payload).await?;
    tracing::info!(%user, "User created");
    Ok(ResponseJson(ApiResponse::success(user)))
}

/// GET /api/users/{user_id}
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    let user = User::find_by_id(&state.db().pool, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;
    Ok(ResponseJson(ApiResponse::success(user)))
}

/// PUT /api/users/{user_id}
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<UpdateUser>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    let mut conn = state.db().pool.acquire().await?;
    let user = User::update(&mut conn, user_id, &payload).await?;
    tracing::info!(%user, "User updated");
    Ok(ResponseJson(ApiResponse::success(user)))
}

pub fn router() -> Router<AppState> {
    let inner = Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/{user_id}", get(get_user).put(update_user));

    Router::new().nest("/users", inner)
}
