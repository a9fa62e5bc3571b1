use axum::{extract::State, response::Json as ResponseJson};
use serde::Serialize;
use utils::{build_info::BUILD_INFO, response::ApiResponse};

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub git_commit: &'static str,
    pub build_timestamp: &'static str,
    pub database_ready: bool,
}

pub async fn health_check(State(state): State<AppState>) -> ResponseJson<ApiResponse<HealthResponse>> {
    // Quick database connectivity check
    let database_ready = sqlx::query("SELECT 1")
        .fetch_one(&state.db().pool)
        .await
        .is_ok();

    ResponseJson(ApiResponse::success(HealthResponse {
        status: if database_ready { "ok" } else { "degraded" },
        version: BUILD_INFO.version,
        git_commit: BUILD_INFO.git_commit,
        build_timestamp: BUILD_INFO.build_timestamp,
        database_ready,
    }))
}
