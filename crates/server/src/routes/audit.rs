//! Read-only access to the audit log.

use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use chrono::{DateTime, Utc};
use db::{
    audit::{AuditQueryFilter, PagedResult, PagingOptions},
    models::audit_event::{AuditEvent, AuditEventSummary},
};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

/// Query string accepted by the listing endpoints: every filter field plus
/// paging. `sort` is `asc` or `desc` (the default).
#[derive(Debug, Default, Deserialize)]
pub struct AuditEventQuery {
    pub correlation_id: Option<Uuid>,
    pub actor_id: Option<i64>,
    pub event_type: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<i64>,
    pub system_type_id: Option<i64>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
    pub text_search: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort: Option<String>,
}

impl AuditEventQuery {
    fn filter(&self) -> AuditQueryFilter {
        AuditQueryFilter {
            correlation_id: self.correlation_id,
            actor_id: self.actor_id,
            event_type: self.event_type.clone(),
            target_type: self.target_type.clone(),
            target_id: self.target_id,
            system_type_id: self.system_type_id,
            occurred_after: self.occurred_after,
            occurred_before: self.occurred_before,
            text_search: self.text_search.clone(),
        }
    }

    fn paging(&self) -> Result<PagingOptions, ApiError> {
        let defaults = PagingOptions::default();
        let sort_descending = match self.sort.as_deref().map(str::trim) {
            None | Some("") => defaults.sort_descending,
            Some(sort) if sort.eq_ignore_ascii_case("desc") => true,
            Some(sort) if sort.eq_ignore_ascii_case("asc") => false,
            Some(other) => {
                return Err(ApiError::BadRequest(format!(
                    "sort must be 'asc' or 'desc', got '{other}'"
                )));
            }
        };
        Ok(PagingOptions {
            page: self.page.unwrap_or(defaults.page),
            page_size: self.page_size.unwrap_or(defaults.page_size),
            sort_descending,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct EventDetailParams {
    #[serde(default)]
    pub include_payload: bool,
}

/// GET /api/audit/events
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<AuditEventQuery>,
) -> Result<ResponseJson<ApiResponse<PagedResult<AuditEventSummary>>>, ApiError> {
    let paging = query.paging()?;
    let page = state
        .audit_query()
        .query(Some(&query.filter()), &paging)
        .await?;
    Ok(ResponseJson(ApiResponse::success(page)))
}

/// GET /api/audit/events/{event_id}?include_payload=
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    Query(params): Query<EventDetailParams>,
) -> Result<ResponseJson<ApiResponse<AuditEvent>>, ApiError> {
    let event = state
        .audit_query()
        .get_by_id(event_id, params.include_payload)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("audit event {event_id} not found")))?;
    Ok(ResponseJson(ApiResponse::success(event)))
}

/// GET /api/audit/correlations/{correlation_id}
pub async fn trace_correlation(
    State(state): State<AppState>,
    Path(correlation_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<AuditEventSummary>>>, ApiError> {
    let events = state
        .audit_query()
        .query_by_correlation_id(correlation_id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(events)))
}

/// GET /api/audit/actors/{actor_id}
pub async fn list_actor_events(
    State(state): State<AppState>,
    Path(actor_id): Path<i64>,
    Query(query): Query<AuditEventQuery>,
) -> Result<ResponseJson<ApiResponse<PagedResult<AuditEventSummary>>>, ApiError> {
    let paging = query.paging()?;
    let page = state
        .audit_query()
        .query_by_actor(actor_id, Some(&query.filter()), &paging)
        .await?;
    Ok(ResponseJson(ApiResponse::success(page)))
}

/// GET /api/audit/count
pub async fn count_events(
    State(state): State<AppState>,
    Query(query): Query<AuditEventQuery>,
) -> Result<ResponseJson<ApiResponse<i64>>, ApiError> {
    let count = state.audit_query().count(Some(&query.filter())).await?;
    Ok(ResponseJson(ApiResponse::success(count)))
}

pub fn router() -> Router<AppState> {
    let inner = Router::new()
        .route("/events", get(list_events))
        .route("/events/{event_id}", get(get_event))
        .route("/correlations/{correlation_id}", get(trace_correlation))
        .route("/actors/{actor_id}", get(list_actor_events))
        .route("/count", get(count_events));

    Router::new().nest("/audit", inner)
}
