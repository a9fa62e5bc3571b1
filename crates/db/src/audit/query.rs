use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::AuditError;
use crate::models::audit_event::{AuditEvent, AuditEventSummary};

const DEFAULT_PAGE_SIZE: i64 = 25;
const MAX_PAGE_SIZE: i64 = 500;

const SUMMARY_COLUMNS: &str = "id, event_type, correlation_id, actor_id, target_id, target_type, \
     system_type_id, occurred_at, version, created_at";

/// Narrowing criteria for audit queries. Unset and blank fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQueryFilter {
    pub correlation_id: Option<Uuid>,
    pub actor_id: Option<i64>,
    pub event_type: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<i64>,
    pub system_type_id: Option<i64>,
    /// Inclusive lower bound on `occurred_at`
    pub occurred_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `occurred_at`
    pub occurred_before: Option<DateTime<Utc>>,
    /// Case-sensitive substring of `event_type` or `target_type`
    pub text_search: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PagingOptions {
    pub page: i64,
    pub page_size: i64,
    pub sort_descending: bool,
}

impl Default for PagingOptions {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_descending: true,
        }
    }
}

impl PagingOptions {
    /// Page clamped to at least 1, page size defaulted and capped.
    pub fn normalized(&self) -> Self {
        let page = self.page.max(1);
        let page_size = if self.page_size < 1 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size.min(MAX_PAGE_SIZE)
        };
        Self {
            page,
            page_size,
            sort_descending: self.sort_descending,
        }
    }

    fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> PagedResult<T> {
    pub fn empty(page: i64, page_size: i64) -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            page,
            page_size,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Appends one `AND ...` clause per set filter field. The builder must already
/// end in a `WHERE` clause.
fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &AuditQueryFilter) {
    if let Some(correlation_id) = filter.correlation_id {
        builder.push(" AND correlation_id = ").push_bind(correlation_id);
    }
    if let Some(actor_id) = filter.actor_id {
        builder.push(" AND actor_id = ").push_bind(actor_id);
    }
    if let Some(event_type) = non_blank(&filter.event_type) {
        builder
            .push(" AND event_type = ")
            .push_bind(event_type.to_string());
    }
    if let Some(target_type) = non_blank(&filter.target_type) {
        builder
            .push(" AND target_type = ")
            .push_bind(target_type.to_string());
    }
    if let Some(target_id) = filter.target_id {
        builder.push(" AND target_id = ").push_bind(target_id);
    }
    if let Some(system_type_id) = filter.system_type_id {
        builder.push(" AND system_type_id = ").push_bind(system_type_id);
    }
    if let Some(after) = filter.occurred_after {
        builder.push(" AND occurred_at >= ").push_bind(after);
    }
    if let Some(before) = filter.occurred_before {
        builder.push(" AND occurred_at <= ").push_bind(before);
    }
    if let Some(text) = non_blank(&filter.text_search) {
        builder
            .push(" AND (instr(event_type, ")
            .push_bind(text.to_string())
            .push(") > 0 OR instr(COALESCE(target_type, ''), ")
            .push_bind(text.to_string())
            .push(") > 0)");
    }
}

/// Read-side access to the audit log.
#[derive(Clone)]
pub struct AuditQueryRepository {
    pool: SqlitePool,
}

impl AuditQueryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn query(
        &self,
        filter: Option<&AuditQueryFilter>,
        paging: &PagingOptions,
    ) -> Result<PagedResult<AuditEventSummary>, AuditError> {
        let paging = paging.normalized();
        let default_filter = AuditQueryFilter::default();
        let filter = filter.unwrap_or(&default_filter);

        let total_count = self.count(Some(filter)).await?;
        if total_count == 0 {
            return Ok(PagedResult::empty(paging.page, paging.page_size));
        }

        let direction = if paging.sort_descending { "DESC" } else { "ASC" };
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {SUMMARY_COLUMNS} FROM audit_events WHERE 1 = 1"
        ));
        push_filters(&mut builder, filter);
        builder
            .push(format!(" ORDER BY occurred_at {direction}, id {direction}"))
            .push(" LIMIT ")
            .push_bind(paging.page_size)
            .push(" OFFSET ")
            .push_bind(paging.offset());

        let items = builder
            .build_query_as::<AuditEventSummary>()
            .fetch_all(&self.pool)
            .await?;

        debug!(
            total_count,
            returned = items.len(),
            page = paging.page,
            page_size = paging.page_size,
            "Audit query"
        );

        Ok(PagedResult {
            items,
            total_count,
            page: paging.page,
            page_size: paging.page_size,
        })
    }

    /// The JSON columns are only read when `include_payload` is set.
    pub async fn get_by_id(
        &self,
        id: i64,
        include_payload: bool,
    ) -> Result<Option<AuditEvent>, AuditError> {
        let sql = if include_payload {
            "SELECT * FROM audit_events WHERE id = $1".to_string()
        } else {
            format!(
                "SELECT {SUMMARY_COLUMNS}, NULL AS payload_json, NULL AS metadata_json \
                 FROM audit_events WHERE id = $1"
            )
        };

        let event = sqlx::query_as::<_, AuditEvent>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    /// Every event of one request or workflow, oldest first.
    pub async fn query_by_correlation_id(
        &self,
        correlation_id: Uuid,
    ) -> Result<Vec<AuditEventSummary>, AuditError> {
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM audit_events WHERE correlation_id = $1 \
             ORDER BY occurred_at ASC, id ASC"
        );
        let events = sqlx::query_as::<_, AuditEventSummary>(&sql)
            .bind(correlation_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(events)
    }

    pub async fn query_by_actor(
        &self,
        actor_id: i64,
        filter: Option<&AuditQueryFilter>,
        paging: &PagingOptions,
    ) -> Result<PagedResult<AuditEventSummary>, AuditError> {
        let filter = AuditQueryFilter {
            actor_id: Some(actor_id),
            ..filter.cloned().unwrap_or_default()
        };
        self.query(Some(&filter), paging).await
    }

    pub async fn count(&self, filter: Option<&AuditQueryFilter>) -> Result<i64, AuditError> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM audit_events WHERE 1 = 1");
        if let Some(filter) = filter {
            push_filters(&mut builder, filter);
        }
        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
