use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use strum_macros::{Display, EnumString};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{AUTHENTICATION_AUDIT, AUTHORIZATION_AUDIT, AuditError};
use crate::{
    models::{OrNa, audit_event::NewAuditEvent},
    retry::RetryConfig,
};

const BEST_EFFORT_ATTEMPTS: u32 = 3;
const BEST_EFFORT_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
pub enum AuthorizationDecision {
    Allow,
    Deny,
}

/// Typed payload for authorization events. Serialized camelCase with unset
/// fields left out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationAuditPayload {
    pub action: String,
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<i64>,
    pub decision: AuthorizationDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub correlation_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_type_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// An authorization decision to record.
#[derive(Debug, Clone)]
pub struct AuthorizationAudit<P = AuthorizationAuditPayload> {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<i64>,
    pub actor_id: Option<i64>,
    pub system_type_id: Option<i64>,
    pub correlation_id: Uuid,
    pub payload: Option<P>,
}

/// A sign-in attempt to record. Without an explicit payload the event stores
/// `{success, reason, ipAddress, userAgent}`.
#[derive(Debug, Clone)]
pub struct AuthenticationAudit {
    pub actor_id: Option<i64>,
    pub success: bool,
    pub reason: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: Uuid,
    pub payload: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticationOutcome<'a> {
    success: bool,
    reason: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip_address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_agent: Option<&'a str>,
}

/// Writes rows to `audit_events` and mirrors each one into the log.
#[derive(Clone)]
pub struct AuditWriter {
    pool: SqlitePool,
    retry: RetryConfig,
}

impl AuditWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_retry(
            pool,
            RetryConfig::fixed(BEST_EFFORT_ATTEMPTS, BEST_EFFORT_DELAY),
        )
    }

    pub fn with_retry(pool: SqlitePool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    /// Best-effort write on the shared pool.
    ///
    /// Returns the new row id, or `None` once every attempt has failed. Only
    /// cancellation during the pause between attempts is reported as an error.
    pub async fn write(
        &self,
        event: &NewAuditEvent,
        cancel: &CancellationToken,
    ) -> Result<Option<i64>, AuditError> {
        let attempts = self.retry.max_attempts();

        for attempt in 0..attempts {
            match insert_event(&self.pool, event).await {
                Ok(id) => {
                    info!(
                        audit_id = id,
                        event_type = %event.event_type,
                        correlation_id = %event.correlation_id,
                        actor_id = %OrNa(&event.actor_id),
                        target_type = %OrNa(&event.target_type),
                        target_id = %OrNa(&event.target_id),
                        "Audit event written"
                    );
                    return Ok(Some(id));
                }
                Err(e) if attempt + 1 < attempts => {
                    warn!(
                        attempt = attempt + 1,
                        event_type = %event.event_type,
                        correlation_id = %event.correlation_id,
                        error = %e,
                        "Transient error writing audit event, will retry"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AuditError::Cancelled),
                        _ = tokio::time::sleep(self.retry.delay_for(attempt)) => {}
                    }
                }
                Err(e) => {
                    error!(
                        attempts = attempt + 1,
                        event_type = %event.event_type,
                        correlation_id = %event.correlation_id,
                        error = %e,
                        "Failed to write audit event after all attempts"
                    );
                }
            }
        }

        Ok(None)
    }

    /// Insert on the caller's connection, typically `&mut *tx`.
    pub async fn write_in_transaction(
        &self,
        event: &NewAuditEvent,
        conn: &mut SqliteConnection,
    ) -> Result<i64, AuditError> {
        Ok(self.record_in_transaction(event, conn).await?)
    }

    /// [`Self::write_in_transaction`] with the raw driver error, for callers
    /// that retry the whole transaction on BUSY/LOCKED.
    pub(crate) async fn record_in_transaction(
        &self,
        event: &NewAuditEvent,
        conn: &mut SqliteConnection,
    ) -> Result<i64, sqlx::Error> {
        match insert_event(&mut *conn, event).await {
            Ok(id) => {
                info!(
                    audit_id = id,
                    event_type = %event.event_type,
                    correlation_id = %event.correlation_id,
                    actor_id = %OrNa(&event.actor_id),
                    "Audit event written in transaction"
                );
                Ok(id)
            }
            Err(e) => {
                error!(
                    event_type = %event.event_type,
                    correlation_id = %event.correlation_id,
                    error = %e,
                    "Failed to write audit event inside transaction"
                );
                Err(e)
            }
        }
    }

    pub async fn write_authorization<P: Serialize>(
        &self,
        audit: &AuthorizationAudit<P>,
        conn: Option<&mut SqliteConnection>,
        cancel: &CancellationToken,
    ) -> Result<Option<i64>, AuditError> {
        let mut event = NewAuditEvent::new(AUTHORIZATION_AUDIT, audit.correlation_id)
            .actor(audit.actor_id)
            .target(audit.resource_type.clone(), audit.resource_id)
            .system_type(audit.system_type_id);
        event.payload_json = audit
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        event.metadata_json = Some(
            json!({
                "action": audit.action,
                "recordedAt": Utc::now().to_rfc3339(),
            })
            .to_string(),
        );

        self.dispatch(&event, conn, cancel).await
    }

    pub async fn write_authentication(
        &self,
        audit: &AuthenticationAudit,
        conn: Option<&mut SqliteConnection>,
        cancel: &CancellationToken,
    ) -> Result<Option<i64>, AuditError> {
        let payload = match &audit.payload {
            Some(payload) => serde_json::to_string(payload)?,
            None => serde_json::to_string(&AuthenticationOutcome {
                success: audit.success,
                reason: &audit.reason,
                ip_address: audit.ip_address.as_deref(),
                user_agent: audit.user_agent.as_deref(),
            })?,
        };

        let mut event = NewAuditEvent::new(AUTHENTICATION_AUDIT, audit.correlation_id)
            .actor(audit.actor_id)
            .target("User", audit.actor_id);
        event.payload_json = Some(payload);
        event.metadata_json = Some(json!({ "recordedAt": Utc::now().to_rfc3339() }).to_string());

        self.dispatch(&event, conn, cancel).await
    }

    async fn dispatch(
        &self,
        event: &NewAuditEvent,
        conn: Option<&mut SqliteConnection>,
        cancel: &CancellationToken,
    ) -> Result<Option<i64>, AuditError> {
        match conn {
            Some(conn) => self.write_in_transaction(event, conn).await.map(Some),
            None => self.write(event, cancel).await,
        }
    }
}

async fn insert_event<'e, E>(executor: E, event: &NewAuditEvent) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar(
        r#"INSERT INTO audit_events (
               event_type, correlation_id, actor_id, target_id, target_type, system_type_id,
               occurred_at, payload_json, metadata_json, version, created_at
           )
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 1, $10)
           RETURNING id"#,
    )
    .bind(&event.event_type)
    .bind(event.correlation_id)
    .bind(event.actor_id)
    .bind(event.target_id)
    .bind(&event.target_type)
    .bind(event.system_type_id)
    .bind(event.occurred_at)
    .bind(&event.payload_json)
    .bind(&event.metadata_json)
    .bind(Utc::now())
    .fetch_one(executor)
    .await
}
