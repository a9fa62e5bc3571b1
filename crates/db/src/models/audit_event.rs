use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::OrNa;

/// One row of the append-only audit log.
///
/// `payload_json` and `metadata_json` are `None` when the row was loaded
/// without its payload.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub event_type: String,
    pub correlation_id: Uuid,
    pub actor_id: Option<i64>,
    pub target_id: Option<i64>,
    pub target_type: Option<String>,
    pub system_type_id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub payload_json: Option<String>,
    pub metadata_json: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// Listing projection without the JSON columns.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditEventSummary {
    pub id: i64,
    pub event_type: String,
    pub correlation_id: Uuid,
    pub actor_id: Option<i64>,
    pub target_id: Option<i64>,
    pub target_type: Option<String>,
    pub system_type_id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// An event that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub event_type: String,
    pub correlation_id: Uuid,
    pub actor_id: Option<i64>,
    pub target_id: Option<i64>,
    pub target_type: Option<String>,
    pub system_type_id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub payload_json: Option<String>,
    pub metadata_json: Option<String>,
}

impl NewAuditEvent {
    /// A nil correlation id is replaced with a fresh one.
    pub fn new(event_type: impl Into<String>, correlation_id: Uuid) -> Self {
        let correlation_id = if correlation_id.is_nil() {
            Uuid::new_v4()
        } else {
            correlation_id
        };
        Self {
            event_type: event_type.into(),
            correlation_id,
            actor_id: None,
            target_id: None,
            target_type: None,
            system_type_id: None,
            occurred_at: Utc::now(),
            payload_json: None,
            metadata_json: None,
        }
    }

    pub fn actor(mut self, actor_id: Option<i64>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn target(mut self, target_type: impl Into<String>, target_id: Option<i64>) -> Self {
        self.target_type = Some(target_type.into());
        self.target_id = target_id;
        self
    }

    pub fn system_type(mut self, system_type_id: Option<i64>) -> Self {
        self.system_type_id = system_type_id;
        self
    }

    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn payload(mut self, payload: &serde_json::Value) -> Self {
        self.payload_json = Some(payload.to_string());
        self
    }

    pub fn metadata(mut self, metadata: &serde_json::Value) -> Self {
        self.metadata_json = Some(metadata.to_string());
        self
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AuditEvent:{}:type:{}:corr:{}:actor:{}:target:{}:{}:at:{}:v{}",
            self.id,
            self.event_type,
            self.correlation_id,
            OrNa(&self.actor_id),
            OrNa(&self.target_type),
            OrNa(&self.target_id),
            self.occurred_at.format("%Y-%m-%d %H:%M:%SZ"),
            self.version
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn display_renders_missing_fields_as_na() {
        let correlation_id = Uuid::new_v4();
        let event = AuditEvent {
            id: 7,
            event_type: "ProjectAudit".to_string(),
            correlation_id,
            actor_id: None,
            target_id: Some(3),
            target_type: None,
            system_type_id: None,
            occurred_at: Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap(),
            payload_json: None,
            metadata_json: None,
            version: 1,
            created_at: Utc::now(),
        };
        assert_eq!(
            event.to_string(),
            format!("AuditEvent:7:type:ProjectAudit:corr:{correlation_id}:actor:n/a:target:n/a:3:at:2025-03-04 05:06:07Z:v1")
        );
    }

    #[test]
    fn nil_correlation_id_is_replaced() {
        let event = NewAuditEvent::new("AuthorizationAudit", Uuid::nil());
        assert!(!event.correlation_id.is_nil());

        let kept = Uuid::new_v4();
        assert_eq!(NewAuditEvent::new("x", kept).correlation_id, kept);
    }
}
