//! Audit log: durable writes and read-side queries over `audit_events`.
//!
//! Writes go through [`AuditWriter`], which offers two paths:
//!
//! - **Best-effort** ([`AuditWriter::write`]): a bounded retry loop on the
//!   shared pool. A failure after the last attempt is logged and swallowed so
//!   auditing never fails the operation being audited.
//! - **Transactional** ([`AuditWriter::write_in_transaction`]): the insert runs
//!   on the caller's connection, so it commits or rolls back with the domain
//!   change it describes. Errors propagate.
//!
//! Reads go through [`AuditQueryRepository`], which returns summaries without
//! the JSON columns unless a single event is fetched with its payload.

mod query;
mod writer;

pub use query::{AuditQueryFilter, AuditQueryRepository, PagedResult, PagingOptions};
pub use writer::{
    AuditWriter, AuthenticationAudit, AuthorizationAudit, AuthorizationAuditPayload,
    AuthorizationDecision,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("failed to serialize audit payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("audit write cancelled")]
    Cancelled,
}

/// Event type written by [`AuditWriter::write_authorization`].
pub const AUTHORIZATION_AUDIT: &str = "AuthorizationAudit";
/// Event type written by [`AuditWriter::write_authentication`].
pub const AUTHENTICATION_AUDIT: &str = "AuthenticationAudit";
