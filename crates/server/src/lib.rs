pub mod error;
pub mod file_logging;
pub mod middleware;
pub mod routes;

use db::{AuditQueryRepository, AuditWriter, DBService};

/// Shared handler state. Cloning is cheap: every field wraps the same pool.
#[derive(Clone)]
pub struct AppState {
    db: DBService,
    audit: AuditWriter,
    audit_query: AuditQueryRepository,
}

impl AppState {
    pub fn new(db: DBService) -> Self {
        let audit = AuditWriter::new(db.pool.clone());
        let audit_query = AuditQueryRepository::new(db.pool.clone());
        Self {
            db,
            audit,
            audit_query,
        }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn audit(&self) -> &AuditWriter {
        &self.audit
    }

    pub fn audit_query(&self) -> &AuditQueryRepository {
        &self.audit_query
    }
}
