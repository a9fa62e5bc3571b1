//! Per-request audit scope and correlation id propagation.

use std::{fmt, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use db::models::audit_event::NewAuditEvent;
use tracing::Instrument;
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");
pub const ACTOR_ID_HEADER: HeaderName = HeaderName::from_static("x-actor-id");
pub const SYSTEM_TYPE_ID_HEADER: HeaderName = HeaderName::from_static("x-system-type-id");

/// Who is acting and under which correlation id, for the lifetime of one
/// request. Handlers read it from request extensions.
#[derive(Debug, Clone)]
pub struct AuditScope {
    correlation_id: Uuid,
    actor_id: Option<i64>,
    system_type_id: Option<i64>,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl AuditScope {
    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            actor_id: None,
            system_type_id: None,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Builds the scope for an incoming request. A missing, malformed or nil
    /// correlation header gets a fresh id.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let correlation_id = header_str(headers, &CORRELATION_ID_HEADER)
            .and_then(|value| Uuid::parse_str(value).ok())
            .filter(|id| !id.is_nil())
            .unwrap_or_else(Uuid::new_v4);

        let mut scope = Self::new(correlation_id);
        scope.set_actor(header_str(headers, &ACTOR_ID_HEADER).and_then(|v| v.parse().ok()));
        scope.set_system_type(
            header_str(headers, &SYSTEM_TYPE_ID_HEADER).and_then(|v| v.parse().ok()),
        );
        scope.set_user_agent(
            header_str(headers, &axum::http::header::USER_AGENT).map(str::to_string),
        );
        scope.set_ip_address(
            header_str(headers, &HeaderName::from_static("x-forwarded-for"))
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        );
        scope
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn actor_id(&self) -> Option<i64> {
        self.actor_id
    }

    pub fn system_type_id(&self) -> Option<i64> {
        self.system_type_id
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn set_actor(&mut self, actor_id: Option<i64>) {
        self.actor_id = actor_id;
    }

    pub fn set_system_type(&mut self, system_type_id: Option<i64>) {
        self.system_type_id = system_type_id;
    }

    pub fn set_ip_address(&mut self, ip_address: Option<String>) {
        self.ip_address = ip_address;
    }

    pub fn set_user_agent(&mut self, user_agent: Option<String>) {
        self.user_agent = user_agent;
    }

    /// A new audit event stamped with this scope's correlation, actor and
    /// system type.
    pub fn event(&self, event_type: &str) -> NewAuditEvent {
        NewAuditEvent::new(event_type, self.correlation_id)
            .actor(self.actor_id)
            .system_type(self.system_type_id)
    }
}

impl fmt::Display for AuditScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuditScope:Corr={}:Actor=", self.correlation_id)?;
        match self.actor_id {
            Some(actor) => write!(f, "{actor}")?,
            None => f.write_str("n/a")?,
        }
        f.write_str(":SysType=")?;
        match self.system_type_id {
            Some(system_type) => write!(f, "{system_type}"),
            None => f.write_str("n/a"),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

/// Installs an [`AuditScope`] for the request, runs the rest of the stack in a
/// span carrying the correlation id, and echoes the id on the response.
pub async fn audit_scope_middleware(mut request: Request, next: Next) -> Response {
    let mut scope = AuditScope::from_headers(request.headers());
    if scope.ip_address().is_none()
        && let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>()
    {
        scope.set_ip_address(Some(addr.ip().to_string()));
    }

    let correlation_id = scope.correlation_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let span = tracing::info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %method,
        path = %path
    );

    request.extensions_mut().insert(scope);
    let mut response = next.run(request).instrument(span).await;

    if response.status().is_server_error() {
        tracing::error!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            "Request failed with server error"
        );
    }

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response
            .headers_mut()
            .entry(CORRELATION_ID_HEADER)
            .or_insert(value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn valid_correlation_header_is_kept() {
        let id = Uuid::new_v4();
        let scope = AuditScope::from_headers(&headers(&[
            ("x-correlation-id", &id.to_string()),
            ("x-actor-id", "42"),
        ]));
        assert_eq!(scope.correlation_id(), id);
        assert_eq!(scope.actor_id(), Some(42));
        assert_eq!(
            scope.to_string(),
            format!("AuditScope:Corr={id}:Actor=42:SysType=n/a")
        );
    }

    #[test]
    fn nil_or_malformed_correlation_is_replaced() {
        let nil = AuditScope::from_headers(&headers(&[(
            "x-correlation-id",
            "00000000-0000-0000-0000-000000000000",
        )]));
        assert!(!nil.correlation_id().is_nil());

        let junk = AuditScope::from_headers(&headers(&[("x-correlation-id", "not-a-uuid")]));
        assert!(!junk.correlation_id().is_nil());
        assert_eq!(junk.actor_id(), None);
    }

    #[test]
    fn forwarded_for_takes_the_first_hop() {
        let scope = AuditScope::from_headers(&headers(&[(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.1",
        )]));
        assert_eq!(scope.ip_address(), Some("203.0.113.7"));
    }

    #[test]
    fn event_carries_scope_fields() {
        let mut scope = AuditScope::new(Uuid::new_v4());
        scope.set_actor(Some(5));
        scope.set_system_type(Some(2));
        let event = scope.event("WorkspaceAudit");
        assert_eq!(event.correlation_id, scope.correlation_id());
        assert_eq!(event.actor_id, Some(5));
        assert_eq!(event.system_type_id, Some(2));
    }
}
