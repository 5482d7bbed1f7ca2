//! Per-request state threaded through the stage chain

use crate::audit::AuditEntry;
use crate::membership::{OrgRole, TeamRole};
use crate::types::{AuthKind, Operation, OrgId, Permission, TeamId, UserId};
use crate::variables::Variables;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;
use uuid::Uuid;

/// Transport-independent view of an inbound request
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    pub method: String,
    pub path: String,
    /// Raw `Authorization` header value
    pub authorization: Option<String>,
    pub client_ip: Option<IpAddr>,
    /// Path parameters extracted by the router, keyed by name
    pub path_params: HashMap<String, String>,
    /// Request id supplied by an upstream proxy
    pub request_id: Option<String>,
}

impl IncomingRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_bearer(mut self, token: impl AsRef<str>) -> Self {
        self.authorization = Some(format!("Bearer {}", token.as_ref()));
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Path parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }
}

/// Authorization state of one request; never persisted
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub operation: Operation,
    pub user_id: Option<UserId>,
    pub auth_kind: Option<AuthKind>,
    pub roles: Vec<String>,
    /// Effective permissions, including request-scoped contextual grants
    pub permissions: Vec<Permission>,
    pub org_id: Option<OrgId>,
    pub org_role: Option<OrgRole>,
    pub team_id: Option<TeamId>,
    pub team_role: Option<TeamRole>,
    pub variables: Variables,
    pub audit: Option<AuditEntry>,
    /// Permission that authorized the request
    pub granted_by: Option<Permission>,
    pub started_at: Instant,
}

impl RequestContext {
    /// Fresh context for an operation
    pub fn new(operation: Operation) -> Self {
        Self {
            request_id: Uuid::nil(),
            operation,
            user_id: None,
            auth_kind: None,
            roles: Vec::new(),
            permissions: Vec::new(),
            org_id: None,
            org_role: None,
            team_id: None,
            team_role: None,
            variables: Variables::new(),
            audit: None,
            granted_by: None,
            started_at: Instant::now(),
        }
    }

    /// Whether authentication ran and succeeded
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}
