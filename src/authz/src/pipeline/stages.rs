//! Pipeline stages, in chain order

use super::context::{IncomingRequest, RequestContext};
use super::route::{ORG_PARAM, TEAM_PARAM};
use super::Stage;
use crate::audit::{AuditEntry, AuditSink};
use crate::auth::Authenticator;
use crate::error::{AuthzError, Result};
use crate::matcher::{match_operation, match_resource};
use crate::membership::{MembershipStore, TeamRole};
use crate::types::{Operation, OperationScope, Permission, Resource, ANY_RESOURCE};
use crate::variables::{VAR_ME, VAR_ORG, VAR_TEAM};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Universal resource candidate tested for every operation
pub const UNIVERSAL_CANDIDATE: &str = "*:*:*";

/// Operation pattern of the request-scoped team-lead grant
pub const TEAM_LEAD_OPERATION: &str = "org:team:*";

const SELF_TEMPLATE: &str = "self:user:@me";
const ORG_TEMPLATE: &str = "org.@org:*:*";
const TEAM_TEMPLATE: &str = "org.@org.team.@team:*:*";

/// Assigns the request id; reuses a well-formed upstream id
pub struct RequestIdStage;

#[async_trait]
impl Stage for RequestIdStage {
    fn name(&self) -> &'static str {
        "request_id"
    }

    async fn process(&self, request: &IncomingRequest, ctx: &mut RequestContext) -> Result<()> {
        ctx.request_id = request
            .request_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok())
            .unwrap_or_else(Uuid::new_v4);
        debug!(
            request_id = %ctx.request_id,
            operation = %ctx.operation,
            "Request tagged"
        );
        Ok(())
    }
}

/// Resolves the bearer credential into user, roles and permissions
pub struct AuthenticationStage {
    authenticator: Arc<Authenticator>,
}

impl AuthenticationStage {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Stage for AuthenticationStage {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn process(&self, request: &IncomingRequest, ctx: &mut RequestContext) -> Result<()> {
        let principal = self
            .authenticator
            .authenticate(request.authorization.as_deref(), request.client_ip)
            .await?;

        ctx.user_id = Some(principal.identity.user_id);
        ctx.auth_kind = Some(principal.identity.auth_kind);
        ctx.roles = principal.roles;
        ctx.permissions = principal.permissions;
        ctx.variables
            .bind(VAR_ME, principal.identity.user_id.to_string());
        Ok(())
    }
}

fn numeric_param(request: &IncomingRequest, name: &str) -> Result<u64> {
    let raw = request
        .param(name)
        .ok_or_else(|| AuthzError::BadRequest(format!("missing path parameter '{}'", name)))?;
    raw.parse::<u64>()
        .map_err(|_| AuthzError::BadRequest(format!("{} must be numeric, got '{}'", name, raw)))
}

/// Binds the organization named in the path; requires membership
pub struct OrgContextStage {
    memberships: Arc<dyn MembershipStore>,
}

impl OrgContextStage {
    pub fn new(memberships: Arc<dyn MembershipStore>) -> Self {
        Self { memberships }
    }
}

#[async_trait]
impl Stage for OrgContextStage {
    fn name(&self) -> &'static str {
        "org_context"
    }

    async fn process(&self, request: &IncomingRequest, ctx: &mut RequestContext) -> Result<()> {
        let org_id = numeric_param(request, ORG_PARAM)?;
        let user_id = ctx.user_id.ok_or_else(|| {
            AuthzError::Unauthenticated("organization context requires a caller".to_string())
        })?;

        if !self.memberships.org_exists(org_id).await? {
            return Err(AuthzError::NotFound(format!("organization {}", org_id)));
        }

        let role = self
            .memberships
            .org_role(org_id, user_id)
            .await?
            .ok_or_else(|| {
                AuthzError::Forbidden(format!("not a member of organization {}", org_id))
            })?;

        ctx.org_id = Some(org_id);
        ctx.org_role = Some(role);
        ctx.variables.bind(VAR_ORG, org_id.to_string());
        Ok(())
    }
}

/// Binds the team named in the path and injects the team-lead grant
pub struct TeamContextStage {
    memberships: Arc<dyn MembershipStore>,
}

impl TeamContextStage {
    pub fn new(memberships: Arc<dyn MembershipStore>) -> Self {
        Self { memberships }
    }
}

/// Request-scoped grant held by the lead of a team
pub fn team_lead_permission(org_id: u64, team_id: u64) -> Permission {
    Permission::new(
        TEAM_LEAD_OPERATION,
        format!("org.{}.team.{}:*:*", org_id, team_id),
    )
}

#[async_trait]
impl Stage for TeamContextStage {
    fn name(&self) -> &'static str {
        "team_context"
    }

    async fn process(&self, request: &IncomingRequest, ctx: &mut RequestContext) -> Result<()> {
        let team_id = numeric_param(request, TEAM_PARAM)?;
        let (org_id, org_role, user_id) = match (ctx.org_id, ctx.org_role, ctx.user_id) {
            (Some(org), Some(role), Some(user)) => (org, role, user),
            _ => {
                return Err(AuthzError::Internal(
                    "team context resolved before organization context".to_string(),
                ))
            }
        };

        match self.memberships.team_org(team_id).await? {
            Some(owner) if owner == org_id => {}
            _ => {
                return Err(AuthzError::NotFound(format!(
                    "team {} in organization {}",
                    team_id, org_id
                )))
            }
        }

        let team_role = self.memberships.team_role(team_id, user_id).await?;
        if team_role.is_none() && !org_role.bypasses_team_membership() {
            return Err(AuthzError::Forbidden(format!("not a member of team {}", team_id)));
        }

        ctx.team_id = Some(team_id);
        ctx.team_role = team_role;
        ctx.variables.bind(VAR_TEAM, team_id.to_string());

        if team_role == Some(TeamRole::Lead) {
            ctx.permissions.push(team_lead_permission(org_id, team_id));
            debug!(org_id, team_id, "Injected team-lead permission");
        }
        Ok(())
    }
}

/// Resource candidates tested for an operation under the bound context
///
/// Templates are only included once every variable they reference is bound.
pub fn resource_candidates(operation: &Operation, ctx: &RequestContext) -> Vec<Resource> {
    let mut candidates = vec![Resource::new(UNIVERSAL_CANDIDATE)];

    match operation.operation_scope() {
        Some(OperationScope::SelfScope) => {
            candidates.push(Resource::new(SELF_TEMPLATE));
            if let Some(resolved) = ctx.variables.resolve_bound(SELF_TEMPLATE, &[VAR_ME]) {
                candidates.push(Resource::from(resolved));
            }
        }
        Some(OperationScope::Org) => {
            if let Some(resolved) = ctx.variables.resolve_bound(ORG_TEMPLATE, &[VAR_ORG]) {
                candidates.push(Resource::from(resolved));
            }
            if let Some(resolved) = ctx.variables.resolve_bound(TEAM_TEMPLATE, &[VAR_ORG, VAR_TEAM])
            {
                candidates.push(Resource::from(resolved));
            }
        }
        _ => {}
    }

    candidates
}

/// First permission matching the operation and any candidate
pub fn find_grant<'a>(
    permissions: &'a [Permission],
    operation: &Operation,
    candidates: &[Resource],
) -> Option<&'a Permission> {
    permissions.iter().find(|permission| {
        match_operation(&permission.operation_pattern, operation.as_str())
            && (permission.resource_pattern == ANY_RESOURCE
                || candidates
                    .iter()
                    .any(|candidate| match_resource(&permission.resource_pattern, candidate.as_str())))
    })
}

/// Allows the request if any effective permission covers the operation
pub struct RbacStage;

#[async_trait]
impl Stage for RbacStage {
    fn name(&self) -> &'static str {
        "rbac"
    }

    async fn process(&self, _request: &IncomingRequest, ctx: &mut RequestContext) -> Result<()> {
        let candidates = resource_candidates(&ctx.operation, ctx);

        match find_grant(&ctx.permissions, &ctx.operation, &candidates).cloned() {
            Some(grant) => {
                debug!(operation = %ctx.operation, grant = %grant, "Access granted");
                ctx.granted_by = Some(grant);
                Ok(())
            }
            None => {
                debug!(
                    operation = %ctx.operation,
                    candidates = ?candidates,
                    "No permission matched"
                );
                Err(AuthzError::Forbidden(format!(
                    "missing permission for '{}'",
                    ctx.operation
                )))
            }
        }
    }
}

/// Attaches audit metadata and forwards it to the sink
pub struct AuditStage {
    sink: Arc<dyn AuditSink>,
}

impl AuditStage {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Stage for AuditStage {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn process(&self, request: &IncomingRequest, ctx: &mut RequestContext) -> Result<()> {
        let entry = AuditEntry {
            request_id: ctx.request_id,
            operation_id: ctx.operation.to_string(),
            method: request.method.clone(),
            path: request.path.clone(),
            user_id: ctx.user_id,
            auth_kind: ctx.auth_kind,
            org_id: ctx.org_id,
            team_id: ctx.team_id,
            timestamp: Utc::now(),
        };
        self.sink.record(entry.clone());
        ctx.audit = Some(entry);
        Ok(())
    }
}

/// Logs the outcome once the chain has finished, successful or not
pub struct ResponseLogStage;

#[async_trait]
impl Stage for ResponseLogStage {
    fn name(&self) -> &'static str {
        "response_log"
    }

    async fn process(&self, _request: &IncomingRequest, _ctx: &mut RequestContext) -> Result<()> {
        Ok(())
    }

    fn complete(&self, request: &IncomingRequest, ctx: &RequestContext, outcome: &Result<()>) {
        let elapsed_ms = ctx.started_at.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => info!(
                request_id = %ctx.request_id,
                method = %request.method,
                path = %request.path,
                operation = %ctx.operation,
                user_id = ?ctx.user_id,
                elapsed_ms,
                "Request authorized"
            ),
            Err(e) if e.is_rejection() => warn!(
                request_id = %ctx.request_id,
                method = %request.method,
                path = %request.path,
                operation = %ctx.operation,
                user_id = ?ctx.user_id,
                status = e.status_code(),
                elapsed_ms,
                "Request rejected: {}",
                e
            ),
            Err(e) => error!(
                request_id = %ctx.request_id,
                method = %request.method,
                path = %request.path,
                operation = %ctx.operation,
                status = e.status_code(),
                elapsed_ms,
                "Authorization failed: {}",
                e
            ),
        }
    }
}
