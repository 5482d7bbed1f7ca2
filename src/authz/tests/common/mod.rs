//! Shared fixture: an engine over seeded in-memory collaborators

#![allow(dead_code)]

use std::sync::Arc;
use tenant_authz::audit::{AuditEntry, ChannelAuditSink};
use tenant_authz::auth::StaticSessionVerifier;
use tenant_authz::cache::CacheBackend;
use tenant_authz::membership::{InMemoryMembershipStore, OrgRole, TeamRole};
use tenant_authz::pipeline::{IncomingRequest, Pipeline, PipelineBuilder, RouteMeta};
use tenant_authz::roles::{InMemoryRoleStore, RoleStore};
use tenant_authz::token::{InMemoryTokenStore, PersonalAccessToken, TokenStore};
use tenant_authz::types::{Permission, Role, UserId, ADMIN_ROLE, USER_ROLE};
use tenant_authz::{AuthzConfig, AuthzEngine, Collaborators};
use tokio::sync::mpsc;

pub const ADMIN_ROLE_ID: u64 = 1;
pub const USER_ROLE_ID: u64 = 2;

/// Holds the `admin` role
pub const ROOT: UserId = 1;
/// Only the implicit `user` role; not in any org
pub const ALICE: UserId = 10;
/// Lead of team 3, plain member of team 4 (both in org 7)
pub const BOB: UserId = 11;
/// Plain member of team 3
pub const CAROL: UserId = 12;
/// Admin of org 7 without team membership
pub const DAVE: UserId = 13;
/// Member of org 8 only
pub const EVE: UserId = 14;

pub const ORG: u64 = 7;
pub const OTHER_ORG: u64 = 8;
pub const TEAM: u64 = 3;
pub const SIBLING_TEAM: u64 = 4;
pub const FOREIGN_TEAM: u64 = 5;

pub fn session(user_id: UserId) -> String {
    format!("session-{}", user_id)
}

pub struct Harness {
    pub engine: AuthzEngine,
    pub roles: Arc<InMemoryRoleStore>,
    pub memberships: Arc<InMemoryMembershipStore>,
    pub tokens: Arc<InMemoryTokenStore>,
    pub audit_rx: mpsc::Receiver<AuditEntry>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_backend(None).await
    }

    pub async fn with_backend(backend: Option<Arc<dyn CacheBackend>>) -> Self {
        let roles = Arc::new(InMemoryRoleStore::new());
        roles
            .put_role(
                Role::new(ADMIN_ROLE_ID, ADMIN_ROLE, "Administrator")
                    .system()
                    .with_permissions(vec![Permission::any_resource("*:*:*")]),
            )
            .await
            .unwrap();
        roles
            .put_role(
                Role::new(USER_ROLE_ID, USER_ROLE, "User")
                    .system()
                    .with_permissions(vec![Permission::any_resource("self:*:*")]),
            )
            .await
            .unwrap();
        roles.assign_role(ROOT, ADMIN_ROLE_ID).await.unwrap();

        let memberships = Arc::new(InMemoryMembershipStore::new());
        memberships.add_org_member(ORG, BOB, OrgRole::Member).await;
        memberships.add_org_member(ORG, CAROL, OrgRole::Member).await;
        memberships.add_org_member(ORG, DAVE, OrgRole::Admin).await;
        memberships.add_org_member(OTHER_ORG, EVE, OrgRole::Owner).await;
        memberships.add_team(ORG, TEAM).await;
        memberships.add_team(ORG, SIBLING_TEAM).await;
        memberships.add_team(OTHER_ORG, FOREIGN_TEAM).await;
        memberships.add_team_member(TEAM, BOB, TeamRole::Lead).await;
        memberships.add_team_member(TEAM, CAROL, TeamRole::Member).await;
        memberships.add_team_member(SIBLING_TEAM, BOB, TeamRole::Member).await;

        let sessions = [ROOT, ALICE, BOB, CAROL, DAVE, EVE]
            .into_iter()
            .fold(StaticSessionVerifier::new(), |v, user| {
                v.with_session(session(user), user)
            });

        let tokens = Arc::new(InMemoryTokenStore::new());
        let (audit, audit_rx) = ChannelAuditSink::new(64);

        let engine = AuthzEngine::new(
            AuthzConfig::default(),
            Collaborators {
                roles: roles.clone(),
                memberships: memberships.clone(),
                tokens: tokens.clone(),
                sessions: Arc::new(sessions),
                audit: Arc::new(audit),
                cache_backend: backend,
            },
        )
        .await;

        Self {
            engine,
            roles,
            memberships,
            tokens,
            audit_rx,
        }
    }

    /// Issue and store a personal access token, returning its secret
    pub async fn issue_pat(&self, user_id: UserId, scopes: &[&str], ips: &[&str]) -> String {
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        let ips = ips.iter().map(|s| s.to_string()).collect();
        let issued = PersonalAccessToken::issue(
            user_id,
            "test",
            &scopes,
            None,
            ips,
            &self.engine.config().pat_prefix,
        )
        .unwrap();
        self.tokens.insert(issued.token).await.unwrap();
        issued.secret
    }

    /// Standard pipeline for a route
    pub fn pipeline(&self, method: &str, path: &str, operation: &str) -> Pipeline {
        let route = RouteMeta::new(method, path, operation).unwrap();
        PipelineBuilder::build(&route, &self.engine.stage_set())
    }
}

/// Request for the team settings route
pub fn team_request(token: &str, org: &str, team: &str) -> IncomingRequest {
    IncomingRequest::new("GET", format!("/orgs/{}/teams/{}/settings", org, team))
        .with_bearer(token)
        .with_param("org_id", org)
        .with_param("team_id", team)
}
