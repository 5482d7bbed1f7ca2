//! Organization and team membership lookups

use crate::error::Result;
use crate::types::{OrgId, TeamId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Role of a member inside an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
}

impl OrgRole {
    /// Org owners and admins reach every team without team membership
    pub fn bypasses_team_membership(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => f.write_str("owner"),
            Self::Admin => f.write_str("admin"),
            Self::Member => f.write_str("member"),
        }
    }
}

/// Role of a member inside a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Lead,
    Member,
}

impl fmt::Display for TeamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lead => f.write_str("lead"),
            Self::Member => f.write_str("member"),
        }
    }
}

/// Membership persistence backend
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Whether the organization exists
    async fn org_exists(&self, org_id: OrgId) -> Result<bool>;

    /// Role of `user_id` in the organization, if a member
    async fn org_role(&self, org_id: OrgId, user_id: UserId) -> Result<Option<OrgRole>>;

    /// Organization owning the team, if the team exists
    async fn team_org(&self, team_id: TeamId) -> Result<Option<OrgId>>;

    /// Role of `user_id` in the team, if a member
    async fn team_role(&self, team_id: TeamId, user_id: UserId) -> Result<Option<TeamRole>>;
}

#[derive(Default)]
struct MembershipTables {
    orgs: HashMap<OrgId, HashMap<UserId, OrgRole>>,
    teams: HashMap<TeamId, (OrgId, HashMap<UserId, TeamRole>)>,
}

/// In-memory membership store
#[derive(Default)]
pub struct InMemoryMembershipStore {
    tables: Arc<RwLock<MembershipTables>>,
}

impl InMemoryMembershipStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an organization
    pub async fn add_org(&self, org_id: OrgId) {
        self.tables.write().await.orgs.entry(org_id).or_default();
    }

    /// Add or update an organization member
    pub async fn add_org_member(&self, org_id: OrgId, user_id: UserId, role: OrgRole) {
        self.tables
            .write()
            .await
            .orgs
            .entry(org_id)
            .or_default()
            .insert(user_id, role);
    }

    /// Register a team inside an organization
    pub async fn add_team(&self, org_id: OrgId, team_id: TeamId) {
        let mut tables = self.tables.write().await;
        tables.orgs.entry(org_id).or_default();
        tables
            .teams
            .entry(team_id)
            .or_insert_with(|| (org_id, HashMap::new()));
    }

    /// Add or update a team member; the team must already exist
    pub async fn add_team_member(&self, team_id: TeamId, user_id: UserId, role: TeamRole) -> bool {
        let mut tables = self.tables.write().await;
        match tables.teams.get_mut(&team_id) {
            Some((_, members)) => {
                members.insert(user_id, role);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn org_exists(&self, org_id: OrgId) -> Result<bool> {
        Ok(self.tables.read().await.orgs.contains_key(&org_id))
    }

    async fn org_role(&self, org_id: OrgId, user_id: UserId) -> Result<Option<OrgRole>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orgs
            .get(&org_id)
            .and_then(|members| members.get(&user_id).copied()))
    }

    async fn team_org(&self, team_id: TeamId) -> Result<Option<OrgId>> {
        let tables = self.tables.read().await;
        Ok(tables.teams.get(&team_id).map(|(org_id, _)| *org_id))
    }

    async fn team_role(&self, team_id: TeamId, user_id: UserId) -> Result<Option<TeamRole>> {
        let tables = self.tables.read().await;
        Ok(tables
            .teams
            .get(&team_id)
            .and_then(|(_, members)| members.get(&user_id).copied()))
    }
}
