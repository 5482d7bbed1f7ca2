//! Engine wiring
//!
//! Connects the collaborators into one authorization engine:
//!
//! ```text
//! RoleStore ──► PermissionCache ◄── CacheInvalidator ◄── EventBus ◄── RoleService
//!                    │
//! TokenStore ──► Authenticator ──► StageSet ──► PipelineTable (one chain per route)
//! MembershipStore ──────────────────┘    ▲
//! AuditSink ─────────────────────────────┘
//! ```

use crate::audit::AuditSink;
use crate::auth::{Authenticator, CredentialResolvers, SessionVerifier};
use crate::cache::{CacheBackend, MemoryBackend, PermissionCache};
use crate::config::AuthzConfig;
use crate::events::{CacheInvalidator, EventBus};
use crate::membership::MembershipStore;
use crate::pipeline::StageSet;
use crate::roles::{RoleService, RoleStore};
use crate::token::TokenStore;
use std::sync::Arc;
use tracing::info;

/// Topic patterns the cache invalidator listens on
pub const INVALIDATION_TOPICS: [&str; 2] = ["role.*", "user.*"];

/// External collaborators the engine is built from
pub struct Collaborators {
    pub roles: Arc<dyn RoleStore>,
    pub memberships: Arc<dyn MembershipStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub sessions: Arc<dyn SessionVerifier>,
    pub audit: Arc<dyn AuditSink>,
    /// Cache backend; an in-memory backend sized from the config when `None`
    pub cache_backend: Option<Arc<dyn CacheBackend>>,
}

/// Fully wired authorization engine
pub struct AuthzEngine {
    config: AuthzConfig,
    roles: Arc<dyn RoleStore>,
    memberships: Arc<dyn MembershipStore>,
    tokens: Arc<dyn TokenStore>,
    audit: Arc<dyn AuditSink>,
    bus: Arc<EventBus>,
    cache: Arc<PermissionCache>,
    role_service: Arc<RoleService>,
    authenticator: Arc<Authenticator>,
}

impl AuthzEngine {
    /// Wire the engine and subscribe cache invalidation to the event bus
    pub async fn new(config: AuthzConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            roles,
            memberships,
            tokens,
            sessions,
            audit,
            cache_backend,
        } = collaborators;

        let backend = cache_backend
            .unwrap_or_else(|| Arc::new(MemoryBackend::new(config.cache.capacity)));
        let cache = Arc::new(PermissionCache::new(backend, roles.clone(), config.cache.clone()));

        let bus = Arc::new(EventBus::new());
        let invalidator = Arc::new(CacheInvalidator::new(cache.clone()));
        for topic in INVALIDATION_TOPICS {
            bus.subscribe(topic, invalidator.clone()).await;
        }

        let role_service = Arc::new(RoleService::new(roles.clone(), bus.clone()));
        let authenticator = Arc::new(Authenticator::new(
            CredentialResolvers {
                sessions,
                tokens: tokens.clone(),
            },
            cache.clone(),
            config.pat_prefix.clone(),
        ));

        info!(
            cache_ttl_secs = config.cache.ttl_secs,
            pat_prefix = %config.pat_prefix,
            "Authorization engine initialized"
        );

        Self {
            config,
            roles,
            memberships,
            tokens,
            audit,
            bus,
            cache,
            role_service,
            authenticator,
        }
    }

    /// Standard stage set over this engine's collaborators
    pub fn stage_set(&self) -> StageSet {
        StageSet::standard(
            self.authenticator.clone(),
            self.memberships.clone(),
            self.audit.clone(),
        )
    }

    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    pub fn roles(&self) -> &Arc<dyn RoleStore> {
        &self.roles
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    pub fn role_service(&self) -> &Arc<RoleService> {
        &self.role_service
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditSink;
    use crate::auth::StaticSessionVerifier;
    use crate::membership::InMemoryMembershipStore;
    use crate::roles::InMemoryRoleStore;
    use crate::token::InMemoryTokenStore;

    #[tokio::test]
    async fn test_engine_subscribes_invalidator() {
        let engine = AuthzEngine::new(
            AuthzConfig::default(),
            Collaborators {
                roles: Arc::new(InMemoryRoleStore::new()),
                memberships: Arc::new(InMemoryMembershipStore::new()),
                tokens: Arc::new(InMemoryTokenStore::new()),
                sessions: Arc::new(StaticSessionVerifier::new()),
                audit: Arc::new(TracingAuditSink),
                cache_backend: None,
            },
        )
        .await;

        assert_eq!(engine.bus().subscription_count().await, INVALIDATION_TOPICS.len());
        assert_eq!(engine.authenticator().pat_prefix(), "pat_");
        assert!(engine.stage_set().rbac.is_some());
    }
}
