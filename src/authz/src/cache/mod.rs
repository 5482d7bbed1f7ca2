//! Cache-aside store of per-user roles and permissions
//!
//! ```text
//! Authentication ──get(user)──► PermissionCache ──► CacheBackend
//!                                   │ miss
//!                                   ▼
//!                               RoleStore (source of truth) ──set──► CacheBackend
//!
//! EventBus ──► CacheInvalidator ──► invalidate_user / invalidate_users_with_role
//! ```
//!
//! Backend failures never reach callers: a failed read is a miss, a failed
//! write or delete is logged and ignored. Entries always carry a TTL so a
//! lost invalidation is bounded in time.

mod backend;

pub use backend::{CacheBackend, MemoryBackend};

use crate::error::Result;
use crate::roles::{load_user_permissions, RoleStore, UserPermissions};
use crate::types::{RoleId, UserId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Roles and permissions cached for one user
pub type CachedPermissions = UserPermissions;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live of each entry in seconds
    pub ttl_secs: u64,

    /// Namespace prefix of every key
    pub key_prefix: String,

    /// Maximum entries held by the in-memory backend
    pub capacity: usize,
}

impl CacheConfig {
    /// Entry time-to-live
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            key_prefix: "authz:perms:".to_string(),
            capacity: 10_000,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub errors: usize,
    pub invalidations: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Permission cache in front of the role store
pub struct PermissionCache {
    backend: Arc<dyn CacheBackend>,
    roles: Arc<dyn RoleStore>,
    config: CacheConfig,
    stats: Arc<DashMap<&'static str, usize>>,
}

impl PermissionCache {
    /// Create a cache over `backend`, loading misses from `roles`
    pub fn new(backend: Arc<dyn CacheBackend>, roles: Arc<dyn RoleStore>, config: CacheConfig) -> Self {
        Self {
            backend,
            roles,
            config,
            stats: Arc::new(DashMap::new()),
        }
    }

    /// Backend key for a user
    pub fn key(&self, user_id: UserId) -> String {
        format!("{}{}", self.config.key_prefix, user_id)
    }

    /// Cached entry for a user, if present and readable
    pub async fn get(&self, user_id: UserId) -> Option<CachedPermissions> {
        let key = self.key(user_id);

        let raw = match self.backend.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.increment_stat("misses");
                return None;
            }
            Err(e) => {
                warn!(user_id, "Permission cache read failed, treating as miss: {}", e);
                self.increment_stat("errors");
                self.increment_stat("misses");
                return None;
            }
        };

        match serde_json::from_str::<CachedPermissions>(&raw) {
            Ok(entry) => {
                self.increment_stat("hits");
                Some(entry)
            }
            Err(e) => {
                warn!(user_id, "Discarding unreadable permission cache entry: {}", e);
                self.increment_stat("errors");
                self.increment_stat("misses");
                None
            }
        }
    }

    /// Write an entry with the configured TTL; failures are logged only
    pub async fn put(&self, user_id: UserId, entry: &CachedPermissions) {
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(user_id, "Failed to encode permission cache entry: {}", e);
                return;
            }
        };

        if let Err(e) = self.backend.set(&self.key(user_id), raw, self.config.ttl()).await {
            warn!(user_id, "Permission cache write failed: {}", e);
            self.increment_stat("errors");
        }
    }

    /// Roles and permissions for a user: cached value or freshly loaded
    pub async fn load(&self, user_id: UserId) -> Result<CachedPermissions> {
        if let Some(entry) = self.get(user_id).await {
            debug!(user_id, "Permission cache hit");
            return Ok(entry);
        }

        let entry = load_user_permissions(self.roles.as_ref(), user_id).await?;
        self.put(user_id, &entry).await;
        debug!(
            user_id,
            roles = entry.roles.len(),
            permissions = entry.permissions.len(),
            "Permission cache filled"
        );
        Ok(entry)
    }

    /// Drop one user's entry; failures are logged only
    pub async fn invalidate_user(&self, user_id: UserId) {
        self.increment_stat("invalidations");
        if let Err(e) = self.backend.delete(&self.key(user_id)).await {
            warn!(user_id, "Permission cache invalidation failed: {}", e);
            self.increment_stat("errors");
        }
    }

    /// Drop the entry of every user holding `role_id`
    ///
    /// Returns how many users were invalidated. Fails only if the reverse
    /// index lookup fails.
    pub async fn invalidate_users_with_role(&self, role_id: RoleId) -> Result<usize> {
        let holders = self.roles.user_ids_with_role(role_id).await?;
        for user_id in &holders {
            self.invalidate_user(*user_id).await;
        }
        debug!(role_id, users = holders.len(), "Invalidated role holders");
        Ok(holders.len())
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            errors: self.get_stat("errors"),
            invalidations: self.get_stat("invalidations"),
        }
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn increment_stat(&self, key: &'static str) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthzError;
    use crate::roles::InMemoryRoleStore;
    use crate::types::{Permission, Role, USER_ROLE};
    use async_trait::async_trait;

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(AuthzError::CacheUnavailable("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            Err(AuthzError::CacheUnavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Err(AuthzError::CacheUnavailable("connection refused".to_string()))
        }
    }

    async fn role_store() -> Arc<InMemoryRoleStore> {
        let store = Arc::new(InMemoryRoleStore::new());
        store
            .put_role(
                Role::new(2, USER_ROLE, "User")
                    .system()
                    .with_permissions(vec![Permission::any_resource("self:*:*")]),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_cache_aside_fill_then_hit() {
        let cache = PermissionCache::new(
            Arc::new(MemoryBackend::default()),
            role_store().await,
            CacheConfig::default(),
        );

        let first = cache.load(5).await.unwrap();
        let second = cache.load(5).await.unwrap();
        assert_eq!(first, second);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert!(stats.hit_rate() > 0.0);
    }

    #[tokio::test]
    async fn test_invalidate_user_forces_reload() {
        let store = role_store().await;
        let cache = PermissionCache::new(
            Arc::new(MemoryBackend::default()),
            store.clone(),
            CacheConfig::default(),
        );

        cache.load(5).await.unwrap();
        store
            .replace_permissions(2, vec![Permission::any_resource("self:profile:get")])
            .await
            .unwrap();

        // stale until invalidated
        let stale = cache.load(5).await.unwrap();
        assert_eq!(stale.permissions[0].operation_pattern, "self:*:*");

        cache.invalidate_user(5).await;
        let fresh = cache.load(5).await.unwrap();
        assert_eq!(fresh.permissions[0].operation_pattern, "self:profile:get");
    }

    #[tokio::test]
    async fn test_backend_failures_degrade_to_source() {
        let cache = PermissionCache::new(
            Arc::new(BrokenBackend),
            role_store().await,
            CacheConfig::default(),
        );

        let entry = cache.load(5).await.unwrap();
        assert_eq!(entry.roles, vec![USER_ROLE.to_string()]);
        cache.invalidate_user(5).await;

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert!(stats.errors >= 3);
    }

    #[tokio::test]
    async fn test_key_prefix() {
        let config = CacheConfig {
            key_prefix: "tenant-a:".to_string(),
            ..Default::default()
        };
        let cache = PermissionCache::new(
            Arc::new(MemoryBackend::default()),
            role_store().await,
            config,
        );
        assert_eq!(cache.key(42), "tenant-a:42");
    }
}
