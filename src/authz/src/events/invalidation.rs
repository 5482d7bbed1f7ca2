//! Permission cache invalidation driven by domain events

use super::{DomainEvent, EventHandler};
use crate::cache::PermissionCache;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Drops cached permission sets affected by a write
///
/// - `RolePermissionsChanged` invalidates every holder of the role
/// - `UserRoleAssigned` and `UserDeleted` invalidate the one user
pub struct CacheInvalidator {
    cache: Arc<PermissionCache>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<PermissionCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl EventHandler for CacheInvalidator {
    fn name(&self) -> &str {
        "permission-cache-invalidator"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        match event {
            DomainEvent::RolePermissionsChanged { role_id } => {
                let count = self.cache.invalidate_users_with_role(*role_id).await?;
                debug!(role_id, count, "Role change invalidated cached permissions");
            }
            DomainEvent::UserRoleAssigned { user_id } | DomainEvent::UserDeleted { user_id } => {
                self.cache.invalidate_user(*user_id).await;
            }
        }
        Ok(())
    }
}
