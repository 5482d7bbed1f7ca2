//! Role storage and the permission write API

use crate::error::{AuthzError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::types::{Permission, Role, RoleId, UserId, USER_ROLE};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Role persistence backend
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Get a role by id
    async fn get_role(&self, role_id: RoleId) -> Result<Option<Role>>;

    /// Get a role by its unique name
    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>>;

    /// List all roles
    async fn list_roles(&self) -> Result<Vec<Role>>;

    /// Create or overwrite a role
    async fn put_role(&self, role: Role) -> Result<()>;

    /// Delete a role and its assignments
    async fn delete_role(&self, role_id: RoleId) -> Result<()>;

    /// Replace a role's permission list
    async fn replace_permissions(&self, role_id: RoleId, permissions: Vec<Permission>)
        -> Result<()>;

    /// Roles explicitly assigned to a user
    async fn roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>>;

    /// Reverse index: users explicitly holding a role
    async fn user_ids_with_role(&self, role_id: RoleId) -> Result<Vec<UserId>>;

    /// Assign a role to a user
    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> Result<()>;

    /// Remove a role from a user
    async fn revoke_role(&self, user_id: UserId, role_id: RoleId) -> Result<()>;

    /// Remove every assignment of a user
    async fn remove_user(&self, user_id: UserId) -> Result<()>;
}

#[derive(Default)]
struct RoleTables {
    roles: HashMap<RoleId, Role>,
    assignments: HashMap<UserId, HashSet<RoleId>>,
}

/// In-memory role store
#[derive(Default)]
pub struct InMemoryRoleStore {
    tables: Arc<RwLock<RoleTables>>,
}

impl InMemoryRoleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn get_role(&self, role_id: RoleId) -> Result<Option<Role>> {
        let tables = self.tables.read().await;
        Ok(tables.roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let tables = self.tables.read().await;
        Ok(tables.roles.values().find(|r| r.name == name).cloned())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let tables = self.tables.read().await;
        let mut roles: Vec<Role> = tables.roles.values().cloned().collect();
        roles.sort_by_key(|r| r.id);
        Ok(roles)
    }

    async fn put_role(&self, role: Role) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.roles.insert(role.id, role);
        Ok(())
    }

    async fn delete_role(&self, role_id: RoleId) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.roles.remove(&role_id);
        for assigned in tables.assignments.values_mut() {
            assigned.remove(&role_id);
        }
        Ok(())
    }

    async fn replace_permissions(
        &self,
        role_id: RoleId,
        permissions: Vec<Permission>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let role = tables
            .roles
            .get_mut(&role_id)
            .ok_or_else(|| AuthzError::NotFound(format!("role {}", role_id)))?;
        role.permissions = permissions;
        Ok(())
    }

    async fn roles_for_user(&self, user_id: UserId) -> Result<Vec<Role>> {
        let tables = self.tables.read().await;
        let mut roles: Vec<Role> = tables
            .assignments
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.roles.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        roles.sort_by_key(|r| r.id);
        Ok(roles)
    }

    async fn user_ids_with_role(&self, role_id: RoleId) -> Result<Vec<UserId>> {
        let tables = self.tables.read().await;
        let mut users: Vec<UserId> = tables
            .assignments
            .iter()
            .filter(|(_, roles)| roles.contains(&role_id))
            .map(|(user_id, _)| *user_id)
            .collect();
        users.sort_unstable();
        Ok(users)
    }

    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(&role_id) {
            return Err(AuthzError::NotFound(format!("role {}", role_id)));
        }
        tables.assignments.entry(user_id).or_default().insert(role_id);
        Ok(())
    }

    async fn revoke_role(&self, user_id: UserId, role_id: RoleId) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(assigned) = tables.assignments.get_mut(&user_id) {
            assigned.remove(&role_id);
        }
        Ok(())
    }

    async fn remove_user(&self, user_id: UserId) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.assignments.remove(&user_id);
        Ok(())
    }
}

/// Role names and merged permissions computed for one user
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UserPermissions {
    /// Role names, explicit assignments first, then the implicit `user` role
    pub roles: Vec<String>,

    /// Union of every role's permissions, deduplicated
    pub permissions: Vec<Permission>,
}

/// Compute a user's roles and permissions from the source of truth
///
/// The implicit `user` role is looked up like any other role so that its
/// permissions are cache-visible and change with it.
pub async fn load_user_permissions(store: &dyn RoleStore, user_id: UserId) -> Result<UserPermissions> {
    let mut roles = store.roles_for_user(user_id).await?;

    if !roles.iter().any(|r| r.name == USER_ROLE) {
        match store.find_role_by_name(USER_ROLE).await? {
            Some(role) => roles.push(role),
            None => warn!("Implicit '{}' role is not defined", USER_ROLE),
        }
    }

    let mut seen = HashSet::new();
    let mut result = UserPermissions::default();
    for role in roles {
        for permission in role.permissions {
            if seen.insert(permission.dedup_key()) {
                result.permissions.push(permission);
            }
        }
        result.roles.push(role.name);
    }

    Ok(result)
}

/// Write-side role operations that publish invalidation events
pub struct RoleService {
    store: Arc<dyn RoleStore>,
    bus: Arc<EventBus>,
}

impl RoleService {
    /// Create a service over a store and event bus
    pub fn new(store: Arc<dyn RoleStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn RoleStore> {
        &self.store
    }

    async fn modifiable_role(&self, role_id: RoleId) -> Result<Role> {
        let role = self
            .store
            .get_role(role_id)
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("role {}", role_id)))?;

        if role.is_system {
            return Err(AuthzError::Forbidden(format!(
                "system role '{}' cannot be modified",
                role.name
            )));
        }
        Ok(role)
    }

    /// Create a custom role
    pub async fn create_role(&self, role: Role) -> Result<Role> {
        if role.is_system {
            return Err(AuthzError::Forbidden(
                "system roles cannot be created through the API".to_string(),
            ));
        }
        if role.name.is_empty() {
            return Err(AuthzError::BadRequest("role name cannot be empty".to_string()));
        }
        for permission in &role.permissions {
            permission.validate()?;
        }
        if self.store.get_role(role.id).await?.is_some() {
            return Err(AuthzError::BadRequest(format!("role id {} already exists", role.id)));
        }
        if self.store.find_role_by_name(&role.name).await?.is_some() {
            return Err(AuthzError::BadRequest(format!(
                "role name '{}' already exists",
                role.name
            )));
        }

        self.store.put_role(role.clone()).await?;
        info!("Created role '{}' ({})", role.name, role.id);
        Ok(role)
    }

    /// Replace a role's permissions wholesale
    ///
    /// Every pattern is validated before anything is written; holders of the
    /// role are invalidated through [`DomainEvent::RolePermissionsChanged`].
    pub async fn set_permissions(&self, role_id: RoleId, permissions: Vec<Permission>) -> Result<()> {
        let permissions: Vec<Permission> = permissions
            .into_iter()
            .map(|p| Permission::new(p.operation_pattern, p.resource_pattern))
            .collect();
        for permission in &permissions {
            permission.validate()?;
        }

        let role = self.modifiable_role(role_id).await?;
        self.store.replace_permissions(role_id, permissions).await?;
        info!("Replaced permissions of role '{}' ({})", role.name, role_id);

        self.bus
            .publish(DomainEvent::RolePermissionsChanged { role_id })
            .await;
        Ok(())
    }

    /// Delete a custom role; former holders are invalidated
    pub async fn delete_role(&self, role_id: RoleId) -> Result<()> {
        let role = self.modifiable_role(role_id).await?;
        let holders = self.store.user_ids_with_role(role_id).await?;
        self.store.delete_role(role_id).await?;
        info!("Deleted role '{}' ({})", role.name, role_id);

        for user_id in holders {
            self.bus.publish(DomainEvent::UserRoleAssigned { user_id }).await;
        }
        Ok(())
    }

    /// Assign a role to a user
    pub async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> Result<()> {
        self.store.assign_role(user_id, role_id).await?;
        self.bus.publish(DomainEvent::UserRoleAssigned { user_id }).await;
        Ok(())
    }

    /// Remove a role from a user
    pub async fn revoke_role(&self, user_id: UserId, role_id: RoleId) -> Result<()> {
        self.store.revoke_role(user_id, role_id).await?;
        self.bus.publish(DomainEvent::UserRoleAssigned { user_id }).await;
        Ok(())
    }

    /// Remove a user's assignments
    pub async fn delete_user(&self, user_id: UserId) -> Result<()> {
        self.store.remove_user(user_id).await?;
        self.bus.publish(DomainEvent::UserDeleted { user_id }).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ADMIN_ROLE;

    async fn seeded() -> Arc<InMemoryRoleStore> {
        let store = Arc::new(InMemoryRoleStore::new());
        store
            .put_role(
                Role::new(1, ADMIN_ROLE, "Administrator")
                    .system()
                    .with_permissions(vec![Permission::any_resource("*:*:*")]),
            )
            .await
            .unwrap();
        store
            .put_role(
                Role::new(2, USER_ROLE, "User")
                    .system()
                    .with_permissions(vec![Permission::any_resource("self:*:*")]),
            )
            .await
            .unwrap();
        store
            .put_role(
                Role::new(3, "support", "Support")
                    .with_permissions(vec![
                        Permission::any_resource("sys:users:list"),
                        Permission::any_resource("self:*:*"),
                    ]),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_implicit_user_role() {
        let store = seeded().await;
        let loaded = load_user_permissions(store.as_ref(), 10).await.unwrap();
        assert_eq!(loaded.roles, vec![USER_ROLE.to_string()]);
        assert_eq!(loaded.permissions, vec![Permission::any_resource("self:*:*")]);
    }

    #[tokio::test]
    async fn test_permissions_are_merged_and_deduplicated() {
        let store = seeded().await;
        store.assign_role(10, 3).await.unwrap();

        let loaded = load_user_permissions(store.as_ref(), 10).await.unwrap();
        assert_eq!(loaded.roles, vec!["support".to_string(), USER_ROLE.to_string()]);
        assert_eq!(loaded.permissions.len(), 2);
    }

    #[tokio::test]
    async fn test_explicit_user_role_not_duplicated() {
        let store = seeded().await;
        store.assign_role(10, 2).await.unwrap();
        let loaded = load_user_permissions(store.as_ref(), 10).await.unwrap();
        assert_eq!(loaded.roles, vec![USER_ROLE.to_string()]);
    }

    #[tokio::test]
    async fn test_reverse_index() {
        let store = seeded().await;
        store.assign_role(10, 3).await.unwrap();
        store.assign_role(11, 3).await.unwrap();
        store.assign_role(12, 1).await.unwrap();
        assert_eq!(store.user_ids_with_role(3).await.unwrap(), vec![10, 11]);

        store.remove_user(10).await.unwrap();
        assert_eq!(store.user_ids_with_role(3).await.unwrap(), vec![11]);
    }

    #[tokio::test]
    async fn test_set_permissions_validates_before_writing() {
        let store = seeded().await;
        let service = RoleService::new(store.clone(), Arc::new(EventBus::new()));

        let result = service
            .set_permissions(
                3,
                vec![
                    Permission::any_resource("sys:users:create"),
                    Permission::any_resource("sys:users"),
                ],
            )
            .await;
        assert!(matches!(result, Err(AuthzError::InvalidPattern(_))));

        let role = store.get_role(3).await.unwrap().unwrap();
        assert_eq!(role.permissions.len(), 2);
        assert_eq!(role.permissions[0].operation_pattern, "sys:users:list");
    }

    #[tokio::test]
    async fn test_set_permissions_replaces_wholesale() {
        let store = seeded().await;
        let service = RoleService::new(store.clone(), Arc::new(EventBus::new()));

        service
            .set_permissions(3, vec![Permission::new("org:team:*", "")])
            .await
            .unwrap();

        let role = store.get_role(3).await.unwrap().unwrap();
        assert_eq!(role.permissions, vec![Permission::any_resource("org:team:*")]);
    }

    #[tokio::test]
    async fn test_system_roles_are_protected() {
        let store = seeded().await;
        let service = RoleService::new(store.clone(), Arc::new(EventBus::new()));

        assert!(matches!(
            service.set_permissions(2, vec![]).await,
            Err(AuthzError::Forbidden(_))
        ));
        assert!(matches!(
            service.delete_role(1).await,
            Err(AuthzError::Forbidden(_))
        ));
        assert!(matches!(
            service.set_permissions(99, vec![]).await,
            Err(AuthzError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_role_rejects_duplicates() {
        let store = seeded().await;
        let service = RoleService::new(store, Arc::new(EventBus::new()));

        assert!(service.create_role(Role::new(4, "auditor", "Auditor")).await.is_ok());
        assert!(service.create_role(Role::new(5, "auditor", "Auditor")).await.is_err());
        assert!(service.create_role(Role::new(4, "other", "Other")).await.is_err());
        assert!(service
            .create_role(Role::new(6, "root", "Root").system())
            .await
            .is_err());
    }
}
