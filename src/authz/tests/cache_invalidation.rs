//! Event-driven permission cache invalidation

mod common;

use async_trait::async_trait;
use common::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenant_authz::cache::{CacheBackend, MemoryBackend};
use tenant_authz::error::{AuthzError, Result};
use tenant_authz::events::{DomainEvent, EventBus, EventHandler};
use tenant_authz::roles::RoleStore;
use tenant_authz::types::{Permission, Role};

/// Memory backend that records every delete
#[derive(Default)]
struct RecordingBackend {
    inner: MemoryBackend,
    deletes: Mutex<Vec<String>>,
}

impl RecordingBackend {
    fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CacheBackend for RecordingBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.lock().unwrap().push(key.to_string());
        self.inner.delete(key).await
    }
}

const SUPPORT_ROLE_ID: u64 = 30;
const HOLDERS: [u64; 3] = [100, 101, 102];
const BYSTANDERS: [u64; 2] = [200, 201];

async fn with_support_role(h: &Harness) {
    h.roles
        .put_role(
            Role::new(SUPPORT_ROLE_ID, "support", "Support")
                .with_permissions(vec![Permission::any_resource("sys:users:list")]),
        )
        .await
        .unwrap();
    for user in HOLDERS {
        h.roles.assign_role(user, SUPPORT_ROLE_ID).await.unwrap();
    }
}

// ============================================================================
// ROLE CHANGES
// ============================================================================

#[tokio::test]
async fn test_role_change_invalidates_exactly_its_holders() {
    let backend = Arc::new(RecordingBackend::default());
    let h = Harness::with_backend(Some(backend.clone())).await;
    with_support_role(&h).await;

    let cache = h.engine.cache();
    for user in HOLDERS.iter().chain(BYSTANDERS.iter()) {
        cache.load(*user).await.unwrap();
    }

    let handled = h
        .engine
        .bus()
        .publish(DomainEvent::RolePermissionsChanged {
            role_id: SUPPORT_ROLE_ID,
        })
        .await;
    assert_eq!(handled, 1);

    let mut deleted = backend.deletes();
    deleted.sort();
    let expected: Vec<String> = HOLDERS.iter().map(|u| cache.key(*u)).collect();
    assert_eq!(deleted, expected);

    for user in BYSTANDERS {
        assert!(cache.get(user).await.is_some());
    }
}

#[tokio::test]
async fn test_set_permissions_refreshes_holders() {
    let h = Harness::new().await;
    with_support_role(&h).await;
    let holder = HOLDERS[0];

    let before = h.engine.cache().load(holder).await.unwrap();
    assert!(before.permissions.contains(&Permission::any_resource("sys:users:list")));

    h.engine
        .role_service()
        .set_permissions(SUPPORT_ROLE_ID, vec![Permission::any_resource("sys:cache:stats")])
        .await
        .unwrap();

    let after = h.engine.cache().load(holder).await.unwrap();
    assert!(after.permissions.contains(&Permission::any_resource("sys:cache:stats")));
    assert!(!after.permissions.contains(&Permission::any_resource("sys:users:list")));
}

#[tokio::test]
async fn test_invalid_pattern_write_changes_nothing() {
    let backend = Arc::new(RecordingBackend::default());
    let h = Harness::with_backend(Some(backend.clone())).await;
    with_support_role(&h).await;

    let err = h
        .engine
        .role_service()
        .set_permissions(
            SUPPORT_ROLE_ID,
            vec![
                Permission::any_resource("sys:users:list"),
                Permission::any_resource("sys:us*rs:list"),
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert!(backend.deletes().is_empty());

    let role = h.roles.get_role(SUPPORT_ROLE_ID).await.unwrap().unwrap();
    assert_eq!(role.permissions, vec![Permission::any_resource("sys:users:list")]);
}

#[tokio::test]
async fn test_system_role_is_protected() {
    let h = Harness::new().await;
    let err = h
        .engine
        .role_service()
        .set_permissions(USER_ROLE_ID, vec![Permission::any_resource("*:*:*")])
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Forbidden(_)));
}

// ============================================================================
// USER EVENTS
// ============================================================================

#[tokio::test]
async fn test_role_assignment_takes_effect() {
    let h = Harness::new().await;
    with_support_role(&h).await;
    let pipeline = h.pipeline("GET", "/admin/users", "sys:users:list");
    let request = tenant_authz::pipeline::IncomingRequest::new("GET", "/admin/users")
        .with_bearer(session(ALICE));

    assert!(pipeline.execute(&request).await.is_err());

    h.engine
        .role_service()
        .assign_role(ALICE, SUPPORT_ROLE_ID)
        .await
        .unwrap();
    assert!(pipeline.execute(&request).await.is_ok());

    h.engine
        .role_service()
        .revoke_role(ALICE, SUPPORT_ROLE_ID)
        .await
        .unwrap();
    assert!(pipeline.execute(&request).await.is_err());
}

#[tokio::test]
async fn test_user_deletion_invalidates_entry() {
    let backend = Arc::new(RecordingBackend::default());
    let h = Harness::with_backend(Some(backend.clone())).await;
    h.engine.cache().load(ROOT).await.unwrap();

    h.engine.role_service().delete_user(ROOT).await.unwrap();

    assert_eq!(backend.deletes(), vec![h.engine.cache().key(ROOT)]);
    let reloaded = h.engine.cache().load(ROOT).await.unwrap();
    assert!(!reloaded.permissions.iter().any(|p| p.is_super_admin()));
}

// ============================================================================
// FAILURE ISOLATION
// ============================================================================

struct FailingHandler;

#[async_trait]
impl EventHandler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _event: &DomainEvent) -> Result<()> {
        Err(AuthzError::Internal("handler exploded".to_string()))
    }
}

#[tokio::test]
async fn test_handler_failure_does_not_block_others() {
    let backend = Arc::new(RecordingBackend::default());
    let h = Harness::with_backend(Some(backend.clone())).await;
    let bus: &Arc<EventBus> = h.engine.bus();
    bus.subscribe("*", Arc::new(FailingHandler)).await;

    let handled = bus.publish(DomainEvent::UserDeleted { user_id: ALICE }).await;
    assert_eq!(handled, 2);
    assert_eq!(backend.deletes(), vec![h.engine.cache().key(ALICE)]);
}
